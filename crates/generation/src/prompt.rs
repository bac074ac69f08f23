//! System/user prompt assembly.
//!
//! Pure and deterministic: the same inputs always produce byte-identical
//! prompts. The canvas dimensions passed in here must be the same ones used
//! for the placeholder and the sanitizer.

use crate::request::PromptMode;

/// Style used when the caller gives none.
pub const DEFAULT_STYLE: &str = "clean modern vector";

/// Element-count ceiling announced to the model.
pub const MAX_ELEMENTS: u32 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

impl PromptPair {
    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }
}

/// Build the prompt pair.
///
/// `Custom` returns empty strings; the caller supplies content directly.
pub fn build_prompt(
    mode: PromptMode,
    subject: &str,
    style: Option<&str>,
    width: u32,
    height: u32,
) -> PromptPair {
    match mode {
        PromptMode::Custom => PromptPair::default(),
        PromptMode::Default => {
            let style = style.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_STYLE);
            PromptPair {
                system: system_prompt(style, width, height),
                user: user_prompt(subject.trim(), style, width, height),
            }
        }
    }
}

fn system_prompt(style: &str, width: u32, height: u32) -> String {
    format!(
        "You are an expert vector illustrator who writes hand-crafted SVG code.\n\
         \n\
         Rules:\n\
         1. Respond with exactly one complete SVG document and nothing else: no explanations, no comments outside the SVG, no markdown code fences.\n\
         2. The root element must be <svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {width} {height}\" width=\"{width}\" height=\"{height}\">.\n\
         3. Use at most {MAX_ELEMENTS} elements in total. Prefer <path>, <g>, basic shapes and gradients; do not embed raster images or scripts.\n\
         4. Every element must fit inside the {width}x{height} canvas.\n\
         5. Render everything in a {style} style."
    )
}

fn user_prompt(subject: &str, style: &str, width: u32, height: u32) -> String {
    format!(
        "Create an SVG illustration of: {subject}\n\
         Style: {style}\n\
         Canvas: {width}x{height} (viewBox=\"0 0 {width} {height}\")"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_mode_is_pass_through() {
        let prompt = build_prompt(PromptMode::Custom, "anything", Some("bold"), 800, 450);
        assert!(prompt.is_empty());
    }

    #[test]
    fn default_mode_snapshot() {
        let prompt = build_prompt(PromptMode::Default, "mountain sunset", Some("minimalist"), 800, 450);

        assert_eq!(
            prompt.user,
            "Create an SVG illustration of: mountain sunset\n\
             Style: minimalist\n\
             Canvas: 800x450 (viewBox=\"0 0 800 450\")"
        );
        assert_eq!(
            prompt.system,
            "You are an expert vector illustrator who writes hand-crafted SVG code.\n\
             \n\
             Rules:\n\
             1. Respond with exactly one complete SVG document and nothing else: no explanations, no comments outside the SVG, no markdown code fences.\n\
             2. The root element must be <svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 800 450\" width=\"800\" height=\"450\">.\n\
             3. Use at most 250 elements in total. Prefer <path>, <g>, basic shapes and gradients; do not embed raster images or scripts.\n\
             4. Every element must fit inside the 800x450 canvas.\n\
             5. Render everything in a minimalist style."
        );
    }

    #[test]
    fn dimensions_match_between_prompts() {
        let prompt = build_prompt(PromptMode::Default, "owl", None, 800, 1422);
        let view_box = "viewBox=\"0 0 800 1422\"";
        assert!(prompt.system.contains(view_box));
        assert!(prompt.user.contains(view_box));
    }

    #[test]
    fn blank_style_uses_default() {
        let prompt = build_prompt(PromptMode::Default, "owl", Some("  "), 800, 800);
        assert!(prompt.system.ends_with(&format!("in a {DEFAULT_STYLE} style.")));
    }

    #[test]
    fn deterministic() {
        let a = build_prompt(PromptMode::Default, "tree", Some("flat"), 800, 600);
        let b = build_prompt(PromptMode::Default, "tree", Some("flat"), 800, 600);
        assert_eq!(a, b);
    }
}
