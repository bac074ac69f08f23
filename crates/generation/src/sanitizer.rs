//! Content sanitizer: turns arbitrary model output into one storable SVG
//! document.
//!
//! `clean` is total. Whatever comes in, something renderable comes out, in
//! this order of preference:
//!
//! 1. blank input → placeholder ("nothing generated")
//! 2. already a single well-formed document → as-is (namespace repaired)
//! 3. strip markdown code fences
//! 4. greedy `<svg …>…</svg>` span
//! 5. opening tag without a closing tag → append `</svg>` (truncated stream)
//! 6. opening and closing tags out of shape → first opening through first closing
//! 7. bare leaf elements → wrap in a synthesized root
//! 8. otherwise → placeholder ("could not parse")
//!
//! The well-formedness check only counts root tags; it is not an XML parser.
//! A literal `<svg` inside a comment or text node makes a document look
//! malformed. That heuristic is kept on purpose so stored content keeps
//! classifying the same way.

use std::sync::LazyLock;

use regex::Regex;

use vectorsmith_core::Canvas;

pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

pub const EMPTY_MESSAGE: &str = "No content was generated";
pub const PARSE_FAILED_MESSAGE: &str = "The generated graphic could not be parsed";
pub const GENERATING_MESSAGE: &str = "Generating…";

const GENERATING_MARKER: &str = "data-placeholder=\"generating\"";

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<svg[\s>/]").expect("valid regex"));
static OPEN_TAG_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<svg(?:[\s/][^>]*)?>").expect("valid regex"));
static CLOSE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</svg\s*>").expect("valid regex"));
static SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<svg[\s>].*</svg\s*>").expect("valid regex"));
static NAMESPACE_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sxmlns\s*=\s*["']"#).expect("valid regex"));
static FENCE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_+\-]*[ \t]*\r?\n?").expect("valid regex"));
static FENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?[ \t]*```[ \t]*$").expect("valid regex"));
static LEAF_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<(?:path|rect|circle|ellipse|line|polyline|polygon|g|text|tspan|defs|use|image|linearGradient|radialGradient|clipPath|mask|pattern|symbol)[\s>/]",
    )
    .expect("valid regex")
});

/// Clean with the default square canvas.
pub fn clean(raw: &str) -> String {
    Sanitizer::default().clean(raw)
}

/// Sanitizer bound to the canvas used for placeholders and synthesized roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitizer {
    canvas: Canvas,
}

impl Sanitizer {
    pub fn new(canvas: Canvas) -> Self {
        Self { canvas }
    }

    pub fn clean(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return placeholder_document(EMPTY_MESSAGE, self.canvas);
        }

        let direct = ensure_namespace(trimmed);
        if is_well_formed(&direct) {
            return direct;
        }

        let unfenced = strip_fences(trimmed);
        if unfenced.is_empty() {
            return placeholder_document(EMPTY_MESSAGE, self.canvas);
        }

        if let Some(span) = SPAN.find(unfenced) {
            let candidate = ensure_namespace(span.as_str());
            if is_well_formed(&candidate) {
                return candidate;
            }
        }

        if let Some(open) = OPEN_TAG.find(unfenced) {
            let candidate = match CLOSE_TAG.find_at(unfenced, open.start()) {
                None => {
                    let body = trim_incomplete_tail(&unfenced[open.start()..]);
                    ensure_namespace(&format!("{}</svg>", body.trim_end()))
                }
                Some(close) => ensure_namespace(&unfenced[open.start()..close.end()]),
            };
            if is_well_formed(&candidate) {
                return candidate;
            }
        }

        if let Some(leaf) = LEAF_ELEMENT.find(unfenced) {
            let fragment = strip_root_tags(&unfenced[leaf.start()..]);
            let fragment = trim_incomplete_tail(&fragment);
            let fragment = match fragment.rfind('>') {
                Some(end) => &fragment[..=end],
                None => fragment,
            };
            if !fragment.trim().is_empty() {
                let wrapped = self.wrap(fragment.trim());
                if is_well_formed(&wrapped) {
                    return wrapped;
                }
            }
        }

        placeholder_document(PARSE_FAILED_MESSAGE, self.canvas)
    }

    fn wrap(&self, fragment: &str) -> String {
        let Canvas { width, height } = self.canvas;
        format!(
            r#"<svg xmlns="{SVG_NAMESPACE}" viewBox="0 0 {width} {height}" width="{width}" height="{height}">{fragment}</svg>"#
        )
    }
}

/// Exactly one opening and one closing root tag, in that order, enclosing the
/// whole document, with the namespace declared.
pub fn is_well_formed(doc: &str) -> bool {
    let doc = doc.trim();
    let mut opens = OPEN_TAG.find_iter(doc);
    let mut closes = CLOSE_TAG.find_iter(doc);
    let (Some(open), None) = (opens.next(), opens.next()) else {
        return false;
    };
    let (Some(close), None) = (closes.next(), closes.next()) else {
        return false;
    };
    if open.start() >= close.start() || close.end() != doc.len() {
        return false;
    }

    let prefix = doc[..open.start()].trim();
    let prefix_ok = prefix.is_empty() || (prefix.starts_with("<?xml") && prefix.ends_with("?>"));
    prefix_ok && has_namespace(doc)
}

fn opening_tag(doc: &str) -> Option<&str> {
    let open = OPEN_TAG.find(doc)?;
    let rest = &doc[open.start()..];
    let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn has_namespace(doc: &str) -> bool {
    opening_tag(doc).is_some_and(|tag| NAMESPACE_ATTR.is_match(tag))
}

/// Insert `xmlns` into the first root opening tag when it is missing.
fn ensure_namespace(doc: &str) -> String {
    match OPEN_TAG.find(doc) {
        Some(open) if !has_namespace(doc) => {
            let insert_at = open.start() + "<svg".len();
            format!(
                r#"{} xmlns="{SVG_NAMESPACE}"{}"#,
                &doc[..insert_at],
                &doc[insert_at..]
            )
        }
        _ => doc.to_string(),
    }
}

fn strip_fences(input: &str) -> &str {
    let start = FENCE_START.find(input).map(|m| m.end()).unwrap_or(0);
    let rest = &input[start..];
    let end = FENCE_END.find(rest).map(|m| m.start()).unwrap_or(rest.len());
    rest[..end].trim()
}

/// Drop a trailing tag cut off mid-way (`<circle cx="4`).
fn trim_incomplete_tail(input: &str) -> &str {
    match (input.rfind('<'), input.rfind('>')) {
        (Some(lt), Some(gt)) if lt > gt => &input[..lt],
        (Some(lt), None) => &input[..lt],
        _ => input,
    }
}

fn strip_root_tags(fragment: &str) -> String {
    let without_open = OPEN_TAG_FULL.replace_all(fragment, "");
    CLOSE_TAG.replace_all(&without_open, "").into_owned()
}

/// Renderable stand-in document carrying a short message.
pub fn placeholder_document(message: &str, canvas: Canvas) -> String {
    render_placeholder(message, canvas, "")
}

/// The "generating…" marker stored as version 1 before the model finishes.
pub fn generating_placeholder(canvas: Canvas) -> String {
    render_placeholder(GENERATING_MESSAGE, canvas, GENERATING_MARKER)
}

pub fn is_generating_placeholder(content: &str) -> bool {
    opening_tag(content).is_some_and(|tag| tag.contains(GENERATING_MARKER))
}

fn render_placeholder(message: &str, canvas: Canvas, marker: &str) -> String {
    let Canvas { width, height } = canvas;
    let marker = if marker.is_empty() { String::new() } else { format!(" {marker}") };
    let font_size = (width.min(height) / 20).max(12);
    format!(
        r##"<svg xmlns="{SVG_NAMESPACE}" viewBox="0 0 {width} {height}" width="{width}" height="{height}"{marker}><rect width="100%" height="100%" fill="#f3f4f6"/><text x="50%" y="50%" text-anchor="middle" dominant-baseline="middle" font-family="sans-serif" font-size="{font_size}" fill="#6b7280">{}</text></svg>"##,
        escape_text(message)
    )
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NS: &str = r#"xmlns="http://www.w3.org/2000/svg""#;

    #[test]
    fn blank_input_yields_empty_placeholder() {
        for raw in ["", "   ", "\n\t"] {
            let out = clean(raw);
            assert!(is_well_formed(&out));
            assert!(out.contains(EMPTY_MESSAGE));
        }
    }

    #[test]
    fn well_formed_document_is_returned_unchanged() {
        let doc = format!(r#"<svg {NS} viewBox="0 0 10 10"><circle r="4"/></svg>"#);
        assert_eq!(clean(&doc), doc);
    }

    #[test]
    fn missing_namespace_is_inserted() {
        let out = clean(r#"<svg viewBox="0 0 10 10"><rect width="2" height="2"/></svg>"#);
        assert!(out.starts_with(&format!("<svg {NS} viewBox")));
        assert!(is_well_formed(&out));
    }

    #[test]
    fn xml_declaration_prefix_is_accepted() {
        let doc = format!(r#"<?xml version="1.0"?><svg {NS}><g/></svg>"#);
        assert_eq!(clean(&doc), doc);
    }

    #[test]
    fn fenced_document_is_unwrapped() {
        let raw = format!("```svg\n<svg {NS}><path d=\"M0 0L1 1\"/></svg>\n```");
        assert_eq!(clean(&raw), format!("<svg {NS}><path d=\"M0 0L1 1\"/></svg>"));
    }

    #[test]
    fn prose_around_document_is_dropped() {
        let raw = format!("Here is your image:\n<svg {NS}><rect/></svg>\nEnjoy!");
        assert_eq!(clean(&raw), format!("<svg {NS}><rect/></svg>"));
    }

    #[test]
    fn fenced_truncated_stream_is_closed() {
        let raw = "```xml\n<svg viewBox=\"0 0 800 450\"><rect width=\"800\" height=\"450\"/>\n";
        let out = clean(raw);
        assert_eq!(
            out,
            format!("<svg {NS} viewBox=\"0 0 800 450\"><rect width=\"800\" height=\"450\"/></svg>")
        );
        assert!(!out.contains("```"));
    }

    #[test]
    fn tag_cut_mid_way_is_dropped_before_closing() {
        let out = clean(&format!("<svg {NS}><rect/><circle cx=\"4"));
        assert_eq!(out, format!("<svg {NS}><rect/></svg>"));
    }

    #[test]
    fn two_documents_take_the_first() {
        let raw = format!("<svg {NS}><rect/></svg> and <svg {NS}><circle/></svg>");
        assert_eq!(clean(&raw), format!("<svg {NS}><rect/></svg>"));
    }

    #[test]
    fn bare_leaf_elements_are_wrapped() {
        let out = Sanitizer::new(Canvas { width: 800, height: 450 })
            .clean("Sure! <circle cx=\"5\" cy=\"5\" r=\"4\"/><rect x=\"1\"/> hope it helps");
        assert_eq!(
            out,
            format!(
                "<svg {NS} viewBox=\"0 0 800 450\" width=\"800\" height=\"450\"><circle cx=\"5\" cy=\"5\" r=\"4\"/><rect x=\"1\"/></svg>"
            )
        );
    }

    #[test]
    fn stray_closing_tag_with_leaves_is_wrapped() {
        let out = clean("<g><path d=\"M1 1\"/></g></svg>");
        assert!(is_well_formed(&out));
        assert!(out.contains("<g><path d=\"M1 1\"/></g>"));
    }

    #[test]
    fn garbage_yields_parse_failed_placeholder() {
        let out = clean("I'm sorry, I can't draw that.");
        assert!(is_well_formed(&out));
        assert!(out.contains(PARSE_FAILED_MESSAGE));
    }

    #[test]
    fn nested_root_is_not_mistaken_for_valid() {
        let raw = format!("<svg {NS}><svg><rect/></svg></svg>");
        assert!(!is_well_formed(&raw));
        let out = clean(&raw);
        assert!(is_well_formed(&out));
        assert!(out.contains("<rect/>"));
    }

    #[test]
    fn generating_placeholder_is_marked_and_sized() {
        let doc = generating_placeholder(Canvas { width: 800, height: 450 });
        assert!(is_well_formed(&doc));
        assert!(is_generating_placeholder(&doc));
        assert!(doc.contains(r#"viewBox="0 0 800 450""#));
        assert!(!is_generating_placeholder(&placeholder_document("x", Canvas::default())));
    }

    #[test]
    fn placeholder_message_is_escaped() {
        let doc = placeholder_document("a < b & \"c\"", Canvas::default());
        assert!(doc.contains("a &lt; b &amp; &quot;c&quot;"));
        assert!(is_well_formed(&doc));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: any input yields a non-empty, well-formed document.
        #[test]
        fn clean_is_total(raw in ".{0,200}") {
            let out = clean(&raw);
            prop_assert!(!out.is_empty());
            prop_assert!(is_well_formed(&out), "not well formed: {out}");
        }

        /// Property: markup-shaped noise (fragments of tags, fences, prose)
        /// still yields a well-formed document.
        #[test]
        fn clean_handles_markup_noise(parts in prop::collection::vec(
            prop::sample::select(vec![
                "<svg", "<svg>", "</svg>", "<svg viewBox=\"0 0 1 1\">", "```", "```xml\n",
                "<rect/>", "<g>", "</g>", "<circle r=\"1\"", ">", "<", "text", "\n",
                "xmlns=\"x\"", "<path d=\"M0 0\"/>", "<!-- <svg> -->",
            ]),
            0..12,
        )) {
            let raw: String = parts.concat();
            let out = clean(&raw);
            prop_assert!(is_well_formed(&out), "not well formed: {out}");
        }
    }
}
