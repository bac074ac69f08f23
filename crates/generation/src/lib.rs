//! `vectorsmith-generation`
//!
//! **Responsibility:** pure generation logic, free of I/O.
//!
//! - request validation and canvas resolution
//! - prompt assembly
//! - sanitizing model output into one storable document
//! - stream event frames and persisted record shapes
//! - the model-provider seam and provider error description

pub mod event;
pub mod prompt;
pub mod provider;
pub mod record;
pub mod request;
pub mod sanitizer;

pub use event::{StreamEvent, StreamStatus};
pub use prompt::{PromptPair, build_prompt};
pub use provider::{
    ChatMessage, ChatRole, CompletionParams, CompletionRequest, MessagePart, ModelProvider, ProviderError, TextStream,
    describe_error_body, describe_provider_error,
};
pub use record::{
    Generation, GenerationDetail, GenerationFilter, GenerationSummary, NewGeneration, NewVersion, PageRequest,
    Paginated, Version,
};
pub use request::{Attachment, AttachmentInput, GenerationRequest, PromptMode, ResolvedRequest};
pub use sanitizer::{Sanitizer, clean, generating_placeholder, is_generating_placeholder, is_well_formed};
