//! `vectorsmith-core` — domain building blocks shared by every layer.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod actor;
pub mod canvas;
pub mod entity;
pub mod error;
pub mod history;
pub mod id;
pub mod value_object;

pub use actor::{Actor, Role};
pub use canvas::{AspectRatio, Canvas, DEFAULT_WIDTH, compute_height};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use history::{EDIT_HISTORY_LIMIT, EditEntry, EditHistory};
pub use id::{GenerationId, UserId, VersionId};
pub use value_object::ValueObject;
