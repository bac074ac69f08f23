//! Model provider adapters.

mod openai;

pub use openai::{OpenAiCompatibleProvider, parse_stream_data};
