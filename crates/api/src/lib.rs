//! HTTP API: a thin host around the generation pipeline.

pub mod app;
pub mod middleware;
