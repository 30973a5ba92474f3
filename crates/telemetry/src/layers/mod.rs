//! Tracing subscriber layers.

pub mod json;

pub use json::JsonLayer;
