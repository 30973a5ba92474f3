//! Bunyan-style JSON output for log shipping.

use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};

/// Builder for the JSON formatting layers.
pub struct JsonLayer;

impl JsonLayer {
    /// Storage layer (collects span fields) plus the bunyan formatting layer
    /// writing to stdout under `name`.
    pub fn layers(name: &str) -> (JsonStorageLayer, BunyanFormattingLayer<fn() -> std::io::Stdout>) {
        let formatting = BunyanFormattingLayer::new(
            name.to_string(),
            std::io::stdout as fn() -> std::io::Stdout,
        );
        (JsonStorageLayer, formatting)
    }
}
