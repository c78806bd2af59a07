//! Error types for the graph, the node model, and patch specs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while wiring or evaluating a live node graph.
#[derive(Debug, Error)]
pub enum NodeError {
    /// `set_input`/`get_input` addressed a slot that was never created.
    #[error("unknown input slot '{slot}' on node '{node}'")]
    UnknownInput { node: String, slot: String },

    /// An input's channel width exceeds what a fixed-width node accepts.
    #[error(
        "node '{node}' accepts at most {max} input channel(s), got {got} on slot '{slot}'"
    )]
    InvalidChannelCount {
        node: String,
        slot: String,
        max: usize,
        got: usize,
    },

    /// `set_input(name, float)` was called but the slot's current occupant
    /// is not a `Constant`, so there is nothing to mutate in place.
    #[error("input slot '{slot}' on node '{node}' is not a constant; cannot set a scalar value directly")]
    CannotSetInput { node: String, slot: String },

    /// `process` was invoked with more frames than the output buffer holds.
    #[error("node '{node}' processed with {requested} frames but its output buffer holds only {allocated}")]
    BufferTooSmall {
        node: String,
        requested: usize,
        allocated: usize,
    },
}

/// Errors raised by [`crate::registry::NodeRegistry`] and graph lifecycle
/// operations that the registry participates in.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A registry lookup found no constructor for the given kind name.
    #[error("unknown node kind '{0}'")]
    UnknownNode(String),

    /// An operation that needs a live graph was called before one was set.
    #[error("operation requires a live graph, but none has been started")]
    GraphNotReady,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Errors raised while building, loading, or instantiating a [`crate::patch_spec::PatchSpec`].
#[derive(Debug, Error)]
pub enum SpecError {
    /// A `PatchNodeSpec` referenced a child id that does not exist in the
    /// same spec, or the spec has zero or more than one root.
    #[error("patch spec '{spec}' is malformed: {reason}")]
    Integrity { spec: String, reason: String },

    /// Instantiating a spec referenced a kind name the registry doesn't know.
    #[error("unknown node kind '{0}'")]
    UnknownNode(String),

    #[error("failed to read patch spec file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write patch spec file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse patch spec JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Loaded sample data doesn't fit the preallocated buffer it was
    /// meant to refill.
    #[error(
        "buffer shape mismatch: expected {expected_channels}ch/{expected_frames}f @ {expected_sample_rate}Hz, got {got_channels}ch/{got_frames}f @ {got_sample_rate}Hz"
    )]
    BufferShapeMismatch {
        expected_channels: usize,
        expected_frames: usize,
        expected_sample_rate: f64,
        got_channels: usize,
        got_frames: usize,
        got_sample_rate: f64,
    },

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Errors raised while loading or saving an [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize TOML config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
