//! A pull-driven real-time audio graph engine: a DAG of nodes rooted at
//! a fixed-width output sink, ticked once per device callback by the
//! host's `AudioGraph::pull_input`.

mod buffer;
mod config;
mod error;
mod graph;
mod node;
pub mod nodes;
mod patch;
mod patch_spec;
mod registry;

pub use buffer::{Buffer, EnvelopeBuffer, Interpolation, WaveShaperBuffer};
pub use config::EngineConfig;
pub use error::{ConfigError, GraphError, NodeError, SpecError};
pub use graph::AudioGraph;
pub use node::{
    constant, ChannelBounds, GraphContext, Inputs, NodeCell, NodeImpl, NodeRef, NodeState,
    OutputBuffer, N_CHANNELS,
};
pub use patch::{Patch, PatchHandle};
pub use patch_spec::{PatchNodeSpec, PatchRegistry, PatchSpec};
pub use registry::NodeRegistry;
