//! Process-wide, name-keyed node constructor table.
//!
//! A `NodeRegistry` is populated once at startup (typically via
//! [`NodeRegistry::with_builtins`]) and is read-only for the rest of the
//! process's life; every [`crate::patch::Patch`] instantiated from a
//! [`crate::patch_spec::PatchSpec`] looks kind names up here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GraphError;
use crate::node::{GraphContext, NodeCell, NodeImpl, NodeRef};
use crate::nodes;

type Factory = Arc<dyn Fn(&GraphContext, usize) -> Box<dyn NodeImpl> + Send + Sync>;

/// A name-keyed table of node constructors.
pub struct NodeRegistry {
    factories: HashMap<String, Factory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// A registry preloaded with the leaf catalogue from `nodes/`
    /// (`constant`, `sine`, `square`, `asr`, `channel-array`,
    /// `add`/`subtract`/`multiply`/`divide`, `scale`/`lin-exp`,
    /// `audio-out`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("constant", |_ctx, _block| Box::new(nodes::Constant::new(0.0)));
        registry.register("sine", |_ctx, _block| Box::new(nodes::Sine::new(440.0)));
        registry.register("square", |_ctx, _block| Box::new(nodes::Square::new(440.0, 0.5)));
        registry.register("asr", |_ctx, _block| Box::new(nodes::Asr::new(0.01, 0.1, 0.3)));
        registry.register("channel-array", |_ctx, _block| Box::new(nodes::ChannelArray::new()));
        registry.register("add", |_ctx, _block| Box::new(nodes::Add::new()));
        registry.register("subtract", |_ctx, _block| Box::new(nodes::Subtract::new()));
        registry.register("multiply", |_ctx, _block| Box::new(nodes::Multiply::new()));
        registry.register("divide", |_ctx, _block| Box::new(nodes::Divide::new()));
        registry.register("scale", |_ctx, _block| Box::new(nodes::Scale::new(0.0, 1.0, 0.0, 1.0)));
        registry.register("lin-exp", |_ctx, _block| Box::new(nodes::LinExp::new(0.0, 1.0, 1.0, 2.0)));
        registry.register("audio-out", |_ctx, _block| Box::new(nodes::AudioOut::new(2)));
        registry
    }

    /// Add (or replace) a constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&GraphContext, usize) -> Box<dyn NodeImpl> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Construct a fresh, unwired node of kind `kind`.
    pub fn create(&self, kind: &str, ctx: &GraphContext, block_size: usize) -> Result<NodeRef, GraphError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| GraphError::UnknownNode(kind.to_string()))?;
        Ok(NodeCell::new(factory(ctx, block_size), block_size))
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
