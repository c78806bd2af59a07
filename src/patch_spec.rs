//! A serialisable, acyclic node-template graph: the on-disk/over-the-wire
//! form a [`crate::patch::Patch`] is instantiated from.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, SpecError};
use crate::node::GraphContext;
use crate::patch::Patch;
use crate::registry::NodeRegistry;

/// One node in a [`PatchSpec`]. Field names and shape are fixed: this is
/// the stable on-disk form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchNodeSpec {
    pub id: u32,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_name: Option<String>,
    #[serde(default)]
    pub is_constant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f32>,
    #[serde(default)]
    pub inputs: HashMap<String, u32>,
}

impl PatchNodeSpec {
    pub fn new(id: u32, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            input_name: None,
            is_constant: false,
            value: None,
            inputs: HashMap::new(),
        }
    }

    pub fn constant(id: u32, value: f32) -> Self {
        Self {
            id,
            kind: "constant".to_string(),
            input_name: None,
            is_constant: true,
            value: Some(value),
            inputs: HashMap::new(),
        }
    }

    pub fn with_input_name(mut self, name: impl Into<String>) -> Self {
        self.input_name = Some(name.into());
        self
    }

    pub fn with_input(mut self, param_name: impl Into<String>, child_id: u32) -> Self {
        self.inputs.insert(param_name.into(), child_id);
        self
    }
}

/// A logical, acyclic patch description: a node map plus a designated
/// root. Many `Patch`es may be instantiated from one `PatchSpec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSpec {
    name: String,
    root: Option<u32>,
    nodes: Vec<PatchNodeSpec>,
    #[serde(skip)]
    next_id: u32,
}

impl PatchSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), root: None, nodes: Vec::new(), next_id: 0 }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Assign the next id, store `spec`, and return the assigned id.
    pub fn add_node_spec(&mut self, mut spec: PatchNodeSpec) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        spec.id = id;
        self.nodes.push(spec);
        id
    }

    pub fn set_output(&mut self, id: u32) {
        self.root = Some(id);
    }

    pub fn get_root(&self) -> Option<u32> {
        self.root
    }

    pub fn get_node_spec(&self, id: u32) -> Option<&PatchNodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[PatchNodeSpec] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [PatchNodeSpec] {
        &mut self.nodes
    }

    /// Check structural integrity: exactly one root, no duplicate node
    /// ids, and every referenced child id resolves to a node in this spec.
    pub fn validate(&self) -> Result<(), SpecError> {
        let root = self.root.ok_or_else(|| SpecError::Integrity {
            spec: self.name.clone(),
            reason: "no root designated".to_string(),
        })?;

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(SpecError::Integrity {
                    spec: self.name.clone(),
                    reason: format!("duplicate node id {}", node.id),
                });
            }
        }
        if self.get_node_spec(root).is_none() {
            return Err(SpecError::Integrity {
                spec: self.name.clone(),
                reason: format!("root id {root} does not exist"),
            });
        }
        for node in &self.nodes {
            for (param, &child_id) in &node.inputs {
                if self.get_node_spec(child_id).is_none() {
                    return Err(SpecError::Integrity {
                        spec: self.name.clone(),
                        reason: format!("node {} input '{param}' references missing id {child_id}", node.id),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SpecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SpecError> {
        let mut spec: Self = serde_json::from_str(text)?;
        spec.next_id = spec.nodes.iter().map(|n| n.id + 1).max().unwrap_or(0);
        spec.validate()?;
        Ok(spec)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SpecError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SpecError> {
        let path = path.as_ref();
        let text = self.to_json()?;
        fs::write(path, text).map_err(|source| SpecError::WriteFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// DFS pretty-printer, one line per spec node, indented by depth,
    /// mirroring `AudioGraph::print`.
    pub fn print(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.print_node(root, 0, &mut out);
        }
        out
    }

    fn print_node(&self, id: u32, depth: usize, out: &mut String) {
        let Some(node) = self.get_node_spec(id) else { return };
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("[{}] {}", node.id, node.kind));
        if let Some(name) = &node.input_name {
            out.push_str(&format!(" (input: {name})"));
        }
        if node.is_constant {
            out.push_str(&format!(" = {}", node.value.unwrap_or(0.0)));
        }
        out.push('\n');
        let mut children: Vec<_> = node.inputs.iter().collect();
        children.sort_by_key(|(name, _)| name.clone());
        for (_, &child_id) in children {
            self.print_node(child_id, depth + 1, out);
        }
    }

    /// Validate and register this spec under its own name in the
    /// process-wide [`PatchRegistry`], so later code can instantiate a
    /// [`crate::patch::Patch`] from that name alone rather than holding a
    /// reference to the spec itself.
    pub fn store(self) -> Result<(), SpecError> {
        self.validate()?;
        PatchRegistry::global().insert(self);
        Ok(())
    }
}

/// Process-wide, name-keyed table of validated [`PatchSpec`]s.
///
/// Populated by [`PatchSpec::store`] and consulted wherever a `Patch` is
/// built from a registered name rather than a spec value in hand. Reads
/// vastly outnumber writes (specs are stored once at startup or on patch
/// reload, then instantiated repeatedly), so lookups take a shared lock.
pub struct PatchRegistry {
    specs: RwLock<HashMap<String, Arc<PatchSpec>>>,
}

impl PatchRegistry {
    fn new() -> Self {
        Self { specs: RwLock::new(HashMap::new()) }
    }

    /// The single registry shared by every caller in this process.
    pub fn global() -> &'static PatchRegistry {
        static REGISTRY: OnceLock<PatchRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PatchRegistry::new)
    }

    fn insert(&self, spec: PatchSpec) {
        let mut specs = self.specs.write().expect("patch registry lock poisoned");
        specs.insert(spec.get_name().to_string(), Arc::new(spec));
    }

    /// Look up a spec previously registered via [`PatchSpec::store`].
    pub fn get(&self, name: &str) -> Option<Arc<PatchSpec>> {
        let specs = self.specs.read().expect("patch registry lock poisoned");
        specs.get(name).cloned()
    }

    pub fn knows(&self, name: &str) -> bool {
        let specs = self.specs.read().expect("patch registry lock poisoned");
        specs.contains_key(name)
    }

    /// Look up `name` and instantiate a fresh [`Patch`] from it.
    pub fn create(&self, name: &str, registry: &NodeRegistry, ctx: &GraphContext, block_size: usize) -> Result<Patch, GraphError> {
        let spec = self
            .get(name)
            .ok_or_else(|| GraphError::Spec(SpecError::UnknownNode(name.to_string())))?;
        Patch::from_spec(&spec, registry, ctx, block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> PatchSpec {
        let mut spec = PatchSpec::new("test-patch");
        let freq = spec.add_node_spec(PatchNodeSpec::constant(0, 440.0).with_input_name("freq"));
        let sine = spec.add_node_spec(PatchNodeSpec::new(0, "sine").with_input("frequency", freq));
        spec.set_output(sine);
        spec
    }

    #[test]
    fn json_roundtrip_is_identity() {
        let spec = sample_spec();
        let json = spec.to_json().unwrap();
        let restored = PatchSpec::from_json(&json).unwrap();
        assert_eq!(restored.get_root(), spec.get_root());
        assert_eq!(restored.nodes().len(), spec.nodes().len());
    }

    #[test]
    fn validate_rejects_missing_root() {
        let spec = PatchSpec::new("empty");
        assert!(matches!(spec.validate(), Err(SpecError::Integrity { .. })));
    }

    #[test]
    fn validate_rejects_dangling_input_reference() {
        let mut spec = PatchSpec::new("broken");
        let sine = spec.add_node_spec(PatchNodeSpec::new(0, "sine").with_input("frequency", 999));
        spec.set_output(sine);
        assert!(matches!(spec.validate(), Err(SpecError::Integrity { .. })));
    }

    #[test]
    fn print_indents_by_depth() {
        let spec = sample_spec();
        let printed = spec.print();
        let lines: Vec<_> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("  "));
    }

    #[test]
    fn store_registers_spec_by_name_for_later_lookup() {
        let mut spec = PatchSpec::new("registry-test-patch");
        let root = spec.add_node_spec(PatchNodeSpec::constant(0, 1.0));
        spec.set_output(root);
        spec.store().unwrap();
        let found = PatchRegistry::global().get("registry-test-patch").unwrap();
        assert_eq!(found.get_name(), "registry-test-patch");
        assert!(PatchRegistry::global().knows("registry-test-patch"));
    }

    proptest::proptest! {
        #[test]
        fn json_roundtrip_preserves_node_count(extra in 0u32..10) {
            let mut spec = PatchSpec::new("fuzzed");
            let mut last = spec.add_node_spec(PatchNodeSpec::constant(0, 1.0));
            for _ in 0..extra {
                last = spec.add_node_spec(PatchNodeSpec::new(0, "add").with_input("a", last));
            }
            spec.set_output(last);
            let json = spec.to_json().unwrap();
            let restored = PatchSpec::from_json(&json).unwrap();
            proptest::prop_assert_eq!(restored.nodes().len(), spec.nodes().len());
        }
    }
}
