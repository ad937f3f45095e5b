//! Execution graph representation.
//!
//! A [`WorkflowGraph`] is an ordered node list plus the edges between node
//! outputs and inputs. It serializes to the node-graph prompt format of the
//! external service with [`WorkflowGraph::to_prompt`] and carries the
//! per-node step weights used for progress normalization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Handle to a node inside a graph under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub u32);

impl NodeRef {
    /// Reference output `slot` of this node as an input value.
    pub fn out(self, slot: u32) -> Input {
        Input::Link(self, slot)
    }

    /// Node id as the backend sees it.
    pub fn key(self) -> String {
        self.0.to_string()
    }
}

/// A node input: a literal value or a link to another node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Value(Value),
    Link(NodeRef, u32),
}

/// Literal input helper.
pub fn val(v: impl Into<Value>) -> Input {
    Input::Value(v.into())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeRef,
    pub class_type: String,
    pub inputs: Vec<(String, Input)>,
    /// Share of total work; sampler-like nodes weigh their step count.
    pub step_weight: u32,
}

impl GraphNode {
    pub fn input(&self, key: &str) -> Option<&Input> {
        self.inputs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Literal value of input `key`, if it is not a link.
    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.input(key)? {
            Input::Value(v) => Some(v),
            Input::Link(..) => None,
        }
    }
}

/// Output-to-input connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeRef,
    pub slot: u32,
    pub to: NodeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Mask,
    Audio,
}

/// A local file a node loads. Backends that run remotely upload it and
/// rewrite `input` on `node` to the uploaded name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAsset {
    pub node: NodeRef,
    pub input: String,
    pub path: PathBuf,
    pub kind: AssetKind,
}

/// Immutable compiled graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// `media/mode/family` template the graph was built from.
    pub template: String,
    pub seed: u64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
    pub assets: Vec<GraphAsset>,
}

impl WorkflowGraph {
    pub fn node(&self, id: NodeRef) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// First node of `class_type`.
    pub fn find_class(&self, class_type: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.class_type == class_type)
    }

    pub fn contains_class(&self, class_type: &str) -> bool {
        self.find_class(class_type).is_some()
    }

    /// Step weight per backend node id.
    pub fn step_weights(&self) -> HashMap<String, u32> {
        self.nodes
            .iter()
            .map(|n| (n.id.key(), n.step_weight))
            .collect()
    }

    pub fn total_steps(&self) -> u32 {
        self.nodes.iter().map(|n| n.step_weight).sum()
    }

    /// Serialize into the service's prompt document:
    /// `{"<id>": {"class_type": .., "inputs": {..}}}` with links as
    /// `["<id>", slot]`.
    pub fn to_prompt(&self) -> Value {
        let mut prompt = Map::new();
        for node in &self.nodes {
            let mut inputs = Map::new();
            for (key, input) in &node.inputs {
                let value = match input {
                    Input::Value(v) => v.clone(),
                    Input::Link(from, slot) => json!([from.key(), slot]),
                };
                inputs.insert(key.clone(), value);
            }
            prompt.insert(
                node.id.key(),
                json!({ "class_type": node.class_type, "inputs": inputs }),
            );
        }
        Value::Object(prompt)
    }
}

/// Incremental graph construction used by the builders.
#[derive(Debug)]
pub struct GraphBuilder {
    template: String,
    nodes: Vec<GraphNode>,
    edges: Vec<Edge>,
    assets: Vec<GraphAsset>,
}

impl GraphBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            assets: Vec::new(),
        }
    }

    /// Append a node of unit weight.
    pub fn add<I>(&mut self, class_type: &str, inputs: I) -> NodeRef
    where
        I: IntoIterator<Item = (&'static str, Input)>,
    {
        self.add_weighted(class_type, 1, inputs)
    }

    /// Append a node that performs `steps` units of work.
    pub fn add_weighted<I>(&mut self, class_type: &str, steps: u32, inputs: I) -> NodeRef
    where
        I: IntoIterator<Item = (&'static str, Input)>,
    {
        let id = NodeRef(self.nodes.len() as u32 + 1);
        let inputs: Vec<(String, Input)> = inputs
            .into_iter()
            .map(|(k, v)| {
                if let Input::Link(from, slot) = v {
                    self.edges.push(Edge { from, slot, to: id });
                }
                (k.to_string(), v)
            })
            .collect();
        self.nodes.push(GraphNode {
            id,
            class_type: class_type.to_string(),
            inputs,
            step_weight: steps.max(1),
        });
        id
    }

    /// Append a loader node whose `input` names the local file at `path`.
    pub fn add_asset_loader(
        &mut self,
        class_type: &str,
        input: &'static str,
        path: &Path,
        kind: AssetKind,
        extra: Vec<(&'static str, Input)>,
    ) -> NodeRef {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let inputs = std::iter::once((input, val(file_name))).chain(extra);
        let node = self.add(class_type, inputs);
        self.assets.push(GraphAsset {
            node,
            input: input.to_string(),
            path: path.to_path_buf(),
            kind,
        });
        node
    }

    pub fn finish(self, seed: u64) -> WorkflowGraph {
        WorkflowGraph {
            template: self.template,
            seed,
            nodes: self.nodes,
            edges: self.edges,
            assets: self.assets,
        }
    }
}
