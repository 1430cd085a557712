//! Pipeline node identifiers and per-node status

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A stage of the remote pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Greeter,
    IntentClassifier,
    RagRetriever,
    ResponseGenerator,
    FallbackResponse,
}

impl NodeId {
    /// Every known node, in pipeline order
    pub const ALL: [NodeId; 5] = [
        NodeId::Greeter,
        NodeId::IntentClassifier,
        NodeId::RagRetriever,
        NodeId::ResponseGenerator,
        NodeId::FallbackResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::Greeter => "greeter",
            NodeId::IntentClassifier => "intent_classifier",
            NodeId::RagRetriever => "rag_retriever",
            NodeId::ResponseGenerator => "response_generator",
            NodeId::FallbackResponse => "fallback_response",
        }
    }

    /// Resolve a wire identifier. Unknown ids yield `None`.
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|node| node.as_str() == id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Active,
    Complete,
    Error,
}

/// Node status map as it appears on the wire, keyed by raw node id
pub type WireNodeStates = HashMap<String, NodeStatus>;

/// Status of every known node. Always holds an entry per [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeStates(BTreeMap<NodeId, NodeStatus>);

impl Default for NodeStates {
    fn default() -> Self {
        Self::baseline()
    }
}

impl NodeStates {
    /// Every node pending
    pub fn baseline() -> Self {
        Self(NodeId::ALL.into_iter().map(|id| (id, NodeStatus::Pending)).collect())
    }

    /// Build from a wire snapshot. Missing nodes stay pending, unknown ids are dropped.
    pub fn from_wire(wire: &WireNodeStates) -> Self {
        let mut states = Self::baseline();
        for (raw, status) in wire {
            match NodeId::parse(raw) {
                Some(id) => states.set(id, *status),
                None => tracing::debug!(node = %raw, "Ignoring unknown node id"),
            }
        }
        states
    }

    pub fn get(&self, id: NodeId) -> NodeStatus {
        self.0.get(&id).copied().unwrap_or_default()
    }

    pub fn set(&mut self, id: NodeId, status: NodeStatus) {
        self.0.insert(id, status);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeStatus)> + '_ {
        self.0.iter().map(|(id, status)| (*id, *status))
    }

    /// The active node, if any
    pub fn active(&self) -> Option<NodeId> {
        self.iter()
            .find(|(_, status)| *status == NodeStatus::Active)
            .map(|(id, _)| id)
    }

    pub fn active_count(&self) -> usize {
        self.iter().filter(|(_, status)| *status == NodeStatus::Active).count()
    }

    /// Nothing is running and one of the answering nodes has finished
    pub fn answered(&self) -> bool {
        self.active().is_none()
            && [NodeId::ResponseGenerator, NodeId::FallbackResponse]
                .into_iter()
                .any(|id| self.get(id) == NodeStatus::Complete)
    }

    /// Make `id` the single active node. Any other active node is complete.
    pub fn mark_active(&mut self, id: NodeId) {
        for status in self.0.values_mut() {
            if *status == NodeStatus::Active {
                *status = NodeStatus::Complete;
            }
        }
        self.set(id, NodeStatus::Active);
    }

    /// Move every active node to `status`
    pub fn settle_active(&mut self, status: NodeStatus) {
        for current in self.0.values_mut() {
            if *current == NodeStatus::Active {
                *current = status;
            }
        }
    }

    /// Collapse a snapshot with several active nodes down to one.
    ///
    /// `prefer` wins when it is among the active nodes, otherwise the last
    /// active node in pipeline order does. Returns how many were demoted.
    pub fn normalize_active(&mut self, prefer: Option<NodeId>) -> usize {
        let active: Vec<NodeId> = self
            .iter()
            .filter(|(_, status)| *status == NodeStatus::Active)
            .map(|(id, _)| id)
            .collect();
        if active.len() <= 1 {
            return 0;
        }

        let keep = prefer
            .filter(|id| active.contains(id))
            .or_else(|| active.last().copied());
        let mut demoted = 0;
        for id in active {
            if Some(id) != keep {
                self.set(id, NodeStatus::Complete);
                demoted += 1;
            }
        }
        demoted
    }
}
