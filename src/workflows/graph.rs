use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::nodes::{self, WorkflowNode};
use super::retry::RetryPolicy;
use super::run::{NodeId, RunState, RunStatus};
use crate::classifier::Dialect;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Node {0} is declared twice")]
    DuplicateNode(NodeId),

    #[error("Entry node {0} is not declared")]
    MissingEntry(NodeId),

    #[error("Edge from {from} targets undeclared node {to}")]
    UnknownTarget { from: NodeId, to: NodeId },

    #[error("Graph contains a cycle through {0}")]
    Cycle(NodeId),

    #[error("Node {0} is not reachable from the entry")]
    Unreachable(NodeId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("No edge from {node} matches {signal:?}")]
    NoRoute { node: NodeId, signal: EdgeSignal },
}

/// What to do with an `Ambiguous` classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Suspend at a gate so a human can confirm
    #[default]
    Suspend,
    /// End the run `Skipped`
    Skip,
}

/// Upstream outputs a node may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKey {
    Listing,
    Classification,
    Task,
    Artifact,
}

impl InputKey {
    pub fn is_present(&self, state: &RunState) -> bool {
        match self {
            InputKey::Listing => true,
            InputKey::Classification => state.classification.is_some(),
            InputKey::Task => state.task.is_some(),
            InputKey::Artifact => state.artifact.is_some(),
        }
    }
}

/// Signal derived from a node outcome, matched against edge conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSignal {
    Done,
    Classified(Dialect),
    Approved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCondition {
    Always,
    Classified(Dialect),
    Approved,
}

impl EdgeCondition {
    fn matches(&self, signal: &EdgeSignal) -> bool {
        match (self, signal) {
            (EdgeCondition::Always, _) => true,
            (EdgeCondition::Classified(expected), EdgeSignal::Classified(actual)) => {
                expected == actual
            }
            (EdgeCondition::Approved, EdgeSignal::Approved) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Next(NodeId),
    Finish(RunStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub when: EdgeCondition,
    pub to: Route,
}

impl Edge {
    pub fn always(to: Route) -> Self {
        Self { when: EdgeCondition::Always, to }
    }

    pub fn when(when: EdgeCondition, to: Route) -> Self {
        Self { when, to }
    }
}

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub node: WorkflowNode,
    pub retry: RetryPolicy,
    pub mutates_repository: bool,
    pub requires: Vec<InputKey>,
    pub edges: Vec<Edge>,
}

impl NodeSpec {
    pub fn new(id: &str, node: WorkflowNode) -> Self {
        Self {
            id: NodeId::from(id),
            node,
            retry: RetryPolicy::none(),
            mutates_repository: false,
            requires: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mutating(mut self) -> Self {
        self.mutates_repository = true;
        self
    }

    pub fn requires(mut self, inputs: &[InputKey]) -> Self {
        self.requires = inputs.to_vec();
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn missing_input(&self, state: &RunState) -> Option<InputKey> {
        self.requires.iter().copied().find(|input| !input.is_present(state))
    }
}

/// Options shaping the standard graph
#[derive(Debug, Clone, Copy)]
pub struct GraphSettings {
    pub ambiguity: AmbiguityPolicy,
    pub require_review: bool,
    pub retry: RetryPolicy,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            ambiguity: AmbiguityPolicy::Suspend,
            require_review: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Validated directed acyclic graph of workflow nodes with a single entry
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    entry: NodeId,
    nodes: BTreeMap<NodeId, NodeSpec>,
}

impl WorkflowGraph {
    pub fn new(entry: &str, specs: Vec<NodeSpec>) -> Result<Self, GraphError> {
        let entry = NodeId::from(entry);
        let mut nodes = BTreeMap::new();
        for spec in specs {
            if nodes.contains_key(&spec.id) {
                return Err(GraphError::DuplicateNode(spec.id));
            }
            nodes.insert(spec.id.clone(), spec);
        }

        let graph = Self { entry, nodes };
        graph.validate()?;
        Ok(graph)
    }

    /// classify → (confirm_dialect) → delegate → await_delegation
    /// → (review_change) → notify
    pub fn standard(settings: &GraphSettings) -> Result<Self, GraphError> {
        let after_delegation = if settings.require_review {
            nodes::REVIEW_CHANGE
        } else {
            nodes::NOTIFY
        };
        let on_ambiguous = match settings.ambiguity {
            AmbiguityPolicy::Suspend => Route::Next(NodeId::from(nodes::CONFIRM_DIALECT)),
            AmbiguityPolicy::Skip => Route::Finish(RunStatus::Skipped),
        };

        let mut specs = vec![
            NodeSpec::new(nodes::CLASSIFY, WorkflowNode::Classify)
                .requires(&[InputKey::Listing])
                .edge(Edge::when(
                    EdgeCondition::Classified(Dialect::Terraform),
                    Route::Next(NodeId::from(nodes::DELEGATE)),
                ))
                .edge(Edge::when(
                    EdgeCondition::Classified(Dialect::Bicep),
                    Route::Next(NodeId::from(nodes::DELEGATE)),
                ))
                .edge(Edge::when(EdgeCondition::Classified(Dialect::Ambiguous), on_ambiguous))
                .edge(Edge::when(
                    EdgeCondition::Classified(Dialect::None),
                    Route::Finish(RunStatus::Skipped),
                )),
            NodeSpec::new(nodes::DELEGATE, WorkflowNode::Delegate)
                .requires(&[InputKey::Classification])
                .retry(settings.retry)
                .mutating()
                .edge(Edge::always(Route::Next(NodeId::from(nodes::AWAIT_DELEGATION)))),
            NodeSpec::new(nodes::AWAIT_DELEGATION, WorkflowNode::AwaitDelegation)
                .requires(&[InputKey::Task])
                .retry(settings.retry)
                .edge(Edge::always(Route::Next(NodeId::from(after_delegation)))),
            NodeSpec::new(nodes::NOTIFY, WorkflowNode::Notify)
                .requires(&[InputKey::Artifact])
                .retry(settings.retry)
                .edge(Edge::always(Route::Finish(RunStatus::Succeeded))),
        ];

        if settings.ambiguity == AmbiguityPolicy::Suspend {
            specs.push(
                NodeSpec::new(nodes::CONFIRM_DIALECT, WorkflowNode::ApprovalGate)
                    .requires(&[InputKey::Classification])
                    .edge(Edge::when(
                        EdgeCondition::Approved,
                        Route::Next(NodeId::from(nodes::DELEGATE)),
                    )),
            );
        }
        if settings.require_review {
            specs.push(
                NodeSpec::new(nodes::REVIEW_CHANGE, WorkflowNode::ApprovalGate)
                    .requires(&[InputKey::Artifact])
                    .edge(Edge::when(
                        EdgeCondition::Approved,
                        Route::Next(NodeId::from(nodes::NOTIFY)),
                    )),
            );
        }

        Self::new(nodes::CLASSIFY, specs)
    }

    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    pub fn node(&self, id: &NodeId) -> Result<&NodeSpec, GraphError> {
        self.nodes.get(id).ok_or_else(|| GraphError::UnknownNode(id.clone()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(&NodeId::from(id))
    }

    /// First edge of `from` whose condition matches `signal`
    pub fn route(&self, from: &NodeId, signal: &EdgeSignal) -> Result<Route, GraphError> {
        self.node(from)?
            .edges
            .iter()
            .find(|edge| edge.when.matches(signal))
            .map(|edge| edge.to.clone())
            .ok_or_else(|| GraphError::NoRoute {
                node: from.clone(),
                signal: *signal,
            })
    }

    fn successors<'a>(&'a self, spec: &'a NodeSpec) -> impl Iterator<Item = &'a NodeId> + 'a {
        spec.edges.iter().filter_map(|edge| match &edge.to {
            Route::Next(next) => Some(next),
            Route::Finish(_) => None,
        })
    }

    pub fn is_reachable(&self, id: &NodeId) -> bool {
        self.reachable().contains(id)
    }

    fn reachable(&self) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![self.entry.clone()];
        while let Some(id) = pending.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(spec) = self.nodes.get(&id) {
                pending.extend(self.successors(spec).cloned());
            }
        }
        seen
    }

    fn validate(&self) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&self.entry) {
            return Err(GraphError::MissingEntry(self.entry.clone()));
        }

        for spec in self.nodes.values() {
            for next in self.successors(spec) {
                if !self.nodes.contains_key(next) {
                    return Err(GraphError::UnknownTarget {
                        from: spec.id.clone(),
                        to: next.clone(),
                    });
                }
            }
        }

        // Depth-first search with an explicit on-path set
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnPath,
            Done,
        }
        let mut marks: BTreeMap<&NodeId, Mark> = BTreeMap::new();
        for start in self.nodes.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut stack: Vec<(&NodeId, Vec<&NodeId>)> = Vec::new();
            marks.insert(start, Mark::OnPath);
            stack.push((start, self.successors(&self.nodes[start]).collect()));

            while let Some((id, children)) = stack.last_mut() {
                match children.pop() {
                    Some(child) => match marks.get(child) {
                        Some(Mark::OnPath) => return Err(GraphError::Cycle(child.clone())),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::OnPath);
                            let grandchildren = self.successors(&self.nodes[child]).collect();
                            stack.push((child, grandchildren));
                        }
                    },
                    None => {
                        marks.insert(*id, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }

        let reachable = self.reachable();
        if let Some(orphan) = self.nodes.keys().find(|id| !reachable.contains(*id)) {
            return Err(GraphError::Unreachable(orphan.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(id: &str) -> Route {
        Route::Next(NodeId::from(id))
    }

    #[test]
    fn test_standard_graph_routes_by_dialect() {
        let graph = WorkflowGraph::standard(&GraphSettings::default()).unwrap();
        let classify = NodeId::from(nodes::CLASSIFY);

        assert_eq!(
            graph.route(&classify, &EdgeSignal::Classified(Dialect::Terraform)).unwrap(),
            next(nodes::DELEGATE)
        );
        assert_eq!(
            graph.route(&classify, &EdgeSignal::Classified(Dialect::None)).unwrap(),
            Route::Finish(RunStatus::Skipped)
        );
        assert_eq!(
            graph.route(&classify, &EdgeSignal::Classified(Dialect::Ambiguous)).unwrap(),
            next(nodes::CONFIRM_DIALECT)
        );
        assert!(!graph.contains(nodes::REVIEW_CHANGE));
    }

    #[test]
    fn test_skip_policy_and_review_shape_the_graph() {
        let graph = WorkflowGraph::standard(&GraphSettings {
            ambiguity: AmbiguityPolicy::Skip,
            require_review: true,
            ..GraphSettings::default()
        })
        .unwrap();

        assert!(!graph.contains(nodes::CONFIRM_DIALECT));
        assert_eq!(
            graph
                .route(&NodeId::from(nodes::CLASSIFY), &EdgeSignal::Classified(Dialect::Ambiguous))
                .unwrap(),
            Route::Finish(RunStatus::Skipped)
        );
        assert_eq!(
            graph
                .route(&NodeId::from(nodes::AWAIT_DELEGATION), &EdgeSignal::Done)
                .unwrap(),
            next(nodes::REVIEW_CHANGE)
        );
        assert!(graph.is_reachable(&NodeId::from(nodes::REVIEW_CHANGE)));
    }

    #[test]
    fn test_gate_only_advances_on_approval() {
        let graph = WorkflowGraph::standard(&GraphSettings::default()).unwrap();
        let gate = NodeId::from(nodes::CONFIRM_DIALECT);
        assert!(matches!(
            graph.route(&gate, &EdgeSignal::Done),
            Err(GraphError::NoRoute { .. })
        ));
        assert_eq!(graph.route(&gate, &EdgeSignal::Approved).unwrap(), next(nodes::DELEGATE));
    }

    #[test]
    fn test_cycles_are_rejected() {
        let specs = vec![
            NodeSpec::new("a", WorkflowNode::Notify).edge(Edge::always(next("b"))),
            NodeSpec::new("b", WorkflowNode::Notify).edge(Edge::always(next("a"))),
        ];
        assert!(matches!(WorkflowGraph::new("a", specs), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_targets_and_orphans_are_rejected() {
        let dangling =
            vec![NodeSpec::new("a", WorkflowNode::Notify).edge(Edge::always(next("missing")))];
        assert!(matches!(
            WorkflowGraph::new("a", dangling),
            Err(GraphError::UnknownTarget { .. })
        ));

        let orphan = vec![
            NodeSpec::new("a", WorkflowNode::Notify)
                .edge(Edge::always(Route::Finish(RunStatus::Succeeded))),
            NodeSpec::new("b", WorkflowNode::Notify),
        ];
        assert_eq!(
            WorkflowGraph::new("a", orphan).unwrap_err(),
            GraphError::Unreachable(NodeId::from("b"))
        );
    }

    #[test]
    fn test_duplicate_and_missing_entry() {
        let duplicate = vec![
            NodeSpec::new("a", WorkflowNode::Notify),
            NodeSpec::new("a", WorkflowNode::Notify),
        ];
        assert!(matches!(
            WorkflowGraph::new("a", duplicate),
            Err(GraphError::DuplicateNode(_))
        ));
        assert!(matches!(
            WorkflowGraph::new("x", vec![NodeSpec::new("a", WorkflowNode::Notify)]),
            Err(GraphError::MissingEntry(_))
        ));
    }
}
