//! Node types and the indexed dependency graph shared by the science and
//! workflow graphs.
//!
//! Both graphs are heterogeneous DAGs over a closed, two-case [`Node`]: a
//! [`TaskNode`] wraps a single unit of work, a [`FileNode`] wraps a single data
//! artifact. The backing store is a `petgraph` graph plus an index from the
//! stable [`NodeId`] to the petgraph [`NodeIndex`], so callers never handle
//! raw indices.
//!
//! ## Identifiers
//!
//! Identifiers come from an [`IdAllocator`] owned by whoever builds the graph.
//! They are rendered as zero-padded decimal strings at least six digits wide.
//! Past `999999` the rendering simply grows wider instead of wrapping, so no
//! two nodes ever render to the same string.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use camino::Utf8PathBuf;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::config::Scalar;
use crate::error::BuildError;
use crate::plan::{ArtifactRef, Quantum};

/// Minimum number of digits in a rendered node identifier.
pub const ID_WIDTH: usize = 6;

/// Stable identifier of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0width$}", self.0, width = ID_WIDTH)
    }
}

/// Monotonic identifier source, local to one graph construction run.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    last: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after an existing identifier.
    pub fn starting_after(last: Option<NodeId>) -> Self {
        Self {
            last: last.map(NodeId::value).unwrap_or(0),
        }
    }

    pub fn next_id(&mut self) -> Result<NodeId, BuildError> {
        self.last = self
            .last
            .checked_add(1)
            .ok_or(BuildError::IdOverflow(self.last))?;
        Ok(NodeId(self.last))
    }

    /// Number of identifiers handed out so far.
    pub fn issued(&self) -> u64 {
        self.last
    }
}

/// Rendering hints carried along for graph exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayAttrs {
    pub shape: String,
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fillcolor: Option<String>,
}

impl DisplayAttrs {
    pub fn task() -> Self {
        Self {
            shape: "box".into(),
            style: "filled".into(),
            fillcolor: Some("gray".into()),
        }
    }

    pub fn file() -> Self {
        Self {
            shape: "box".into(),
            style: "rounded".into(),
            fillcolor: None,
        }
    }
}

/// Classification of the data a file node stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// A pipeline data product.
    Science,
    /// A serialized per-job work descriptor.
    Quantum,
    /// Marker output of a task's init job.
    InitOutput(String),
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Science => write!(f, "science"),
            DataType::Quantum => write!(f, "quantum"),
            DataType::InitOutput(label) => write!(f, "{label}_init"),
        }
    }
}

/// Execution metadata resolved for a task node during augmentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub exec_name: Option<String>,
    pub exec_args: Option<String>,
    pub compute_site: Option<String>,
    /// Engine-specific resource parameters, only set when non-empty.
    pub profile: Option<BTreeMap<String, Scalar>>,
    /// Scheduler attributes passed through verbatim, only set when non-empty.
    pub attribs: Option<BTreeMap<String, Scalar>>,
    pub job_attrib: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    /// Position of the owning task in the plan.
    pub task_def_id: usize,
    /// Label of the owning task.
    pub label: String,
    pub task_name: String,
    /// Short display name.
    pub title: String,
    /// The unit of work; `None` for init jobs.
    pub quantum: Option<Quantum>,
    pub display: DisplayAttrs,
    #[serde(default)]
    pub job: JobSpec,
}

impl TaskNode {
    pub fn is_init(&self) -> bool {
        self.quantum.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: NodeId,
    /// Multi-line display name.
    pub title: String,
    /// The data artifact; `None` for files introduced by augmentation.
    pub artifact: Option<ArtifactRef>,
    pub display: DisplayAttrs,
    /// Logical file name.
    pub lfn: Option<String>,
    /// Physical file name.
    pub pfn: Option<Utf8PathBuf>,
    /// True if the file needs no physical staging.
    #[serde(default)]
    pub ignore: bool,
    pub data_type: Option<DataType>,
}

impl FileNode {
    /// A file node standing for a pipeline data artifact.
    pub fn artifact(id: NodeId, artifact: ArtifactRef) -> Self {
        Self {
            id,
            title: pretty_artifact_label(&artifact.to_string()),
            artifact: Some(artifact),
            display: DisplayAttrs::file(),
            lfn: None,
            pfn: None,
            ignore: false,
            data_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum Node {
    Task(TaskNode),
    File(FileNode),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Task(task) => task.id,
            Node::File(file) => file.id,
        }
    }

    pub fn as_task(&self) -> Result<&TaskNode, BuildError> {
        match self {
            Node::Task(task) => Ok(task),
            Node::File(file) => Err(BuildError::InvalidNodeType {
                id: file.id,
                expected: "task",
            }),
        }
    }

    pub fn as_file(&self) -> Result<&FileNode, BuildError> {
        match self {
            Node::File(file) => Ok(file),
            Node::Task(task) => Err(BuildError::InvalidNodeType {
                id: task.id,
                expected: "file",
            }),
        }
    }

    pub fn as_task_mut(&mut self) -> Result<&mut TaskNode, BuildError> {
        match self {
            Node::Task(task) => Ok(task),
            Node::File(file) => Err(BuildError::InvalidNodeType {
                id: file.id,
                expected: "task",
            }),
        }
    }
}

/// Turn `type+{a: 1, b: 2}` into a compact multi-line label.
pub fn pretty_artifact_label(name: &str) -> String {
    name.replace(": ", "=")
        .replace(['+', ','], "\n")
        .replace(['{', '}'], "")
}

/// Directed graph of [`Node`]s addressed by [`NodeId`].
///
/// Nodes and edges iterate in insertion order. Edges between the same pair of
/// nodes are stored once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "GraphRepr", try_from = "GraphRepr")]
pub struct DepGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, BuildError> {
        let id = node.id();

        if self.index.contains_key(&id) {
            return Err(BuildError::DuplicateNode(id));
        }

        let index = self.graph.add_node(node);
        self.index.insert(id, index);

        Ok(id)
    }

    /// Add an edge `from -> to`. Both endpoints must already exist.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<(), BuildError> {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&a), Some(&b)) => {
                self.graph.update_edge(a, b, ());
                Ok(())
            }
            _ => Err(BuildError::DanglingEdge { from, to }),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.get(&id).map(|&index| &self.graph[index])
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.index.get(&id).map(|&index| &mut self.graph[index])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes().map(Node::id).collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (self.graph[edge.source()].id(), self.graph[edge.target()].id()))
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&index) = self.index.get(&id) else {
            return vec![];
        };

        // petgraph walks adjacency lists newest first
        let mut ids: Vec<_> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].id())
            .collect();
        ids.reverse();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Largest identifier present in the graph.
    pub fn max_id(&self) -> Option<NodeId> {
        self.index.keys().max().copied()
    }

    pub(crate) fn inner(&self) -> &DiGraph<Node, ()> {
        &self.graph
    }
}

/// Serialized form of a [`DepGraph`].
#[derive(Serialize, Deserialize)]
struct GraphRepr {
    nodes: Vec<Node>,
    edges: Vec<(NodeId, NodeId)>,
}

impl From<DepGraph> for GraphRepr {
    fn from(value: DepGraph) -> Self {
        let edges = value.edges().collect();
        let (nodes, _) = value.graph.into_nodes_edges();

        Self {
            nodes: nodes.into_iter().map(|node| node.weight).collect(),
            edges,
        }
    }
}

impl TryFrom<GraphRepr> for DepGraph {
    type Error = BuildError;

    fn try_from(value: GraphRepr) -> Result<Self, Self::Error> {
        let mut graph = DepGraph::new();

        for node in value.nodes {
            graph.add_node(node)?;
        }

        for (from, to) in value.edges {
            graph.add_edge(from, to)?;
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Coordinate;

    fn file(id: u64) -> Node {
        let artifact = ArtifactRef::new("raw", Coordinate::new().with("visit", id));
        Node::File(FileNode::artifact(NodeId::new(id), artifact))
    }

    #[test]
    fn test_node_id_padding() {
        assert_eq!(NodeId::new(7).to_string(), "000007");
        assert_eq!(NodeId::new(999_999).to_string(), "999999");
        assert_eq!(NodeId::new(1_000_000).to_string(), "1000000");
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_id().unwrap(), NodeId::new(1));
        assert_eq!(ids.next_id().unwrap(), NodeId::new(2));
        assert_eq!(ids.issued(), 2);

        let mut more = IdAllocator::starting_after(Some(NodeId::new(10)));
        assert_eq!(more.next_id().unwrap(), NodeId::new(11));
    }

    #[test]
    fn test_allocator_overflow() {
        let mut ids = IdAllocator::starting_after(Some(NodeId::new(u64::MAX)));
        assert!(matches!(ids.next_id(), Err(BuildError::IdOverflow(_))));
    }

    #[test]
    fn test_pretty_label() {
        assert_eq!(
            pretty_artifact_label("calexp+{detector: 4, visit: 12}"),
            "calexp\ndetector=4\n visit=12"
        );
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = DepGraph::new();
        graph.add_node(file(1)).unwrap();

        let err = graph.add_node(file(1)).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateNode(id) if id == NodeId::new(1)));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut graph = DepGraph::new();
        graph.add_node(file(1)).unwrap();

        let err = graph.add_edge(NodeId::new(1), NodeId::new(2)).unwrap_err();
        assert!(matches!(err, BuildError::DanglingEdge { .. }));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edges_are_deduplicated_and_ordered() {
        let mut graph = DepGraph::new();
        for id in 1..=3 {
            graph.add_node(file(id)).unwrap();
        }

        let (a, b, c) = (NodeId::new(1), NodeId::new(2), NodeId::new(3));
        graph.add_edge(a, c).unwrap();
        graph.add_edge(b, c).unwrap();
        graph.add_edge(a, c).unwrap();

        assert_eq!(graph.edges().collect::<Vec<_>>(), vec![(a, c), (b, c)]);
        assert_eq!(graph.parents(c), vec![a, b]);
        assert_eq!(graph.children(a), vec![c]);
    }

    #[test]
    fn test_wrong_variant_is_reported() {
        let node = file(5);
        let err = node.as_task().unwrap_err();
        assert!(matches!(err, BuildError::InvalidNodeType { expected: "task", .. }));
    }

    #[test]
    fn test_serde_keeps_topology() {
        let mut graph = DepGraph::new();
        for id in 1..=3 {
            graph.add_node(file(id)).unwrap();
        }
        graph.add_edge(NodeId::new(1), NodeId::new(3)).unwrap();
        graph.add_edge(NodeId::new(2), NodeId::new(3)).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: DepGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(back.ids(), graph.ids());
        assert_eq!(back.edges().collect::<Vec<_>>(), graph.edges().collect::<Vec<_>>());
        assert_eq!(back.node(NodeId::new(2)), graph.node(NodeId::new(2)));
    }
}
