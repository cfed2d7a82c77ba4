//! Conversion of a [`Plan`] into an explicit dependency graph.
//!
//! Every unit of work becomes a [`TaskNode`], every distinct data artifact a
//! [`FileNode`]. Artifacts are deduplicated on their `(type, coordinate)` pair,
//! so an artifact written by one unit and read by others becomes a single node
//! with converging edges.

use std::collections::HashMap;

use crate::error::BuildError;
use crate::graph::{DepGraph, DisplayAttrs, FileNode, IdAllocator, JobSpec, Node, NodeId, TaskNode};
use crate::plan::{ArtifactRef, Plan};

/// Dependency graph of units of work and data artifacts.
#[derive(Debug, Clone)]
pub struct ScienceGraph {
    pub graph: DepGraph,
    /// Task labels in pipeline order.
    pub pipeline: Vec<String>,
}

impl ScienceGraph {
    pub fn task_nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.nodes().filter_map(|node| match node {
            Node::Task(task) => Some(task),
            Node::File(_) => None,
        })
    }

    pub fn file_nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.graph.nodes().filter_map(|node| match node {
            Node::File(file) => Some(file),
            Node::Task(_) => None,
        })
    }
}

/// Builds a [`ScienceGraph`] from a plan.
///
/// Identifiers are drawn from a counter owned by the builder, in discovery
/// order: each task node is numbered before the not yet seen artifacts it
/// reads and writes.
#[derive(Debug, Default)]
pub struct ScienceGraphBuilder {
    ids: IdAllocator,
    pipeline: Option<Vec<String>>,
}

impl ScienceGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit pipeline order instead of the order tasks appear in
    /// the plan.
    pub fn pipeline_order(mut self, order: Option<Vec<String>>) -> Self {
        self.pipeline = order;
        self
    }

    pub fn build(mut self, plan: Plan) -> Result<ScienceGraph, BuildError> {
        tracing::info!("creating explicit science graph");

        let mut graph = DepGraph::new();
        let mut artifacts: HashMap<ArtifactRef, NodeId> = HashMap::new();
        let mut labels: Vec<String> = Vec::new();
        let mut task_count = 0;

        for (task_def_id, group) in plan.tasks.into_iter().enumerate() {
            let task = group.task;
            tracing::debug!("task {} label={} name={}", task_def_id, task.label, task.task_name);

            if !labels.contains(&task.label) {
                labels.push(task.label.clone());
            }

            for quantum in group.quanta {
                let id = self.ids.next_id()?;
                task_count += 1;

                let inputs: Vec<ArtifactRef> = quantum.inputs.values().flatten().cloned().collect();
                let outputs: Vec<ArtifactRef> = quantum.outputs.values().flatten().cloned().collect();

                graph.add_node(Node::Task(TaskNode {
                    id,
                    task_def_id,
                    label: task.label.clone(),
                    task_name: task.task_name.clone(),
                    title: short_task_name(&task.task_name),
                    quantum: Some(quantum),
                    display: DisplayAttrs::task(),
                    job: JobSpec::default(),
                }))?;

                for artifact in inputs {
                    let file = self.file_node(&mut graph, &mut artifacts, artifact)?;
                    graph.add_edge(file, id)?;
                }

                for artifact in outputs {
                    let file = self.file_node(&mut graph, &mut artifacts, artifact)?;
                    graph.add_edge(id, file)?;
                }
            }
        }

        tracing::info!(
            "number of science graph nodes: tasks={} files={}",
            task_count,
            artifacts.len()
        );

        let pipeline = self.pipeline.unwrap_or(labels);

        Ok(ScienceGraph { graph, pipeline })
    }

    /// Node of an artifact, created on first sight.
    fn file_node(
        &mut self,
        graph: &mut DepGraph,
        artifacts: &mut HashMap<ArtifactRef, NodeId>,
        artifact: ArtifactRef,
    ) -> Result<NodeId, BuildError> {
        if let Some(&id) = artifacts.get(&artifact) {
            return Ok(id);
        }

        let id = self.ids.next_id()?;
        artifacts.insert(artifact.clone(), id);
        graph.add_node(Node::File(FileNode::artifact(id, artifact)))?;

        Ok(id)
    }
}

/// Last two dotted components of a fully qualified task name.
fn short_task_name(task_name: &str) -> String {
    let parts: Vec<&str> = task_name.split('.').collect();
    let skip = parts.len().saturating_sub(2);
    parts[skip..].join(".")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::plan::{Coordinate, Quantum, TaskDefinition};

    fn artifact(kind: &str, visit: u32) -> ArtifactRef {
        ArtifactRef::new(kind, Coordinate::new().with("visit", visit))
    }

    /// isr: raw -> postISR (x2 visits), calibrate: postISR -> calexp,
    /// coadd: calexp (both visits) -> deep.
    fn plan() -> Plan {
        Plan::new()
            .add_task(
                TaskDefinition::new("isr", "lsst.ip.isr.IsrTask", 0),
                vec![
                    Quantum::new("isr-1")
                        .input(artifact("raw", 1))
                        .input(artifact("bias", 0))
                        .output(artifact("postISR", 1)),
                    Quantum::new("isr-2")
                        .input(artifact("raw", 2))
                        .input(artifact("bias", 0))
                        .output(artifact("postISR", 2)),
                ],
            )
            .add_task(
                TaskDefinition::new("calibrate", "lsst.pipe.tasks.CalibrateTask", 1),
                vec![
                    Quantum::new("cal-1")
                        .input(artifact("postISR", 1))
                        .output(artifact("calexp", 1)),
                    Quantum::new("cal-2")
                        .input(artifact("postISR", 2))
                        .output(artifact("calexp", 2)),
                ],
            )
            .add_task(
                TaskDefinition::new("coadd", "CoaddTask", 2),
                vec![
                    Quantum::new("coadd-0")
                        .input(artifact("calexp", 1))
                        .input(artifact("calexp", 2))
                        .output(artifact("deep", 0)),
                ],
            )
    }

    #[test]
    fn test_artifacts_are_deduplicated() {
        let sci = ScienceGraphBuilder::new().build(plan()).unwrap();

        let distinct: HashSet<_> = plan()
            .tasks
            .iter()
            .flat_map(|t| &t.quanta)
            .flat_map(|q| q.inputs.values().chain(q.outputs.values()))
            .flatten()
            .cloned()
            .collect();

        assert_eq!(sci.file_nodes().count(), distinct.len());
        assert_eq!(sci.file_nodes().count(), 8);
        assert_eq!(sci.task_nodes().count(), 5);

        let bias: Vec<_> = sci
            .file_nodes()
            .filter(|f| f.artifact.as_ref().unwrap().dataset_type == "bias")
            .collect();
        assert_eq!(bias.len(), 1);
        assert_eq!(sci.graph.children(bias[0].id).len(), 2);
    }

    #[test]
    fn test_ids_follow_discovery_order() {
        let sci = ScienceGraphBuilder::new().build(plan()).unwrap();
        let ids: Vec<String> = sci.graph.ids().iter().map(ToString::to_string).collect();

        // isr-1, bias (sorted before raw), raw-1, postISR-1, isr-2, raw-2, ...
        assert_eq!(ids[..5], ["000001", "000002", "000003", "000004", "000005"]);

        let first = sci.graph.node(NodeId::new(1)).unwrap().as_task().unwrap();
        assert_eq!(first.quantum.as_ref().unwrap().id, "isr-1");
        assert_eq!(first.title, "isr.IsrTask");

        let second = sci.graph.node(NodeId::new(2)).unwrap().as_file().unwrap();
        assert_eq!(second.artifact.as_ref().unwrap().dataset_type, "bias");
    }

    #[test]
    fn test_edges_and_convergence() {
        let sci = ScienceGraphBuilder::new().build(plan()).unwrap();
        let graph = &sci.graph;

        for (from, to) in graph.edges() {
            assert!(graph.contains(from) && graph.contains(to));
            let kinds = (graph.node(from).unwrap(), graph.node(to).unwrap());
            assert!(matches!(
                kinds,
                (Node::File(_), Node::Task(_)) | (Node::Task(_), Node::File(_))
            ));
        }

        let post_isr = sci
            .file_nodes()
            .find(|f| f.artifact.as_ref() == Some(&artifact("postISR", 1)))
            .unwrap();
        assert_eq!(graph.parents(post_isr.id).len(), 1);
        assert_eq!(graph.children(post_isr.id).len(), 1);
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_pipeline_from_plan() {
        let sci = ScienceGraphBuilder::new().build(plan()).unwrap();
        assert_eq!(sci.pipeline, vec!["isr", "calibrate", "coadd"]);
    }

    #[test]
    fn test_explicit_pipeline_wins() {
        let order = vec!["coadd".to_string(), "isr".to_string()];
        let sci = ScienceGraphBuilder::new()
            .pipeline_order(Some(order.clone()))
            .build(plan())
            .unwrap();
        assert_eq!(sci.pipeline, order);
    }

    #[test]
    fn test_builders_are_independent() {
        let a = ScienceGraphBuilder::new().build(plan()).unwrap();
        let b = ScienceGraphBuilder::new().build(plan()).unwrap();
        assert_eq!(a.graph.ids(), b.graph.ids());
    }

    #[test]
    fn test_short_task_name() {
        assert_eq!(short_task_name("a.b.c.Task"), "c.Task");
        assert_eq!(short_task_name("Task"), "Task");
    }
}
