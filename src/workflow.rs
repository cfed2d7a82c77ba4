use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::error::{CodecError, WorkflowError};
use crate::generic::{GenericFile, GenericWorkflow, GenericWorkflowJob};
use crate::graph::{DepGraph, FileNode, Node, NodeId, TaskNode};

/// Execution-ready graph produced by the augmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    pub graph: DepGraph,
    /// Task labels in pipeline order.
    pub pipeline: Vec<String>,
    /// Number of jobs per label, in pipeline order. Init jobs are included.
    pub task_counts: Vec<(String, usize)>,
    pub run_attrib: BTreeMap<String, String>,
}

impl WorkflowGraph {
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

    /// Dump the whole graph for debugging.
    pub fn save(&self, path: &Utf8Path, format: Format) -> Result<(), CodecError> {
        format.write_file(path, self)
    }

    pub fn load(path: &Utf8Path, format: Format) -> Result<Self, CodecError> {
        format.read_file(path)
    }

    /// Fold file nodes into their jobs and derive job to job dependencies.
    ///
    /// A job depends on another job when a file produced by the latter is
    /// consumed by the former.
    pub fn to_generic(&self) -> Result<GenericWorkflow, WorkflowError> {
        let mut workflow = GenericWorkflow::new(&self.name);
        workflow.run_attrib = self.run_attrib.clone();

        for task in self.task_nodes() {
            workflow.add_job(self.job(task))?;
        }

        for task in self.task_nodes() {
            for file in self.graph.parents(task.id) {
                let producers: Vec<String> = self
                    .graph
                    .parents(file)
                    .into_iter()
                    .filter(|&id| matches!(self.graph.node(id), Some(Node::Task(_))))
                    .map(|id| id.to_string())
                    .collect();

                workflow.add_job_relationships(producers, task.id.to_string())?;
            }
        }

        Ok(workflow)
    }

    fn job(&self, task: &TaskNode) -> GenericWorkflowJob {
        let files = |ids: Vec<NodeId>| -> Vec<GenericFile> {
            ids.into_iter()
                .filter_map(|id| match self.graph.node(id) {
                    Some(Node::File(file)) => Some(GenericFile {
                        name: file.lfn.clone().unwrap_or_else(|| id.to_string()),
                        path: file.pfn.clone(),
                        staged: !file.ignore,
                    }),
                    _ => None,
                })
                .collect()
        };

        GenericWorkflowJob {
            name: task.id.to_string(),
            label: Some(task.label.clone()),
            executable: task.job.exec_name.clone(),
            arguments: task.job.exec_args.clone(),
            compute_site: task.job.compute_site.clone(),
            profile: task.job.profile.clone().unwrap_or_default(),
            attribs: task.job.attribs.clone().unwrap_or_default(),
            job_attrib: task.job.job_attrib.clone(),
            inputs: files(self.graph.parents(task.id)),
            outputs: files(self.graph.children(task.id)),
        }
    }
}
