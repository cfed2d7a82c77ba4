//! The engine-agnostic workflow handed to submission backends.
//!
//! A [`GenericWorkflow`] is a DAG of uniquely named [`GenericWorkflowJob`]s.
//! Jobs are compared by value: two jobs built independently with the same
//! name and the same attributes are equal.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use camino::Utf8PathBuf;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::config::Scalar;
use crate::error::WorkflowError;

/// A file consumed or produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericFile {
    pub name: String,
    pub path: Option<Utf8PathBuf>,
    /// Whether the backend has to stage this file.
    pub staged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericWorkflowJob {
    pub name: String,
    pub label: Option<String>,
    pub executable: Option<String>,
    pub arguments: Option<String>,
    pub compute_site: Option<String>,
    #[serde(default)]
    pub profile: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub attribs: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub job_attrib: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<GenericFile>,
    #[serde(default)]
    pub outputs: Vec<GenericFile>,
}

impl GenericWorkflowJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One side of a job relationship: nothing, one job, or several jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNames {
    Empty,
    One(String),
    Many(Vec<String>),
}

impl JobNames {
    fn as_slice(&self) -> &[String] {
        match self {
            JobNames::Empty => &[],
            JobNames::One(name) => std::slice::from_ref(name),
            JobNames::Many(names) => names,
        }
    }
}

impl From<&str> for JobNames {
    fn from(value: &str) -> Self {
        JobNames::One(value.to_string())
    }
}

impl From<String> for JobNames {
    fn from(value: String) -> Self {
        JobNames::One(value)
    }
}

impl From<&String> for JobNames {
    fn from(value: &String) -> Self {
        JobNames::One(value.clone())
    }
}

impl From<Vec<String>> for JobNames {
    fn from(value: Vec<String>) -> Self {
        JobNames::Many(value)
    }
}

impl From<Vec<&str>> for JobNames {
    fn from(value: Vec<&str>) -> Self {
        JobNames::Many(value.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for JobNames {
    fn from(value: [&str; N]) -> Self {
        JobNames::Many(value.into_iter().map(String::from).collect())
    }
}

impl<T: Into<JobNames>> From<Option<T>> for JobNames {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(JobNames::Empty)
    }
}

/// A named DAG of jobs with run-level attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "WorkflowRepr", try_from = "WorkflowRepr")]
pub struct GenericWorkflow {
    name: String,
    graph: DiGraph<GenericWorkflowJob, ()>,
    index: HashMap<String, NodeIndex>,
    pub run_attrib: BTreeMap<String, String>,
}

impl GenericWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a job with no relationships. Fails if the name is taken.
    pub fn add_job(&mut self, job: GenericWorkflowJob) -> Result<(), WorkflowError> {
        if self.index.contains_key(&job.name) {
            return Err(WorkflowError::DuplicateJob(job.name));
        }

        let name = job.name.clone();
        let index = self.graph.add_node(job);
        self.index.insert(name, index);

        Ok(())
    }

    pub fn get_job(&self, name: &str) -> Result<&GenericWorkflowJob, WorkflowError> {
        self.index
            .get(name)
            .map(|&index| &self.graph[index])
            .ok_or_else(|| WorkflowError::JobNotFound(name.to_string()))
    }

    pub fn get_job_mut(&mut self, name: &str) -> Result<&mut GenericWorkflowJob, WorkflowError> {
        match self.index.get(name) {
            Some(&index) => Ok(&mut self.graph[index]),
            None => Err(WorkflowError::JobNotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Add an edge for every `(parent, child)` pair, parents outer. Either side
    /// may be empty, in which case nothing is added. All names must exist.
    pub fn add_job_relationships(
        &mut self,
        parents: impl Into<JobNames>,
        children: impl Into<JobNames>,
    ) -> Result<(), WorkflowError> {
        let parents = parents.into();
        let children = children.into();

        let parents = self.resolve(parents.as_slice())?;
        let children = self.resolve(children.as_slice())?;

        for &parent in &parents {
            for &child in &children {
                self.graph.update_edge(parent, child, ());
            }
        }

        Ok(())
    }

    fn resolve(&self, names: &[String]) -> Result<Vec<NodeIndex>, WorkflowError> {
        names
            .iter()
            .map(|name| {
                self.index
                    .get(name)
                    .copied()
                    .ok_or_else(|| WorkflowError::JobNotFound(name.clone()))
            })
            .collect()
    }

    /// Jobs in insertion order.
    pub fn jobs(&self) -> impl Iterator<Item = &GenericWorkflowJob> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs().map(|job| job.name.as_str()).collect()
    }

    /// Edges as `(parent, child)` names in insertion order.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| {
                (
                    self.graph[edge.source()].name.as_str(),
                    self.graph[edge.target()].name.as_str(),
                )
            })
            .collect()
    }

    pub fn parents(&self, name: &str) -> Result<Vec<&str>, WorkflowError> {
        self.neighbors(name, petgraph::Direction::Incoming)
    }

    pub fn children(&self, name: &str) -> Result<Vec<&str>, WorkflowError> {
        self.neighbors(name, petgraph::Direction::Outgoing)
    }

    fn neighbors(
        &self,
        name: &str,
        direction: petgraph::Direction,
    ) -> Result<Vec<&str>, WorkflowError> {
        let &index = self
            .index
            .get(name)
            .ok_or_else(|| WorkflowError::JobNotFound(name.to_string()))?;

        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        names.reverse();

        Ok(names)
    }

    pub fn number_of_jobs(&self) -> usize {
        self.graph.node_count()
    }

    pub fn number_of_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Structural equality up to node order, matching jobs by value.
    pub fn is_isomorphic(&self, other: &GenericWorkflow) -> bool {
        petgraph::algo::is_isomorphic_matching(
            &self.graph,
            &other.graph,
            |a, b| a == b,
            |_, _| true,
        )
    }

    pub fn save<W: Write>(&self, writer: W, format: Format) -> Result<(), WorkflowError> {
        format.encode(self, writer)?;
        Ok(())
    }

    pub fn load<R: Read>(reader: R, format: Format) -> Result<Self, WorkflowError> {
        Ok(format.decode(reader)?)
    }

    /// Like [`GenericWorkflow::save`], with the format given by name.
    pub fn save_as<W: Write>(&self, writer: W, format: &str) -> Result<(), WorkflowError> {
        self.save(writer, format.parse()?)
    }

    /// Like [`GenericWorkflow::load`], with the format given by name.
    pub fn load_as<R: Read>(reader: R, format: &str) -> Result<Self, WorkflowError> {
        Self::load(reader, format.parse()?)
    }
}

impl<'a> IntoIterator for &'a GenericWorkflow {
    type Item = &'a GenericWorkflowJob;
    type IntoIter = Box<dyn Iterator<Item = &'a GenericWorkflowJob> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.jobs())
    }
}

#[derive(Serialize, Deserialize)]
struct WorkflowRepr {
    name: String,
    jobs: Vec<GenericWorkflowJob>,
    edges: Vec<(String, String)>,
    run_attrib: BTreeMap<String, String>,
}

impl From<GenericWorkflow> for WorkflowRepr {
    fn from(value: GenericWorkflow) -> Self {
        let edges = value
            .edges()
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let (nodes, _) = value.graph.into_nodes_edges();

        Self {
            name: value.name,
            jobs: nodes.into_iter().map(|node| node.weight).collect(),
            edges,
            run_attrib: value.run_attrib,
        }
    }
}

impl TryFrom<WorkflowRepr> for GenericWorkflow {
    type Error = WorkflowError;

    fn try_from(value: WorkflowRepr) -> Result<Self, Self::Error> {
        let mut workflow = GenericWorkflow::new(value.name);
        workflow.run_attrib = value.run_attrib;

        for job in value.jobs {
            workflow.add_job(job)?;
        }

        for (parent, child) in value.edges {
            workflow.add_job_relationships(parent, child)?;
        }

        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn workflow(names: &[&str]) -> GenericWorkflow {
        let mut gwf = GenericWorkflow::new("mytest");
        for name in names {
            gwf.add_job(GenericWorkflowJob::new(*name)).unwrap();
        }
        gwf
    }

    #[test]
    fn test_job_equality_is_by_value() {
        let job1 = GenericWorkflowJob::new("job1");
        let job2 = GenericWorkflowJob::new("job1");
        assert_eq!(job1, job2);

        let mut job3 = GenericWorkflowJob::new("job1");
        job3.executable = Some("run".into());
        assert_ne!(job1, job3);
    }

    #[test]
    fn test_add_job_duplicate() {
        let mut gwf = workflow(&["job1"]);
        let err = gwf.add_job(GenericWorkflowJob::new("job1")).unwrap_err();

        assert!(matches!(err, WorkflowError::DuplicateJob(name) if name == "job1"));
        assert_eq!(gwf.number_of_jobs(), 1);
        assert_eq!(gwf.number_of_edges(), 0);
    }

    #[test]
    fn test_add_job_valid() {
        let gwf = workflow(&["job1"]);
        assert_eq!(gwf.number_of_jobs(), 1);
        assert_eq!(gwf.job_names(), vec!["job1"]);
        assert_eq!(gwf.get_job("job1").unwrap(), &GenericWorkflowJob::new("job1"));
    }

    #[test]
    fn test_get_job_mut_is_visible() {
        let mut gwf = workflow(&["job1"]);
        gwf.get_job_mut("job1").unwrap().label = Some("isr".into());
        assert_eq!(gwf.get_job("job1").unwrap().label.as_deref(), Some("isr"));
    }

    #[test]
    fn test_get_job_error() {
        let gwf = workflow(&["job1"]);
        let err = gwf.get_job("job_not_there").unwrap_err();
        assert!(matches!(err, WorkflowError::JobNotFound(_)));
    }

    #[test]
    fn test_relationships_single() {
        let mut gwf = workflow(&["job1", "job2"]);
        gwf.add_job_relationships("job1", "job2").unwrap();
        assert_eq!(gwf.edges(), vec![("job1", "job2")]);
    }

    #[test]
    fn test_relationships_multi_child() {
        let mut gwf = workflow(&["job1", "job2", "job3"]);
        gwf.add_job_relationships("job1", ["job2", "job3"]).unwrap();
        assert_eq!(gwf.edges(), vec![("job1", "job2"), ("job1", "job3")]);
    }

    #[test]
    fn test_relationships_multi_parent() {
        let mut gwf = workflow(&["job1", "job2", "job3"]);
        gwf.add_job_relationships(["job1", "job2"], "job3").unwrap();
        assert_eq!(gwf.edges(), vec![("job1", "job3"), ("job2", "job3")]);
    }

    #[test]
    fn test_relationships_cross_product() {
        let mut gwf = workflow(&["a", "b", "c", "d"]);
        gwf.add_job_relationships(["a", "b"], ["c", "d"]).unwrap();
        assert_eq!(
            gwf.edges(),
            vec![("a", "c"), ("a", "d"), ("b", "c"), ("b", "d")]
        );
        assert_eq!(gwf.parents("c").unwrap(), vec!["a", "b"]);
        assert_eq!(gwf.children("a").unwrap(), vec!["c", "d"]);
    }

    #[test]
    fn test_relationships_none() {
        let mut gwf = workflow(&["job1"]);
        gwf.add_job_relationships(JobNames::Empty, "job1").unwrap();
        assert!(gwf.edges().is_empty());
        gwf.add_job_relationships("job1", None::<&str>).unwrap();
        assert!(gwf.edges().is_empty());
    }

    #[test]
    fn test_relationships_unknown_job() {
        let mut gwf = workflow(&["job1", "job2"]);
        let err = gwf
            .add_job_relationships(["job1", "ghost"], "job2")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::JobNotFound(name) if name == "ghost"));
        assert!(gwf.edges().is_empty());
    }

    #[test]
    fn test_save_invalid_format() {
        let gwf = GenericWorkflow::new("mytest");
        let mut stream = Vec::new();
        let err = gwf.save_as(&mut stream, "badformat").unwrap_err();
        assert!(matches!(err, WorkflowError::UnsupportedFormat(_)));

        let err = GenericWorkflow::load_as(Cursor::new(Vec::new()), "badformat").unwrap_err();
        assert!(matches!(err, WorkflowError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_save_native_round_trip() {
        let mut gwf = workflow(&["job1", "job2"]);
        gwf.add_job_relationships("job1", "job2").unwrap();
        gwf.run_attrib.insert("bps_run".into(), "run1".into());

        let job = gwf.get_job_mut("job2").unwrap();
        job.profile.insert("request_memory".into(), Scalar::Int(2048));
        job.inputs.push(GenericFile {
            name: "quantum000002.cbor".into(),
            path: Some("submit/input/isr/quantum000002.cbor".into()),
            staged: true,
        });

        let mut stream = Vec::new();
        gwf.save_as(&mut stream, "native").unwrap();
        let gwf2 = GenericWorkflow::load(Cursor::new(stream), Format::Native).unwrap();

        assert!(gwf.is_isomorphic(&gwf2));
        assert_eq!(gwf2.name(), "mytest");
        assert_eq!(gwf2.run_attrib, gwf.run_attrib);
        assert_eq!(gwf2.edges(), gwf.edges());
        assert_eq!(gwf2.get_job("job2").unwrap(), gwf.get_job("job2").unwrap());
    }

    #[test]
    fn test_save_json_round_trip() {
        let mut gwf = workflow(&["a", "b", "c"]);
        gwf.add_job_relationships(["a", "b"], "c").unwrap();

        let mut stream = Vec::new();
        gwf.save(&mut stream, Format::Json).unwrap();
        let gwf2 = GenericWorkflow::load_as(Cursor::new(stream), "json").unwrap();

        assert!(gwf.is_isomorphic(&gwf2));
    }

    #[test]
    fn test_isomorphism_detects_payload_change() {
        let gwf = workflow(&["a", "b"]);
        let mut other = workflow(&["a", "b"]);
        other.get_job_mut("b").unwrap().label = Some("x".into());
        assert!(!gwf.is_isomorphic(&other));
    }
}
