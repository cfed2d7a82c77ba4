//! The execution plan produced by the external planner.
//!
//! A [`Plan`] is an ordered sequence of tasks, each with the units of work
//! ([`Quantum`]) that have to run for it. Units reference the data artifacts
//! they read and write through [`ArtifactRef`]s.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::error::PlanError;

/// Opaque, comparable data coordinate of an artifact (e.g. `visit: 12`).
///
/// Keys are kept sorted so two coordinates built in a different order still
/// compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coordinate(BTreeMap<String, String>);

impl Coordinate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Coordinate
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// Reference to a single data artifact. Equal references denote the same
/// artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub dataset_type: String,
    pub coordinate: Coordinate,
}

impl ArtifactRef {
    pub fn new(dataset_type: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            dataset_type: dataset_type.into(),
            coordinate,
        }
    }
}

impl Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.dataset_type, self.coordinate)
    }
}

/// Artifact references grouped by artifact type.
pub type ArtifactMap = BTreeMap<String, Vec<ArtifactRef>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique short name of the task within the pipeline.
    pub label: String,
    /// Fully qualified name of the code that runs the task.
    pub task_name: String,
    /// Position of the task in the pipeline.
    #[serde(default)]
    pub position: usize,
}

impl TaskDefinition {
    pub fn new(label: impl Into<String>, task_name: impl Into<String>, position: usize) -> Self {
        Self {
            label: label.into(),
            task_name: task_name.into(),
            position,
        }
    }
}

/// A single unit of work of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantum {
    pub id: String,
    #[serde(default)]
    pub inputs: ArtifactMap,
    #[serde(default)]
    pub outputs: ArtifactMap,
    #[serde(default)]
    pub init_inputs: ArtifactMap,
}

impl Quantum {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, artifact: ArtifactRef) -> Self {
        self.inputs
            .entry(artifact.dataset_type.clone())
            .or_default()
            .push(artifact);
        self
    }

    pub fn output(mut self, artifact: ArtifactRef) -> Self {
        self.outputs
            .entry(artifact.dataset_type.clone())
            .or_default()
            .push(artifact);
        self
    }

    pub fn init_input(mut self, artifact: ArtifactRef) -> Self {
        self.init_inputs
            .entry(artifact.dataset_type.clone())
            .or_default()
            .push(artifact);
        self
    }
}

/// A task together with all of its units of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuanta {
    pub task: TaskDefinition,
    pub quanta: Vec<Quantum>,
}

/// The execution plan: tasks in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<TaskQuanta>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(mut self, task: TaskDefinition, quanta: Vec<Quantum>) -> Self {
        self.tasks.push(TaskQuanta { task, quanta });
        self
    }

    /// A plan holding exactly one unit of work, used as a per-job work
    /// descriptor.
    pub fn single(task: TaskDefinition, quantum: Quantum) -> Self {
        Self {
            tasks: vec![TaskQuanta {
                task,
                quanta: vec![quantum],
            }],
        }
    }

    pub fn quantum_count(&self) -> usize {
        self.tasks.iter().map(|task| task.quanta.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.quantum_count() == 0
    }

    /// Read a plan, picking the codec from the file extension. A plan without
    /// any units of work is rejected.
    pub fn read(path: impl AsRef<Utf8Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PlanError::Io(path.to_owned(), e))?;

        let plan: Plan = Format::from_path(path)
            .decode(BufReader::new(file))
            .map_err(|e| PlanError::Decode(path.to_owned(), e))?;

        for (i, task) in plan.tasks.iter().enumerate() {
            tracing::debug!("task {} ({}) has {} quanta", i, task.task.label, task.quanta.len());
        }

        let count = plan.quantum_count();
        tracing::debug!("total number of quanta = {}", count);

        if count == 0 {
            return Err(PlanError::EmptyPlan(path.to_owned()));
        }

        Ok(plan)
    }

    pub fn write(&self, path: impl AsRef<Utf8Path>, format: Format) -> Result<(), PlanError> {
        let path = path.as_ref();
        format
            .write_file(path, self)
            .map_err(|e| PlanError::Encode(path.to_owned(), e))
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn tmp() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_coordinate_order_independent() {
        let a = Coordinate::new().with("visit", 1).with("detector", 9);
        let b = Coordinate::new().with("detector", 9).with("visit", 1);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{detector: 9, visit: 1}");
    }

    #[test]
    fn test_artifact_display() {
        let artifact = ArtifactRef::new("raw", Coordinate::new().with("visit", 3));
        assert_eq!(artifact.to_string(), "raw+{visit: 3}");
    }

    #[test]
    fn test_read_rejects_empty_plan() {
        let (_dir, root) = tmp();
        let path = root.join("empty.json");

        Plan::new()
            .add_task(TaskDefinition::new("isr", "pkg.IsrTask", 0), vec![])
            .write(&path, Format::Json)
            .unwrap();

        let err = Plan::read(&path).unwrap_err();
        assert!(matches!(err, PlanError::EmptyPlan(_)));
    }

    #[test]
    fn test_read_missing_file() {
        let (_dir, root) = tmp();
        let err = Plan::read(root.join("nope.cbor")).unwrap_err();
        assert!(matches!(err, PlanError::Io(..)));
    }

    #[test]
    fn test_read_garbage() {
        let (_dir, root) = tmp();
        let path = root.join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Plan::read(&path).unwrap_err();
        assert!(matches!(err, PlanError::Decode(..)));
    }

    #[test]
    fn test_read_native() {
        let (_dir, root) = tmp();
        let path = root.join("plan.cbor");
        let raw = ArtifactRef::new("raw", Coordinate::new().with("visit", 1));

        let plan = Plan::new().add_task(
            TaskDefinition::new("isr", "pkg.IsrTask", 0),
            vec![Quantum::new("q1").input(raw)],
        );
        plan.write(&path, Format::Native).unwrap();

        let back = Plan::read(&path).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.quantum_count(), 1);
    }
}
