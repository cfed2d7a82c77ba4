use camino::Utf8PathBuf;
use thiserror::Error;

use crate::graph::NodeId;

/// Serialization failures shared by every codec in the crate.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Couldn't encode as CBOR.\n{0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Couldn't decode CBOR.\n{0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("Couldn't encode or decode JSON.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Couldn't parse TOML.\n{0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Plan '{0}' contains no units of work")]
    EmptyPlan(Utf8PathBuf),

    #[error("Couldn't read plan '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't decode plan '{0}'.\n{1}")]
    Decode(Utf8PathBuf, CodecError),

    #[error("Couldn't write plan '{0}'.\n{1}")]
    Encode(Utf8PathBuf, CodecError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required key '{key}' not found for task '{label}'")]
    ConfigResolutionFailed { label: String, key: &'static str },

    #[error("Compute site '{0}' is not defined")]
    UnknownSite(String),

    #[error("Couldn't read configuration '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse configuration '{0}'.\n{1}")]
    Parse(Utf8PathBuf, CodecError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Node {0} already exists in graph")]
    DuplicateNode(NodeId),

    #[error("Edge {from} -> {to} references unknown node")]
    DanglingEdge { from: NodeId, to: NodeId },

    #[error("Node {id} has invalid type, expected {expected}")]
    InvalidNodeType { id: NodeId, expected: &'static str },

    #[error("Node identifier space exhausted after {0} nodes")]
    IdOverflow(u64),
}

#[derive(Debug, Error)]
pub enum AugmentError {
    #[error(transparent)]
    Graph(#[from] BuildError),

    #[error("Task '{0}':\n{1}")]
    Config(String, ConfigError),

    #[error("Couldn't persist work descriptor '{0}'.\n{1}")]
    PersistenceFailed(Utf8PathBuf, CodecError),

    #[error("Task '{0}' from the pipeline order has no jobs in the graph")]
    UnknownLabel(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Job '{0}' already exists in workflow")]
    DuplicateJob(String),

    #[error("Job '{0}' not found in workflow")]
    JobNotFound(String),

    #[error("Unsupported serialization format '{0}'")]
    UnsupportedFormat(String),

    #[error("Couldn't serialize workflow.\n{0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Neither a plan file nor a plan generator is configured")]
    NoSource,

    #[error("Plan generator command has unbalanced quotes: {0}")]
    UnbalancedQuotes(String),

    #[error("Plan generator command is empty")]
    EmptyCommand,

    #[error("Couldn't run plan generator '{0}'.\n{1}")]
    Spawn(String, std::io::Error),

    #[error("Plan generator exited with {code:?}, see log '{log}'")]
    ExternalToolFailed { code: Option<i32>, log: Utf8PathBuf },
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Workflow engine '{0}' is not registered")]
    UnknownEngine(String),

    #[error("Workflow engine '{0}':\n{1}")]
    Implement(String, anyhow::Error),

    #[error("Couldn't submit workflow.\n{0}")]
    Submit(anyhow::Error),

    #[error("No workflow has been implemented yet")]
    NotImplemented,
}

/// Top-level failure of a submission attempt, tagged with the stage that
/// failed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Error while preparing the submit directory.\n{0}")]
    Prepare(std::io::Error),

    #[error("Error while generating the plan.\n{0}")]
    Generate(#[from] GenerateError),

    #[error("Error while reading the plan.\n{0}")]
    Plan(#[from] PlanError),

    #[error("Error while building the science graph.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while augmenting the workflow graph.\n{0}")]
    Augment(#[from] AugmentError),

    #[error("Error while serializing the workflow.\n{0}")]
    Workflow(#[from] WorkflowError),

    #[error("Error in submission backend.\n{0}")]
    Backend(#[from] BackendError),
}
