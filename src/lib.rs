#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod augment;
mod backend;
mod codec;
mod config;
mod error;
mod generator;
mod generic;
mod graph;
mod io;
mod plan;
mod science;
mod submit;
mod workflow;

pub use crate::augment::{Augmenter, RunMetadata, augment};
pub use crate::backend::{Backend, BackendRegistry, DEFAULT_ENGINE, DryRunBackend, Workflow};
pub use crate::codec::Format;
pub use crate::config::{
    ATTRIBUTE_PREFIX, INIT_LABEL, Lookup, PipelineOrder, Scalar, SiteSettings, SubmitConfig,
    TaskConfig, TaskKey, TaskSettings, expand_placeholders,
};
pub use crate::error::*;
pub use crate::generator::PlanGenerator;
pub use crate::generic::{GenericFile, GenericWorkflow, GenericWorkflowJob, JobNames};
pub use crate::graph::{
    DataType, DepGraph, DisplayAttrs, FileNode, ID_WIDTH, IdAllocator, JobSpec, Node, NodeId,
    TaskNode, pretty_artifact_label,
};
#[cfg(feature = "logging")]
pub use crate::io::init_logging;
pub use crate::plan::{ArtifactMap, ArtifactRef, Coordinate, Plan, Quantum, TaskDefinition, TaskQuanta};
pub use crate::science::{ScienceGraph, ScienceGraphBuilder};
pub use crate::submit::{GENERATION_LOG, Submission};
pub use crate::workflow::WorkflowGraph;
