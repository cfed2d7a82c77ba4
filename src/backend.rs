//! Submission backends.
//!
//! A [`Backend`] turns a [`GenericWorkflow`] into something a workflow engine
//! can run, returning a [`Workflow`] handle. Backends are looked up by name in
//! a [`BackendRegistry`]; the configuration selects one with
//! `workflowEngine`.

use std::collections::BTreeMap;

use anyhow::Context;
use camino::Utf8PathBuf;

use crate::codec::Format;
use crate::config::SubmitConfig;
use crate::error::BackendError;
use crate::generic::GenericWorkflow;

/// Name of the backend used when none is configured.
pub const DEFAULT_ENGINE: &str = "dry-run";

/// An engine-specific workflow ready to be submitted.
pub trait Workflow {
    fn submit(&mut self) -> anyhow::Result<()>;

    /// Engine identifier of the run, known once submitted.
    fn id(&self) -> Option<String>;
}

pub trait Backend: Send + Sync {
    fn implement(
        &self,
        workflow: &GenericWorkflow,
        config: &SubmitConfig,
    ) -> anyhow::Result<Box<dyn Workflow>>;
}

/// Named collection of backends.
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// A registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_ENGINE, DryRunBackend);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: impl Backend + 'static,
    ) -> &mut Self {
        self.backends.insert(name.into(), Box::new(backend));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Result<&dyn Backend, BackendError> {
        self.backends
            .get(name)
            .map(|backend| &**backend)
            .ok_or_else(|| BackendError::UnknownEngine(name.to_string()))
    }

    /// Implement `workflow` with the backend called `name`.
    pub fn create(
        &self,
        name: &str,
        workflow: &GenericWorkflow,
        config: &SubmitConfig,
    ) -> Result<Box<dyn Workflow>, BackendError> {
        tracing::info!("implementing workflow with '{}' backend", name);

        self.get(name)?
            .implement(workflow, config)
            .map_err(|e| BackendError::Implement(name.to_string(), e))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Backend that only writes the generic workflow to the submit directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBackend;

impl Backend for DryRunBackend {
    fn implement(
        &self,
        workflow: &GenericWorkflow,
        config: &SubmitConfig,
    ) -> anyhow::Result<Box<dyn Workflow>> {
        let path = config
            .submit_path
            .join(format!("{}.{}", workflow.name(), Format::Native.extension()));

        Ok(Box::new(DryRunWorkflow {
            workflow: workflow.clone(),
            path,
            id: None,
        }))
    }
}

pub struct DryRunWorkflow {
    workflow: GenericWorkflow,
    path: Utf8PathBuf,
    id: Option<String>,
}

impl Workflow for DryRunWorkflow {
    fn submit(&mut self) -> anyhow::Result<()> {
        Format::Native
            .write_file(&self.path, &self.workflow)
            .with_context(|| format!("failed to write workflow to {}", self.path))?;

        tracing::info!(
            "dry run: {} jobs written to {}",
            self.workflow.number_of_jobs(),
            self.path
        );

        self.id = Some(self.path.to_string());
        Ok(())
    }

    fn id(&self) -> Option<String> {
        self.id.clone()
    }
}
