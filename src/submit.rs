//! End-to-end submission: plan acquisition, graph construction,
//! augmentation and hand-off to a backend.

use std::borrow::Cow;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::augment::augment;
use crate::backend::{BackendRegistry, DEFAULT_ENGINE, Workflow};
use crate::config::{SubmitConfig, expand_placeholders};
use crate::error::{BackendError, GenerateError, SubmitError, WorkflowError};
use crate::generator::PlanGenerator;
use crate::generic::GenericWorkflow;
use crate::io::as_overhead;
use crate::plan::Plan;
use crate::science::ScienceGraphBuilder;
use crate::workflow::WorkflowGraph;

/// Name of the log capturing the plan generator output.
pub const GENERATION_LOG: &str = "quantumGraphGeneration.out";

/// A single submission rooted in its submit directory.
pub struct Submission {
    config: SubmitConfig,
    generic: Option<GenericWorkflow>,
    workflow: Option<Box<dyn Workflow>>,
}

impl Submission {
    pub fn new(config: SubmitConfig) -> Result<Self, SubmitError> {
        fs::create_dir_all(&config.submit_path).map_err(SubmitError::Prepare)?;
        tracing::info!("submit directory: {}", config.submit_path);

        Ok(Self {
            config,
            generic: None,
            workflow: None,
        })
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    pub fn root(&self) -> &Utf8Path {
        &self.config.submit_path
    }

    /// Make the plan available inside the submit directory and return its
    /// path.
    pub fn acquire_plan(&self) -> Result<Utf8PathBuf, SubmitError> {
        let root = self.root();

        if let Some(source) = &self.config.plan_file {
            let name = source
                .file_name()
                .map(String::from)
                .unwrap_or_else(|| self.default_plan_name());
            let target = root.join(name);

            if !same_file(source, &target) {
                fs::copy(source, &target).map_err(SubmitError::Prepare)?;
            }
            return Ok(target);
        }

        if let Some(command) = &self.config.plan_generator {
            let target = root.join(self.default_plan_name());
            let quoted = shlex::try_quote(target.as_str()).unwrap_or(Cow::Borrowed(target.as_str()));
            let command = expand_placeholders(command, &[("plan", quoted.as_ref())]);

            PlanGenerator::new(command, root.join(GENERATION_LOG)).run()?;
            return Ok(target);
        }

        Err(GenerateError::NoSource.into())
    }

    fn default_plan_name(&self) -> String {
        format!(
            "{}.{}",
            self.config.workflow_name(),
            self.config.descriptor_format.extension()
        )
    }

    /// Run every stage up to the generic workflow.
    pub fn prepare(&self) -> Result<(WorkflowGraph, GenericWorkflow), SubmitError> {
        let s = Instant::now();
        let path = self.acquire_plan()?;
        tracing::info!("acquired plan {}", as_overhead(s));

        let s = Instant::now();
        let plan = Plan::read(&path)?;
        tracing::info!("read plan {}", as_overhead(s));

        let s = Instant::now();
        let science = ScienceGraphBuilder::new()
            .pipeline_order(self.config.pipeline_order())
            .build(plan)?;
        tracing::info!("built science graph {}", as_overhead(s));

        let wf = augment(&science, &self.config, self.root())?;

        if self.config.save_wf_graph {
            let format = self.config.descriptor_format;
            let path = self.root().join(format!("wfgraph.{}", format.extension()));
            wf.save(&path, format).map_err(WorkflowError::from)?;
            tracing::debug!("saved workflow graph to {}", path);
        }

        let s = Instant::now();
        let generic = wf.to_generic()?;
        tracing::info!(
            "generic workflow has {} jobs {}",
            generic.number_of_jobs(),
            as_overhead(s)
        );

        Ok((wf, generic))
    }

    /// Prepare the workflow and implement it with the configured backend.
    pub fn create(&mut self, registry: &BackendRegistry) -> Result<&GenericWorkflow, SubmitError> {
        let (_, generic) = self.prepare()?;

        let engine = self
            .config
            .workflow_engine
            .as_deref()
            .unwrap_or(DEFAULT_ENGINE);

        let s = Instant::now();
        let workflow = registry.create(engine, &generic, &self.config)?;
        tracing::info!("implemented workflow {}", as_overhead(s));

        self.workflow = Some(workflow);
        let generic: &GenericWorkflow = self.generic.insert(generic);
        Ok(generic)
    }

    pub fn generic_workflow(&self) -> Option<&GenericWorkflow> {
        self.generic.as_ref()
    }

    pub fn submit(&mut self) -> Result<(), SubmitError> {
        let workflow = self
            .workflow
            .as_mut()
            .ok_or(BackendError::NotImplemented)?;

        workflow.submit().map_err(BackendError::Submit)?;
        tracing::info!("submitted run {}", workflow.id().unwrap_or_default());

        Ok(())
    }

    pub fn id(&self) -> Option<String> {
        self.workflow.as_ref().and_then(|workflow| workflow.id())
    }
}

/// Whether two paths resolve to the same existing file.
fn same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize_utf8(), b.canonicalize_utf8()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Format;
    use crate::config::{SiteSettings, TaskSettings};
    use crate::plan::{ArtifactRef, Coordinate, Quantum, TaskDefinition};

    fn plan() -> Plan {
        let raw = |v: u32| ArtifactRef::new("raw", Coordinate::new().with("visit", v));
        let calexp = |v: u32| ArtifactRef::new("calexp", Coordinate::new().with("visit", v));

        Plan::new()
            .add_task(
                TaskDefinition::new("isr", "pkg.IsrTask", 0),
                vec![
                    Quantum::new("i1").input(raw(1)).output(calexp(1)),
                    Quantum::new("i2").input(raw(2)).output(calexp(2)),
                ],
            )
            .add_task(
                TaskDefinition::new("coadd", "pkg.CoaddTask", 1),
                vec![
                    Quantum::new("c")
                        .input(calexp(1))
                        .input(calexp(2))
                        .output(ArtifactRef::new("coadd", Coordinate::new())),
                ],
            )
    }

    fn config(dir: &tempfile::TempDir) -> SubmitConfig {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let mut config = SubmitConfig {
            submit_path: root.join("submit"),
            workflow_name: Some("run1".into()),
            run_init: true,
            save_wf_graph: true,
            defaults: TaskSettings {
                executable_name: Some("runner".into()),
                executable_args: Some("{qlfn}".into()),
                compute_site: Some("local".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        config.site.insert("local".into(), SiteSettings::default());
        config
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);

        let source = config.submit_path.parent().unwrap().join("plan.json");
        plan().write(&source, Format::Json).unwrap();
        config.plan_file = Some(source);

        let mut submission = Submission::new(config).unwrap();
        let generic = submission
            .create(&BackendRegistry::with_defaults())
            .unwrap();

        // 3 jobs plus one init job per label
        assert_eq!(generic.number_of_jobs(), 5);
        assert!(generic.is_acyclic());
        assert_eq!(generic.run_attrib["bps_run_summary"], "isr:3;coadd:2");

        let root = submission.root().to_owned();
        assert!(root.join("plan.json").exists());
        assert!(root.join("wfgraph.cbor").exists());
        assert_eq!(fs::read_dir(root.join("input/isr")).unwrap().count(), 2);
        assert_eq!(fs::read_dir(root.join("input/coadd")).unwrap().count(), 1);

        assert_eq!(submission.id(), None);
        submission.submit().unwrap();
        assert!(submission.id().unwrap().ends_with("run1.cbor"));
    }

    #[test]
    fn test_plan_already_in_submit_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);

        let target = config.submit_path.join("plan.json");
        plan().write(&target, Format::Json).unwrap();
        let size = fs::metadata(&target).unwrap().len();

        // same file, spelled differently
        let source = config.submit_path.join("../submit/./plan.json");
        config.plan_file = Some(source);

        let submission = Submission::new(config).unwrap();
        let path = submission.acquire_plan().unwrap();

        assert_eq!(path, target);
        assert_eq!(fs::metadata(&target).unwrap().len(), size);
        assert_eq!(Plan::read(&path).unwrap(), plan());
    }

    #[test]
    fn test_submit_before_create() {
        let dir = tempfile::tempdir().unwrap();
        let mut submission = Submission::new(config(&dir)).unwrap();

        let err = submission.submit().unwrap_err();
        assert!(matches!(err, SubmitError::Backend(BackendError::NotImplemented)));
    }

    #[test]
    fn test_no_plan_source() {
        let dir = tempfile::tempdir().unwrap();
        let submission = Submission::new(config(&dir)).unwrap();

        let err = submission.acquire_plan().unwrap_err();
        assert!(matches!(err, SubmitError::Generate(GenerateError::NoSource)));
    }

    #[test]
    fn test_unknown_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);

        let source = config.submit_path.parent().unwrap().join("plan.cbor");
        plan().write(&source, Format::Native).unwrap();
        config.plan_file = Some(source);
        config.workflow_engine = Some("panda".into());

        let mut submission = Submission::new(config).unwrap();
        let err = submission
            .create(&BackendRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, SubmitError::Backend(BackendError::UnknownEngine(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_from_generator() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);

        let source = config.submit_path.parent().unwrap().join("generated.cbor");
        plan().write(&source, Format::Native).unwrap();
        config.plan_generator = Some(format!("cp {source} {{plan}}"));

        let submission = Submission::new(config).unwrap();
        let path = submission.acquire_plan().unwrap();

        assert_eq!(path, submission.root().join("run1.cbor"));
        assert_eq!(Plan::read(&path).unwrap(), plan());

        let log = fs::read_to_string(submission.root().join(GENERATION_LOG)).unwrap();
        assert!(log.starts_with("cp "));
    }
}
