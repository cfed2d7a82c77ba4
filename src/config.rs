//! Submission configuration and per-task configuration lookups.
//!
//! The augmenter never reads configuration files itself; it asks a
//! [`TaskConfig`] for values keyed by task label. [`SubmitConfig`] is the
//! stock implementation, loaded from TOML or JSON:
//!
//! ```toml
//! submitPath = "submit/run1"
//! workflowName = "run1"
//! computeSite = "local"
//! executableName = "runner"
//! executableArgs = "run --label {label} --qgraph {qlfn}"
//! runInit = true
//!
//! [task.isr]
//! requestMemory = 4096
//!
//! [site.local.schedulerProfile]
//! requirements = "Arch == x86_64"
//! "+JobFlavour" = "long"
//! ```
//!
//! Task sections override the top-level defaults. The reserved task label
//! [`INIT_LABEL`] configures the init jobs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::error::{CodecError, ConfigError};

/// Label under which init jobs look up their configuration.
pub const INIT_LABEL: &str = "init";

/// Prefix marking scheduler profile entries that are passed through as
/// scheduler attributes.
pub const ATTRIBUTE_PREFIX: char = '+';

/// A configuration value as it appears in TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Keys a task can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKey {
    ExecutableName,
    ExecutableArgs,
    ComputeSite,
    RequestMemory,
    RequestCpus,
}

impl TaskKey {
    pub fn name(self) -> &'static str {
        match self {
            TaskKey::ExecutableName => "executableName",
            TaskKey::ExecutableArgs => "executableArgs",
            TaskKey::ComputeSite => "computeSite",
            TaskKey::RequestMemory => "requestMemory",
            TaskKey::RequestCpus => "requestCpus",
        }
    }
}

/// Whether a missing value is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Required,
    Optional,
}

/// Configuration resolution capability, queried by task label.
pub trait TaskConfig {
    /// Resolve `key` for the task labelled `label`.
    ///
    /// Returns `Ok(None)` only for optional lookups.
    fn lookup(&self, label: &str, key: TaskKey, lookup: Lookup)
    -> Result<Option<Scalar>, ConfigError>;

    /// The scheduler profile of a compute site. Sites without a profile yield
    /// an empty map.
    fn scheduler_profile(&self, site: &str) -> Result<BTreeMap<String, Scalar>, ConfigError>;

    /// Whether every task gets an init job.
    fn run_init(&self) -> bool;
}

/// Values that can be set globally or per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSettings {
    pub executable_name: Option<String>,
    pub executable_args: Option<String>,
    pub compute_site: Option<String>,
    pub request_memory: Option<Scalar>,
    pub request_cpus: Option<Scalar>,
}

impl TaskSettings {
    fn get(&self, key: TaskKey) -> Option<Scalar> {
        match key {
            TaskKey::ExecutableName => self.executable_name.clone().map(Scalar::Str),
            TaskKey::ExecutableArgs => self.executable_args.clone().map(Scalar::Str),
            TaskKey::ComputeSite => self.compute_site.clone().map(Scalar::Str),
            TaskKey::RequestMemory => self.request_memory.clone(),
            TaskKey::RequestCpus => self.request_cpus.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    #[serde(default)]
    pub scheduler_profile: BTreeMap<String, Scalar>,
}

/// Explicit pipeline order, either a list or a comma separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineOrder {
    List(Vec<String>),
    Csv(String),
}

impl PipelineOrder {
    /// Trimmed, non-empty labels; a repeated label keeps its first position.
    pub fn labels(&self) -> Vec<String> {
        let labels: Vec<&str> = match self {
            PipelineOrder::List(list) => list.iter().map(String::as_str).collect(),
            PipelineOrder::Csv(csv) => csv.split(',').collect(),
        };

        let mut seen = HashSet::new();
        labels
            .into_iter()
            .map(str::trim)
            .filter(|label| !label.is_empty() && seen.insert(*label))
            .map(String::from)
            .collect()
    }
}

/// Run configuration of a single submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitConfig {
    /// Root directory for everything the submission writes.
    pub submit_path: Utf8PathBuf,
    pub workflow_name: Option<String>,
    /// Used to derive the workflow name when none is given.
    pub output_collection: Option<String>,

    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub campaign: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub payload_name: String,

    #[serde(default)]
    pub run_init: bool,
    #[serde(default)]
    pub save_wf_graph: bool,
    pub pipeline: Option<PipelineOrder>,

    /// Pre-generated plan to copy into the submit directory.
    pub plan_file: Option<Utf8PathBuf>,
    /// Command line generating the plan; receives `{plan}` as output path.
    pub plan_generator: Option<String>,

    /// Registered name of the submission backend.
    pub workflow_engine: Option<String>,
    #[serde(default)]
    pub descriptor_format: Format,

    #[serde(flatten)]
    pub defaults: TaskSettings,
    #[serde(default)]
    pub task: HashMap<String, TaskSettings>,
    #[serde(default)]
    pub site: HashMap<String, SiteSettings>,
}

impl SubmitConfig {
    /// Load a configuration file, TOML unless the extension says JSON.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e))?;

        match path.extension() {
            Some("json") => serde_json::from_str(&text).map_err(CodecError::from),
            _ => toml::from_str(&text).map_err(CodecError::from),
        }
        .map_err(|e| ConfigError::Parse(path.to_owned(), e))
    }

    pub fn workflow_name(&self) -> String {
        if let Some(name) = &self.workflow_name {
            return name.clone();
        }

        match &self.output_collection {
            Some(collection) => collection.replace('/', "_"),
            None => "workflow".to_string(),
        }
    }

    /// Explicit pipeline order, if configured.
    pub fn pipeline_order(&self) -> Option<Vec<String>> {
        self.pipeline.as_ref().map(PipelineOrder::labels)
    }
}

impl TaskConfig for SubmitConfig {
    fn lookup(
        &self,
        label: &str,
        key: TaskKey,
        lookup: Lookup,
    ) -> Result<Option<Scalar>, ConfigError> {
        let value = self
            .task
            .get(label)
            .and_then(|task| task.get(key))
            .or_else(|| self.defaults.get(key));

        match (value, lookup) {
            (None, Lookup::Required) => Err(ConfigError::ConfigResolutionFailed {
                label: label.to_string(),
                key: key.name(),
            }),
            (value, _) => Ok(value),
        }
    }

    fn scheduler_profile(&self, site: &str) -> Result<BTreeMap<String, Scalar>, ConfigError> {
        self.site
            .get(site)
            .map(|settings| settings.scheduler_profile.clone())
            .ok_or_else(|| ConfigError::UnknownSite(site.to_string()))
    }

    fn run_init(&self) -> bool {
        self.run_init
    }
}

/// Substitute `{name}` placeholders with their values. Unknown placeholders
/// are left untouched.
pub fn expand_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}
