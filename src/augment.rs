//! Enrichment of a science graph into an execution-ready workflow graph.
//!
//! The augmenter walks a copy of the science graph once. File nodes are marked
//! as pure lineage (`ignore`). Every task node gets its executable, compute
//! site and resource profile resolved through a [`TaskConfig`], a work
//! descriptor holding just its unit of work, and a file node standing for that
//! descriptor.
//!
//! ## Init jobs
//!
//! When the configuration asks for it, the first job of every task label also
//! creates an init job and an init-output file. All jobs of the label depend
//! on that file, and the init job of each label depends on the init-output of
//! the label before it in pipeline order:
//!
//! ```text
//! descriptor(A) -> init(A) -> A_init -> job(A) ...
//!                               |
//!                               v
//! descriptor(B) -> init(B) -> B_init -> job(B) ...
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::codec::Format;
use crate::config::{
    ATTRIBUTE_PREFIX, INIT_LABEL, Lookup, SubmitConfig, TaskConfig, TaskKey, expand_placeholders,
};
use crate::error::{AugmentError, BuildError, ConfigError};
use crate::graph::{
    DataType, DepGraph, DisplayAttrs, FileNode, IdAllocator, JobSpec, Node, NodeId, TaskNode,
};
use crate::io::{Descriptor, as_overhead, write_descriptors};
use crate::plan::{Plan, TaskDefinition};
use crate::science::ScienceGraph;
use crate::workflow::WorkflowGraph;

/// Identifying metadata of a run, copied into job and run attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetadata {
    pub run: String,
    pub project: String,
    pub campaign: String,
    pub operator: String,
    pub payload: String,
    pub run_site: String,
}

impl RunMetadata {
    pub fn from_config(config: &SubmitConfig) -> Self {
        Self {
            run: config.workflow_name(),
            project: config.project.clone(),
            campaign: config.campaign.clone(),
            operator: config.operator.clone(),
            payload: config.payload_name.clone(),
            run_site: config.defaults.compute_site.clone().unwrap_or_default(),
        }
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("bps_isjob".into(), "True".into()),
            ("bps_project".into(), self.project.clone()),
            ("bps_campaign".into(), self.campaign.clone()),
            ("bps_run".into(), self.run.clone()),
            ("bps_operator".into(), self.operator.clone()),
            ("bps_payload".into(), self.payload.clone()),
            ("bps_runsite".into(), self.run_site.clone()),
        ])
    }
}

#[derive(Debug, Clone, Copy)]
struct InitNodes {
    task: NodeId,
    output: NodeId,
}

/// Turns a [`ScienceGraph`] into a [`WorkflowGraph`].
pub struct Augmenter<'a, C: TaskConfig + ?Sized> {
    config: &'a C,
    submit_root: Utf8PathBuf,
    run: RunMetadata,
    format: Format,
}

impl<'a, C: TaskConfig + ?Sized> Augmenter<'a, C> {
    pub fn new(config: &'a C, submit_root: impl Into<Utf8PathBuf>, run: RunMetadata) -> Self {
        Self {
            config,
            submit_root: submit_root.into(),
            run,
            format: Format::Native,
        }
    }

    /// Codec used for the work descriptors.
    pub fn descriptor_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Path of the work descriptor of a node.
    pub fn descriptor_path(&self, label: &str, id: NodeId) -> Utf8PathBuf {
        self.submit_root
            .join("input")
            .join(label)
            .join(self.descriptor_name(id))
    }

    fn descriptor_name(&self, id: NodeId) -> String {
        format!("quantum{}.{}", id, self.format.extension())
    }

    /// Augment `science` using its own pipeline order.
    pub fn augment(&self, science: &ScienceGraph) -> Result<WorkflowGraph, AugmentError> {
        self.augment_with(science, &science.pipeline)
    }

    pub fn augment_with(
        &self,
        science: &ScienceGraph,
        pipeline: &[String],
    ) -> Result<WorkflowGraph, AugmentError> {
        tracing::info!("creating workflow graph");
        let s = Instant::now();

        let pipeline = unique_labels(pipeline);

        let mut graph = science.graph.clone();
        let mut ids = IdAllocator::starting_after(graph.max_id());
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut init_nodes: HashMap<String, InitNodes> = HashMap::new();
        let mut descriptors = Vec::new();
        let run_init = self.config.run_init();

        for id in graph.ids() {
            let task = match graph.node_mut(id) {
                Some(Node::File(file)) => {
                    file.lfn = Some(id.to_string());
                    file.ignore = true;
                    file.data_type = Some(DataType::Science);
                    continue;
                }
                Some(Node::Task(task)) => task,
                None => continue,
            };

            let label = task.label.clone();
            *counts.entry(label.clone()).or_default() += 1;

            let quantum = task.quantum.clone().ok_or(BuildError::InvalidNodeType {
                id,
                expected: "task with a unit of work",
            })?;
            let definition = TaskDefinition::new(&label, &task.task_name, task.task_def_id);

            let qlfn = self.descriptor_name(id);
            self.resolve_job(&label, &label, &qlfn, &mut task.job)?;
            task.job
                .job_attrib
                .insert("bps_jobabbrev".into(), label.clone());

            let path = self.descriptor_path(&label, id);
            descriptors.push(Descriptor {
                path: path.clone(),
                plan: Plan::single(definition.clone(), quantum),
            });

            let descriptor = ids.next_id()?;
            graph.add_node(Node::File(FileNode {
                id: descriptor,
                title: qlfn.clone(),
                artifact: None,
                display: DisplayAttrs::file(),
                lfn: Some(qlfn.clone()),
                pfn: Some(path),
                ignore: false,
                data_type: Some(DataType::Quantum),
            }))?;
            graph.add_edge(descriptor, id)?;

            if run_init {
                let init = match init_nodes.get(&label).copied() {
                    Some(init) => init,
                    None => {
                        let init = self.add_init_job(&mut graph, &mut ids, &definition, &qlfn)?;
                        graph.add_edge(descriptor, init.task)?;
                        *counts.entry(label.clone()).or_default() += 1;
                        init_nodes.insert(label.clone(), init);
                        init
                    }
                };

                graph.add_edge(init.output, id)?;
            }
        }

        let task_counts = pipeline
            .iter()
            .map(|label| match counts.get(label) {
                Some(&count) => Ok((label.clone(), count)),
                None => Err(AugmentError::UnknownLabel(label.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !init_nodes.is_empty() {
            link_init_nodes(&mut graph, &pipeline, &init_nodes)?;
        }

        write_descriptors(&descriptors, self.format)?;

        let summary = task_counts
            .iter()
            .map(|(label, count)| format!("{label}:{count}"))
            .collect::<Vec<_>>()
            .join(";");

        let mut run_attrib = self.run.attributes();
        run_attrib.insert("bps_run_summary".into(), summary);

        tracing::info!(
            "workflow graph has {} nodes and {} edges {}",
            graph.node_count(),
            graph.edge_count(),
            as_overhead(s)
        );

        Ok(WorkflowGraph {
            name: self.run.run.clone(),
            graph,
            pipeline,
            task_counts,
            run_attrib,
        })
    }

    /// Resolve executable, compute site and resources of a job.
    ///
    /// `lookup_label` selects the configuration section, `label` is the task
    /// the job belongs to and is exposed to placeholders as `{label}`.
    fn resolve_job(
        &self,
        lookup_label: &str,
        label: &str,
        qlfn: &str,
        job: &mut JobSpec,
    ) -> Result<(), AugmentError> {
        self.resolve_job_inner(lookup_label, label, qlfn, job)
            .map_err(|e| AugmentError::Config(label.to_string(), e))
    }

    fn resolve_job_inner(
        &self,
        lookup_label: &str,
        label: &str,
        qlfn: &str,
        job: &mut JobSpec,
    ) -> Result<(), ConfigError> {
        let vars = [("label", label), ("qlfn", qlfn)];

        let required = |key: TaskKey| -> Result<String, ConfigError> {
            self.config
                .lookup(lookup_label, key, Lookup::Required)?
                .map(|value| expand_placeholders(&value.to_string(), &vars))
                .ok_or_else(|| ConfigError::ConfigResolutionFailed {
                    label: lookup_label.to_string(),
                    key: key.name(),
                })
        };

        job.exec_name = Some(required(TaskKey::ExecutableName)?);
        job.exec_args = Some(required(TaskKey::ExecutableArgs)?);
        let site = required(TaskKey::ComputeSite)?;

        let mut profile = BTreeMap::new();
        let mut attribs = BTreeMap::new();

        for (key, value) in self.config.scheduler_profile(&site)? {
            match key.strip_prefix(ATTRIBUTE_PREFIX).map(str::to_string) {
                Some(attribute) => attribs.insert(attribute, value),
                None => profile.insert(key, value),
            };
        }

        let memory = self
            .config
            .lookup(lookup_label, TaskKey::RequestMemory, Lookup::Optional)?;
        if let Some(value) = memory {
            profile.insert("request_memory".into(), value);
        }

        let cpus = self
            .config
            .lookup(lookup_label, TaskKey::RequestCpus, Lookup::Optional)?;
        if let Some(value) = cpus {
            profile.insert("request_cpus".into(), value);
        }

        job.compute_site = Some(site);
        job.profile = (!profile.is_empty()).then_some(profile);
        job.attribs = (!attribs.is_empty()).then_some(attribs);

        Ok(())
    }

    fn add_init_job(
        &self,
        graph: &mut DepGraph,
        ids: &mut IdAllocator,
        definition: &TaskDefinition,
        qlfn: &str,
    ) -> Result<InitNodes, AugmentError> {
        let label = &definition.label;
        tracing::info!("creating init task: {}", label);

        let marker = DataType::InitOutput(label.clone());
        let name = marker.to_string();

        let mut job = JobSpec {
            job_attrib: self.run.attributes(),
            ..Default::default()
        };
        job.job_attrib
            .insert("bps_jobabbrev".into(), label.clone());
        self.resolve_job(INIT_LABEL, label, qlfn, &mut job)?;

        let task = ids.next_id()?;
        graph.add_node(Node::Task(TaskNode {
            id: task,
            task_def_id: definition.position,
            label: label.clone(),
            task_name: definition.task_name.clone(),
            title: name.clone(),
            quantum: None,
            display: DisplayAttrs::task(),
            job,
        }))?;

        let output = ids.next_id()?;
        graph.add_node(Node::File(FileNode {
            id: output,
            title: name.clone(),
            artifact: None,
            display: DisplayAttrs::file(),
            lfn: Some(name),
            pfn: None,
            ignore: true,
            data_type: Some(marker),
        }))?;
        graph.add_edge(task, output)?;

        Ok(InitNodes { task, output })
    }
}

/// Labels in first-seen order, repeats dropped.
fn unique_labels(pipeline: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    pipeline
        .iter()
        .filter(|label| seen.insert(label.as_str()))
        .cloned()
        .collect()
}

/// Make the init job of every label wait for the init job of the previous
/// label in pipeline order.
fn link_init_nodes(
    graph: &mut DepGraph,
    pipeline: &[String],
    init_nodes: &HashMap<String, InitNodes>,
) -> Result<(), AugmentError> {
    let get = |label: &String| {
        init_nodes
            .get(label)
            .ok_or_else(|| AugmentError::UnknownLabel(label.clone()))
    };

    for pair in pipeline.windows(2) {
        let prev = get(&pair[0])?;
        let curr = get(&pair[1])?;

        let kinds = (graph.node(prev.output), graph.node(curr.task));
        if let (Some(output), Some(task)) = kinds {
            output.as_file()?;
            task.as_task()?;
        }

        graph.add_edge(prev.output, curr.task)?;
    }

    Ok(())
}

/// Augment with the stock configuration.
pub fn augment(
    science: &ScienceGraph,
    config: &SubmitConfig,
    submit_root: &Utf8Path,
) -> Result<WorkflowGraph, AugmentError> {
    Augmenter::new(config, submit_root, RunMetadata::from_config(config))
        .descriptor_format(config.descriptor_format)
        .augment(science)
}
