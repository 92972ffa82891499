//! Task planning and assembly.
//!
//! A [`TaskStrategy`] turns a rule's sources into [`PendingTask`]s, one per
//! shard for per-file rules and exactly one for single-command rules. The
//! [`TaskBuilder`] then binds each task's outputs as labels, expands its
//! command, and produces the final [`Task`] handed to the executor.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SrcFile;
use crate::error::{ErrorKind, RuleError};
use crate::expand::{self, ExpandContext, Template};
use crate::label::LabelResolver;
use crate::sandbox::{self, SandboxMapper};
use crate::shard::{self, ShardAssignment};
use crate::shell::shell_quote;

/// A fully expanded command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique name of the task within its rule.
    pub name: String,
    /// User-visible description.
    pub description: String,
    /// Declared inputs: the task's sources, then the rule's tool dependencies.
    pub inputs: Vec<PathBuf>,
    /// Declared outputs; never empty.
    pub outputs: Vec<PathBuf>,
    /// Dependency file written by the command, if enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_file: Option<PathBuf>,
    /// Final locations of `outputs` when they have to be merged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copy_to: Vec<PathBuf>,
    /// Directory the command runs in, mapped to `__SBOX_OUT_DIR__`.
    pub sandbox_dir: PathBuf,
    /// The expanded command line.
    pub command: String,
    /// Shard position; `0` of `1` for unsharded tasks.
    pub shard_index: usize,
    /// Number of sibling shard tasks.
    pub shard_count: usize,
}

/// How a rule turns its sources into tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStrategy {
    /// One command per source file, grouped into shards.
    PerFile {
        /// Replaces each source's extension to name its output.
        output_extension: String,
        /// Maximum number of sources per task.
        shard_size: NonZeroUsize,
    },
    /// One command over all sources producing the listed outputs.
    Single {
        /// Output names relative to the gen directory.
        out: Vec<String>,
    },
}

/// Shard position of a per-file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInfo {
    /// Position of the shard.
    pub index: usize,
    /// Total number of shards.
    pub count: usize,
}

/// A task whose command has not been expanded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    /// Sources handled by the task.
    pub inputs: Vec<SrcFile>,
    /// Files the task writes, inside `sandbox_dir`.
    pub outputs: Vec<PathBuf>,
    /// Dependency file location, used only if the rule enables depfiles.
    pub dep_file: Option<PathBuf>,
    /// Final locations of `outputs`; empty unless sharded.
    pub copy_to: Vec<PathBuf>,
    /// Directory the command runs in.
    pub sandbox_dir: PathBuf,
    /// Command template, not yet fully expanded.
    pub command: String,
    /// `None` for single-command rules.
    pub shard: Option<ShardInfo>,
}

impl TaskStrategy {
    /// Plan the tasks for `sources`.
    ///
    /// Fails only if a per-file command cannot be quoted for the shell.
    pub fn plan(
        &self,
        template: &Template,
        sources: &[SrcFile],
        gen_dir: &Path,
        mapper: &dyn SandboxMapper,
    ) -> Result<Vec<PendingTask>, ErrorKind> {
        match self {
            Self::Single { out } => Ok(vec![plan_single(template, sources, gen_dir, out)]),
            Self::PerFile {
                output_extension,
                shard_size,
            } => {
                let plan = shard::plan(sources, *shard_size);
                shard::assign(&plan, gen_dir, output_extension)
                    .into_iter()
                    .map(|assignment| plan_shard(template, assignment, mapper))
                    .collect()
            }
        }
    }

    /// Returns `true` for the per-file strategy.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::PerFile { .. })
    }
}

fn plan_single(template: &Template, sources: &[SrcFile], gen_dir: &Path, out: &[String]) -> PendingTask {
    let outputs: Vec<PathBuf> = out.iter().map(|o| gen_dir.join(o)).collect();
    PendingTask {
        inputs: sources.to_vec(),
        dep_file: outputs.first().map(|o| shard::replace_extension(o, "d")),
        outputs,
        copy_to: Vec::new(),
        sandbox_dir: gen_dir.to_path_buf(),
        command: template.as_str().to_string(),
        shard: None,
    }
}

/// Expand `$(in)` and `$(out)` once per input, wrap each command for the
/// shell, and chain them so the first failure aborts the shard.
fn plan_shard(
    template: &Template,
    assignment: ShardAssignment,
    mapper: &dyn SandboxMapper,
) -> Result<PendingTask, ErrorKind> {
    let mut commands = Vec::with_capacity(assignment.inputs.len());
    for (input, output) in assignment.inputs.iter().zip(&assignment.outputs) {
        let command = expand::expand_partial(template, |name| match name {
            "in" => Some(input.command_path()),
            "out" => Some(mapper.output_path(&output.shard_path, &assignment.sandbox_dir)),
            _ => None,
        });
        commands.push(format!("bash -c {}", shell_quote(&command)?));
    }

    let needs_merge = assignment.needs_merge();
    let dep_file = assignment
        .outputs
        .first()
        .map(|o| shard::replace_extension(&o.final_path, "d"));
    let (outputs, copy_to): (Vec<PathBuf>, Vec<PathBuf>) = if needs_merge {
        assignment
            .outputs
            .into_iter()
            .map(|o| (o.shard_path, o.final_path))
            .unzip()
    } else {
        (assignment.outputs.into_iter().map(|o| o.shard_path).collect(), Vec::new())
    };

    Ok(PendingTask {
        inputs: assignment.inputs,
        outputs,
        dep_file,
        copy_to,
        sandbox_dir: assignment.sandbox_dir,
        command: commands.join(" && "),
        shard: Some(ShardInfo {
            index: assignment.index,
            count: assignment.count,
        }),
    })
}

/// Rule-wide state needed to finish every task of one rule.
pub struct TaskBuilder<'a> {
    /// Every resolved rule source, for `$(in)`.
    pub sources: &'a [String],
    /// Tool paths and tool files, implicit inputs of every task.
    pub tool_deps: &'a [PathBuf],
    /// Whether the rule enabled depfile tracking.
    pub depfile: bool,
    /// Whether `$(location)` has a default to fall back on.
    pub has_tools: bool,
    /// Renders host paths as sandbox paths.
    pub mapper: &'a dyn SandboxMapper,
}

impl TaskBuilder<'_> {
    /// Bind the task's outputs, expand its command and assemble the [`Task`].
    pub fn build(&self, labels: &mut LabelResolver, pending: PendingTask) -> Result<Task, Vec<RuleError>> {
        if pending.outputs.is_empty() {
            return Err(vec![RuleError::module(ErrorKind::NoOutputs)]);
        }

        let mut errors = Vec::new();
        for out in &pending.outputs {
            let label = sandbox::relative_to(out, &pending.sandbox_dir);
            let sbox_path = self.mapper.output_path(out, &pending.sandbox_dir);
            if let Err(e) = labels.bind(&label.display().to_string(), [sbox_path]) {
                errors.push(RuleError::module(e));
            }
        }

        let template = Template::parse(&pending.command).map_err(|e| vec![RuleError::property("cmd", e)])?;
        let ctx = ExpandContext {
            sources: self.sources,
            outputs: &pending.outputs,
            sandbox_dir: &pending.sandbox_dir,
            depfile: self.depfile,
            has_tools: self.has_tools,
            mapper: self.mapper,
        };
        let expansion = match expand::expand(&template, labels, &ctx) {
            Ok(expansion) => Some(expansion),
            Err(kinds) => {
                errors.extend(kinds.into_iter().map(|k| RuleError::property("cmd", k)));
                None
            }
        };
        let Some(expansion) = expansion.filter(|_| errors.is_empty()) else {
            return Err(errors);
        };

        let (name, description) = task_names(&pending);
        let (shard_index, shard_count) = pending.shard.map_or((0, 1), |s| (s.index, s.count));
        let inputs = pending
            .inputs
            .into_iter()
            .map(|src| src.path)
            .chain(self.tool_deps.iter().cloned())
            .collect();

        Ok(Task {
            name,
            description,
            inputs,
            outputs: pending.outputs,
            dep_file: pending.dep_file.filter(|_| self.depfile),
            copy_to: pending.copy_to,
            sandbox_dir: pending.sandbox_dir,
            command: expansion.command,
            shard_index,
            shard_count,
        })
    }
}

fn task_names(pending: &PendingTask) -> (String, String) {
    match pending.shard {
        Some(shard) => (format!("generator{}", shard.index), format!("generate {}", shard.index)),
        None => {
            let description = match pending.outputs.as_slice() {
                [only] => match only.file_name() {
                    Some(base) => format!("generate {}", base.to_string_lossy()),
                    None => "generate".to_string(),
                },
                _ => "generate".to_string(),
            };
            ("generator".to_string(), description)
        }
    }
}
