//! Rule evaluation: from a [`RuleDef`] to executable tasks.
//!
//! Labels are bound in a fixed order (tools, tool files, sources, then each
//! task's outputs) because the first bound label is the default for
//! `$(location)`. Errors in tools stop evaluation before sources are
//! looked at; every other stage collects all of its errors before stopping.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{RuleDef, RuleKind, SrcFile, ToolResolution, ToolState};
use crate::error::{ErrorKind, GenerateError, RuleError};
use crate::expand::Template;
use crate::label::{self, LabelResolver, ResolveMode};
use crate::merge::{MergeEntry, MergePlan};
use crate::registry::RuleRegistry;
use crate::sandbox::{self, SandboxMapper, SboxMapper};
use crate::shard::{DEFAULT_SHARD_SIZE, GENSRCS_SUBDIR};
use crate::task::{PendingTask, Task, TaskBuilder, TaskStrategy};

/// Rules with more outputs than this expose a single phony target instead.
pub const MAX_DIRECT_OUTPUT_DEPS: usize = 6;

/// Build-wide settings shared by every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Root of the build output tree.
    pub out_dir: PathBuf,
    /// How references to missing producers are treated.
    pub mode: ResolveMode,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out"),
            mode: ResolveMode::Strict,
        }
    }
}

/// A phony target standing in for a large output set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhonyTarget {
    /// `<gen>/genrule-phony`.
    pub path: PathBuf,
    /// Every output file of the rule.
    pub inputs: Vec<PathBuf>,
}

/// Everything generated for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedRule {
    /// Rule name.
    pub name: String,
    /// Root of everything the rule writes.
    pub gen_dir: PathBuf,
    /// One task per shard, or a single task.
    pub tasks: Vec<Task>,
    /// Present only when per-file outputs were sharded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergePlan>,
    /// Final output files of the rule.
    pub output_files: Vec<PathBuf>,
    /// What dependents should depend on.
    pub output_deps: Vec<PathBuf>,
    /// Set when there are too many outputs to depend on directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phony: Option<PhonyTarget>,
    /// Generated-header search paths advertised to dependents.
    pub exported_include_dirs: Vec<PathBuf>,
    /// Expanded commands, one per task.
    pub raw_commands: Vec<String>,
    /// References replaced by placeholders in permissive mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_dependencies: Vec<String>,
}

/// Evaluate `rule` with the default sandbox mapping.
pub fn generate(
    rule: &RuleDef,
    registry: &mut RuleRegistry,
    opts: &GenerateOptions,
) -> Result<GeneratedRule, GenerateError> {
    generate_with(rule, registry, opts, &SboxMapper)
}

/// Evaluate `rule`, translating sandbox paths with `mapper`.
pub fn generate_with(
    rule: &RuleDef,
    registry: &mut RuleRegistry,
    opts: &GenerateOptions,
    mapper: &dyn SandboxMapper,
) -> Result<GeneratedRule, GenerateError> {
    RuleEval::new(rule, opts, mapper)
        .run(registry)
        .map_err(|errors| GenerateError {
            rule: rule.name.clone(),
            errors,
        })
}

/// Gen directory of a rule: `<out>/.intermediates/<module_dir>/<name>/gen`.
pub fn gen_dir_for(out_dir: &Path, module_dir: &str, name: &str) -> PathBuf {
    out_dir
        .join(".intermediates")
        .join(module_dir)
        .join(name)
        .join("gen")
}

type Errors = Vec<RuleError>;

struct RuleEval<'a> {
    rule: &'a RuleDef,
    mode: ResolveMode,
    mapper: &'a dyn SandboxMapper,
    module_dir: PathBuf,
    gen_dir: PathBuf,
    labels: LabelResolver,
    tool_deps: Vec<PathBuf>,
    missing: Vec<String>,
}

impl<'a> RuleEval<'a> {
    fn new(rule: &'a RuleDef, opts: &GenerateOptions, mapper: &'a dyn SandboxMapper) -> Self {
        Self {
            rule,
            mode: opts.mode,
            mapper,
            module_dir: PathBuf::from(&rule.module_dir),
            gen_dir: gen_dir_for(&opts.out_dir, &rule.module_dir, &rule.name),
            labels: LabelResolver::new(),
            tool_deps: Vec::new(),
            missing: Vec::new(),
        }
    }

    fn run(mut self, registry: &mut RuleRegistry) -> Result<GeneratedRule, Errors> {
        let rule = self.rule;
        registry
            .register(&rule.name, &rule.module_dir)
            .map_err(|e| vec![RuleError::module(e)])?;

        let (template, strategy) = self.parse_properties()?;

        self.bind_tools()?;
        let mut errors = self.bind_tool_files();
        let sources = self.bind_srcs(&mut errors);
        if !errors.is_empty() {
            return Err(errors);
        }

        let pending = strategy
            .plan(&template, &sources, &self.gen_dir, self.mapper)
            .map_err(|e| vec![RuleError::property("cmd", e)])?;
        if pending.is_empty() {
            return Err(vec![RuleError::property("srcs", ErrorKind::NoOutputs)]);
        }
        let duplicates = duplicate_outputs(&pending);
        if !duplicates.is_empty() {
            let property = if strategy.is_per_file() { "srcs" } else { "out" };
            return Err(duplicates
                .into_iter()
                .map(|path| RuleError::property(property, ErrorKind::DuplicateOutput(path)))
                .collect());
        }

        let source_paths: Vec<String> = sources.iter().map(SrcFile::command_path).collect();
        let builder = TaskBuilder {
            sources: &source_paths,
            tool_deps: &self.tool_deps,
            depfile: rule.depfile,
            has_tools: !rule.tools.is_empty() || !rule.tool_files.is_empty(),
            mapper: self.mapper,
        };

        let mut tasks = Vec::with_capacity(pending.len());
        for p in pending {
            tasks.push(builder.build(&mut self.labels, p)?);
        }

        Ok(self.assemble(tasks, strategy.is_per_file()))
    }

    /// Check the properties that do not depend on resolution.
    fn parse_properties(&self) -> Result<(Template, TaskStrategy), Errors> {
        let rule = self.rule;
        let mut errors = Vec::new();

        let template = match rule.cmd.as_deref() {
            None => {
                errors.push(RuleError::property(
                    "cmd",
                    ErrorKind::InvalidProperty("cmd is required".into()),
                ));
                None
            }
            Some(cmd) => Template::parse(cmd)
                .map_err(|e| errors.push(RuleError::property("cmd", e)))
                .ok(),
        };

        let strategy = match rule.kind {
            RuleKind::Genrule => {
                if rule.out.is_empty() {
                    errors.push(RuleError::module(ErrorKind::NoOutputs));
                }
                for out in rule.out.iter().filter(|o| !is_output_name(o)) {
                    errors.push(RuleError::property(
                        "out",
                        ErrorKind::InvalidProperty(format!(
                            "output {out:?} must be a relative path inside the gen directory"
                        )),
                    ));
                }
                TaskStrategy::Single {
                    out: rule.out.clone(),
                }
            }
            RuleKind::Gensrcs => {
                let output_extension = rule.output_extension.clone().unwrap_or_default();
                if output_extension.is_empty() {
                    errors.push(RuleError::property(
                        "output_extension",
                        ErrorKind::InvalidProperty("output_extension is required".into()),
                    ));
                } else if !is_output_name(&output_extension) || output_extension.contains('/') {
                    errors.push(RuleError::property(
                        "output_extension",
                        ErrorKind::InvalidProperty(format!(
                            "output_extension {output_extension:?} must not contain a path"
                        )),
                    ));
                }
                let shard_size = match rule.shard_size {
                    None => DEFAULT_SHARD_SIZE,
                    Some(size) => usize::try_from(size)
                        .ok()
                        .and_then(NonZeroUsize::new)
                        .unwrap_or_else(|| {
                            errors.push(RuleError::property(
                                "shard_size",
                                ErrorKind::InvalidProperty(format!(
                                    "shard_size must be a positive number, got {size}"
                                )),
                            ));
                            DEFAULT_SHARD_SIZE
                        }),
                };
                TaskStrategy::PerFile {
                    output_extension,
                    shard_size,
                }
            }
        };

        match template {
            Some(template) if errors.is_empty() => Ok((template, strategy)),
            _ => Err(errors),
        }
    }

    fn bind_tools(&mut self) -> Result<(), Errors> {
        let rule = self.rule;
        let mut errors = Vec::new();

        for tool in &rule.tools {
            let resolution = rule.resolved.tools.get(tool);
            let path = match resolution {
                Some(ToolResolution::Path { path }) => Ok(path.clone()),
                Some(ToolResolution::State { state }) => Err(match state {
                    ToolState::Disabled => ErrorKind::DisabledTool(tool.clone()),
                    ToolState::NotHostTool => ErrorKind::NotHostTool(tool.clone()),
                    ToolState::NoOutput => ErrorKind::ToolMissingOutput(tool.clone()),
                }),
                None => Err(ErrorKind::MissingDependency {
                    what: "tool",
                    name: tool.clone(),
                }),
            };

            let bound = match path {
                Ok(path) => {
                    let display = path.display().to_string();
                    self.tool_deps.push(path);
                    self.labels.bind(tool, [display])
                }
                Err(kind) if self.mode.allows_missing() && is_missing_producer(&kind) => {
                    self.missing.push(tool.clone());
                    self.labels.bind(tool, [label::missing_tool_placeholder(tool)])
                }
                Err(kind) => Err(kind),
            };
            if let Err(kind) = bound {
                errors.push(RuleError::property("tools", kind));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn bind_tool_files(&mut self) -> Errors {
        let rule = self.rule;
        let mut errors = Vec::new();

        for tool_file in &rule.tool_files {
            let paths = match rule.resolved.tool_files.get(tool_file) {
                Some(paths) => paths.clone(),
                None => vec![self.module_dir.join(tool_file)],
            };
            let display: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            self.tool_deps.extend(paths);
            if let Err(kind) = self.labels.bind(tool_file, display) {
                errors.push(RuleError::property("tool_files", kind));
            }
        }

        errors
    }

    /// Resolve every `srcs` entry minus `exclude_srcs`, binding each entry
    /// under its original reference string.
    fn bind_srcs(&mut self, errors: &mut Errors) -> Vec<SrcFile> {
        let rule = self.rule;
        let excluded: Vec<PathBuf> = rule
            .exclude_srcs
            .iter()
            .flat_map(|ex| match rule.resolved.srcs.get(ex) {
                Some(entries) => entries
                    .iter()
                    .map(|e| e.to_src_file(&self.module_dir).path)
                    .collect(),
                None => vec![self.module_dir.join(ex)],
            })
            .collect();

        let mut sources = Vec::new();
        for src in &rule.srcs {
            let files: Vec<SrcFile> = match rule.resolved.srcs.get(src) {
                Some(entries) => entries
                    .iter()
                    .map(|e| e.to_src_file(&self.module_dir))
                    .collect(),
                None if is_module_reference(src) => {
                    if self.mode.allows_missing() {
                        self.missing.push(src.clone());
                        if let Err(kind) = self.labels.bind(src, [label::missing_srcs_placeholder(src)]) {
                            errors.push(RuleError::property("srcs", kind));
                        }
                    } else {
                        errors.push(RuleError::property(
                            "srcs",
                            ErrorKind::MissingDependency {
                                what: "srcs",
                                name: src.clone(),
                            },
                        ));
                    }
                    continue;
                }
                None => vec![SrcFile::in_module(self.module_dir.join(src), &self.module_dir)],
            };

            let files: Vec<SrcFile> = files
                .into_iter()
                .filter(|f| !excluded.contains(&f.path))
                .collect();
            let display: Vec<String> = files.iter().map(SrcFile::command_path).collect();
            if let Err(kind) = self.labels.bind(src, display) {
                errors.push(RuleError::property("srcs", kind));
            }
            sources.extend(files);
        }

        sources
    }

    fn assemble(self, tasks: Vec<Task>, per_file: bool) -> GeneratedRule {
        let rule = self.rule;
        let final_dir = self.gen_dir.join(GENSRCS_SUBDIR);

        let mut output_files = Vec::new();
        let mut entries = Vec::new();
        for task in &tasks {
            if task.copy_to.is_empty() {
                output_files.extend(task.outputs.iter().cloned());
                continue;
            }
            for (source, dest) in task.outputs.iter().zip(&task.copy_to) {
                entries.push(MergeEntry {
                    shard: task.shard_index,
                    source: source.clone(),
                    dest: sandbox::relative_to(dest, &final_dir),
                });
            }
            output_files.extend(task.copy_to.iter().cloned());
        }

        let merge = (!entries.is_empty()).then(|| MergePlan {
            archive: self.gen_dir.join(format!("{GENSRCS_SUBDIR}.tar")),
            final_dir: final_dir.clone(),
            shard_count: tasks.len(),
            entries,
        });

        let (output_deps, phony) = if output_files.len() <= MAX_DIRECT_OUTPUT_DEPS {
            (output_files.clone(), None)
        } else {
            let path = self.gen_dir.join("genrule-phony");
            let phony = PhonyTarget {
                path: path.clone(),
                inputs: output_files.clone(),
            };
            (vec![path], Some(phony))
        };

        let subdir = if per_file { self.gen_dir.join(GENSRCS_SUBDIR) } else { self.gen_dir.clone() };
        let exported_include_dirs = if rule.export_include_dirs.is_empty() {
            vec![subdir]
        } else {
            rule.export_include_dirs
                .iter()
                .map(|dir| subdir.join(&rule.module_dir).join(dir))
                .collect()
        };

        GeneratedRule {
            name: rule.name.clone(),
            raw_commands: tasks.iter().map(|t| t.command.clone()).collect(),
            gen_dir: self.gen_dir,
            tasks,
            merge,
            output_files,
            output_deps,
            phony,
            exported_include_dirs,
            missing_dependencies: self.missing,
        }
    }
}

/// A non-empty relative path made only of normal components.
fn is_output_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Final output paths claimed by more than one pending task output, in
/// first-seen order.
fn duplicate_outputs(pending: &[PendingTask]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for task in pending {
        let finals = if task.copy_to.is_empty() { &task.outputs } else { &task.copy_to };
        for path in finals {
            if !seen.insert(path) && !duplicates.contains(path) {
                duplicates.push(path.clone());
            }
        }
    }
    duplicates
}

/// Whether `kind` means the producer is missing rather than misconfigured.
fn is_missing_producer(kind: &ErrorKind) -> bool {
    matches!(kind, ErrorKind::MissingDependency { .. } | ErrorKind::DisabledTool(_))
}

/// `:name` references another module's outputs.
fn is_module_reference(src: &str) -> bool {
    src.starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SrcEntry;

    fn opts() -> GenerateOptions {
        GenerateOptions {
            out_dir: PathBuf::from("out"),
            mode: ResolveMode::Strict,
        }
    }

    fn genrule(name: &str, cmd: &str) -> RuleDef {
        let mut rule = RuleDef::new(name, RuleKind::Genrule);
        rule.module_dir = "pkg".into();
        rule.cmd = Some(cmd.into());
        rule
    }

    fn gensrcs(name: &str, cmd: &str, count: usize) -> RuleDef {
        let mut rule = RuleDef::new(name, RuleKind::Gensrcs);
        rule.module_dir = "pkg".into();
        rule.cmd = Some(cmd.into());
        rule.output_extension = Some("h".into());
        rule.srcs = vec!["*.in".into()];
        rule.resolved.srcs.insert(
            "*.in".into(),
            (0..count)
                .map(|i| SrcEntry::Path(format!("pkg/f{i:03}.in").into()))
                .collect(),
        );
        rule
    }

    fn run(rule: &RuleDef) -> Result<GeneratedRule, GenerateError> {
        generate(rule, &mut RuleRegistry::new(), &opts())
    }

    #[test]
    fn copy_scenario() {
        let mut rule = genrule("copy", "cp $(in) $(out)");
        rule.srcs = vec!["a.txt".into()];
        rule.out = vec!["b.txt".into()];

        let generated = run(&rule).unwrap();
        let gen_dir = PathBuf::from("out/.intermediates/pkg/copy/gen");
        assert_eq!(generated.gen_dir, gen_dir);
        assert_eq!(generated.tasks.len(), 1);
        let task = &generated.tasks[0];
        assert_eq!(task.command, "cp pkg/a.txt __SBOX_OUT_DIR__/b.txt");
        assert_eq!(task.outputs, [gen_dir.join("b.txt")]);
        assert_eq!(generated.output_files, [gen_dir.join("b.txt")]);
        assert_eq!(generated.output_deps, generated.output_files);
        assert_eq!(generated.exported_include_dirs, [gen_dir]);
        assert!(generated.merge.is_none());
    }

    #[test]
    fn tools_bind_before_sources() {
        let mut rule = genrule("tools", "$(location) $(location gen.py) $(locations srcs) > $(out)");
        rule.tools = vec!["protoc".into()];
        rule.tool_files = vec!["gen.py".into()];
        rule.srcs = vec!["srcs".into()];
        rule.out = vec!["o".into()];
        rule.resolved.tools.insert(
            "protoc".into(),
            ToolResolution::Path {
                path: "out/host/bin/protoc".into(),
            },
        );
        rule.resolved.srcs.insert(
            "srcs".into(),
            vec![SrcEntry::Path("pkg/a".into()), SrcEntry::Path("pkg/b".into())],
        );

        let generated = run(&rule).unwrap();
        let task = &generated.tasks[0];
        assert_eq!(
            task.command,
            "out/host/bin/protoc pkg/gen.py pkg/a pkg/b > __SBOX_OUT_DIR__/o"
        );
        assert_eq!(
            task.inputs,
            [
                PathBuf::from("pkg/a"),
                PathBuf::from("pkg/b"),
                PathBuf::from("out/host/bin/protoc"),
                PathBuf::from("pkg/gen.py"),
            ]
        );
    }

    #[test]
    fn missing_tool_label_without_tools() {
        let mut rule = genrule("missing", "$(location missing_tool)");
        rule.out = vec!["o".into()];
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].property, Some("cmd"));
        assert!(err.to_string().contains("missing_tool"), "{err}");
    }

    #[test]
    fn conflicting_label_names_both_sets() {
        let mut rule = genrule("conflict", "cat $(in) > $(out)");
        rule.tool_files = vec!["x".into()];
        rule.srcs = vec!["x".into()];
        rule.out = vec!["o".into()];
        rule.resolved.tool_files.insert("x".into(), vec!["pkg/tools/x".into()]);
        rule.resolved
            .srcs
            .insert("x".into(), vec![SrcEntry::Path("pkg/data/x1".into()), SrcEntry::Path("pkg/data/x2".into())]);

        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].property, Some("srcs"));
        let msg = err.to_string();
        assert!(msg.contains("pkg/tools/x"), "{msg}");
        assert!(msg.contains("pkg/data/x1 pkg/data/x2"), "{msg}");
    }

    #[test]
    fn depfile_must_be_used_when_enabled() {
        let mut rule = genrule("dep", "gen > $(out)");
        rule.out = vec!["o.c".into()];
        rule.depfile = true;
        let err = run(&rule).unwrap_err();
        assert!(err.has(|k| *k == ErrorKind::DepfileUnreferenced));

        rule.cmd = Some("gen -d $(depfile) > $(out)".into());
        let generated = run(&rule).unwrap();
        assert_eq!(
            generated.tasks[0].dep_file,
            Some(PathBuf::from("out/.intermediates/pkg/dep/gen/o.d"))
        );

        rule.depfile = false;
        let err = run(&rule).unwrap_err();
        assert!(err.has(|k| *k == ErrorKind::DepfileNotEnabled));
    }

    #[test]
    fn genrule_without_outputs_fails_before_expansion() {
        let rule = genrule("noout", "$(bogus)");
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors, [RuleError::module(ErrorKind::NoOutputs)]);
    }

    #[test]
    fn missing_cmd_and_bad_shard_size_are_reported_together() {
        let mut rule = gensrcs("bad", "x", 1);
        rule.cmd = None;
        rule.shard_size = Some(0);
        let err = run(&rule).unwrap_err();
        let props: Vec<_> = err.errors.iter().map(|e| e.property).collect();
        assert_eq!(props, [Some("cmd"), Some("shard_size")]);
    }

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let mut rule = genrule("dup", "touch $(out)");
        rule.out = vec!["o".into()];
        let mut registry = RuleRegistry::new();
        generate(&rule, &mut registry, &opts()).unwrap();
        let err = generate(&rule, &mut registry, &opts()).unwrap_err();
        assert!(err.has(|k| matches!(k, ErrorKind::DuplicateRule { .. })));
    }

    #[test]
    fn strict_mode_rejects_missing_producers() {
        let mut rule = genrule("strict", "$(location) $(in) > $(out)");
        rule.tools = vec!["absent".into()];
        rule.srcs = vec![":gen".into()];
        rule.out = vec!["o".into()];
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].property, Some("tools"));
    }

    #[test]
    fn permissive_mode_substitutes_placeholders() {
        let mut rule = genrule("lenient", "$(location) $(location :gen) > $(out)");
        rule.tools = vec!["absent".into()];
        rule.srcs = vec![":gen".into()];
        rule.out = vec!["o".into()];
        let opts = GenerateOptions {
            mode: ResolveMode::AllowMissing,
            ..opts()
        };
        let generated = generate(&rule, &mut RuleRegistry::new(), &opts).unwrap();
        assert_eq!(
            generated.tasks[0].command,
            "***missing tool absent*** ***missing srcs :gen*** > __SBOX_OUT_DIR__/o"
        );
        assert_eq!(generated.missing_dependencies, ["absent", ":gen"]);
    }

    #[test]
    fn misconfigured_tool_fails_even_when_permissive() {
        let mut rule = genrule("nothost", "$(location) > $(out)");
        rule.tools = vec!["lib".into()];
        rule.out = vec!["o".into()];
        rule.resolved.tools.insert(
            "lib".into(),
            ToolResolution::State {
                state: ToolState::NotHostTool,
            },
        );
        let opts = GenerateOptions {
            mode: ResolveMode::AllowMissing,
            ..opts()
        };
        let err = generate(&rule, &mut RuleRegistry::new(), &opts).unwrap_err();
        assert_eq!(
            err.errors,
            [RuleError::property("tools", ErrorKind::NotHostTool("lib".into()))]
        );
    }

    #[test]
    fn exclude_srcs_are_removed() {
        let mut rule = genrule("excl", "cat $(in) > $(out)");
        rule.srcs = vec!["*.txt".into()];
        rule.exclude_srcs = vec!["skip.txt".into()];
        rule.out = vec!["o".into()];
        rule.resolved.srcs.insert(
            "*.txt".into(),
            vec![SrcEntry::Path("pkg/keep.txt".into()), SrcEntry::Path("pkg/skip.txt".into())],
        );
        let generated = run(&rule).unwrap();
        assert_eq!(generated.tasks[0].command, "cat pkg/keep.txt > __SBOX_OUT_DIR__/o");
    }

    #[test]
    fn large_output_sets_use_a_phony_target() {
        let mut rule = genrule("many", "gen $(genDir)");
        rule.out = (0..7).map(|i| format!("o{i}")).collect();
        let generated = run(&rule).unwrap();
        let gen_dir = &generated.gen_dir;
        assert_eq!(generated.output_deps, [gen_dir.join("genrule-phony")]);
        assert_eq!(generated.phony.as_ref().unwrap().inputs.len(), 7);
        assert_eq!(generated.tasks[0].command, "gen __SBOX_OUT_DIR__");
    }

    #[test]
    fn gensrcs_unsharded() {
        let mut rule = gensrcs("small", "$(location) $(in) > $(out)", 3);
        rule.tools = vec!["tool".into()];
        rule.resolved.tools.insert(
            "tool".into(),
            ToolResolution::Path {
                path: "out/bin/tool".into(),
            },
        );
        rule.export_include_dirs = vec!["include".into()];

        let generated = run(&rule).unwrap();
        assert_eq!(generated.tasks.len(), 1);
        assert!(generated.merge.is_none());
        let gen_dir = generated.gen_dir.clone();
        assert_eq!(
            generated.output_files,
            ["f000.h", "f001.h", "f002.h"].map(|f| gen_dir.join("gensrcs").join(f))
        );
        assert!(generated.tasks[0]
            .command
            .starts_with("bash -c 'out/bin/tool pkg/f000.in > __SBOX_OUT_DIR__/f000.h' && "));
        assert_eq!(
            generated.exported_include_dirs,
            [gen_dir.join("gensrcs/pkg/include")]
        );
    }

    #[test]
    fn gensrcs_sharded_matches_unsharded_layout() {
        let mut sharded = gensrcs("big", "cp $(in) $(out)", 250);
        sharded.shard_size = Some(100);
        let mut unsharded = gensrcs("big", "cp $(in) $(out)", 250);
        unsharded.shard_size = Some(1000);

        let s = run(&sharded).unwrap();
        let u = run(&unsharded).unwrap();

        let sizes: Vec<usize> = s.tasks.iter().map(|t| t.outputs.len()).collect();
        assert_eq!(sizes, [100, 100, 50]);
        assert_eq!(u.tasks.len(), 1);
        assert_eq!(s.output_files, u.output_files);

        let merge = s.merge.as_ref().unwrap();
        assert_eq!(merge.shard_count, 3);
        assert_eq!(merge.entries.len(), 250);
        assert_eq!(merge.final_dir, s.gen_dir.join("gensrcs"));
        assert_eq!(merge.final_paths().collect::<Vec<_>>(), u.output_files);
        assert_eq!(merge.entries[100].shard, 1);
        assert_eq!(merge.entries[100].source, s.gen_dir.join("1/f100.h"));
    }

    #[test]
    fn gensrcs_with_no_sources_has_no_outputs() {
        let rule = gensrcs("empty", "cp $(in) $(out)", 0);
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors, [RuleError::property("srcs", ErrorKind::NoOutputs)]);
    }

    #[test]
    fn outputs_outside_gen_dir_are_rejected() {
        let mut rule = genrule("escape", "touch $(out)");
        rule.out = vec!["../../../escape.txt".into(), "/tmp/abs.txt".into(), "ok.txt".into()];
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 2, "{err}");
        assert!(err.errors.iter().all(|e| e.property == Some("out")));
        assert!(err.has(|k| matches!(k, ErrorKind::InvalidProperty(m) if m.contains("escape.txt"))));
    }

    #[test]
    fn output_extension_must_not_be_a_path() {
        let mut rule = gensrcs("ext", "cp $(in) $(out)", 1);
        rule.output_extension = Some("../h".into());
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].property, Some("output_extension"));
    }

    #[test]
    fn sources_mapping_to_one_output_are_rejected() {
        let mut rule = gensrcs("clash", "cp $(in) $(out)", 0);
        rule.srcs = vec!["a".into(), "b".into()];
        rule.shard_size = Some(1);
        rule.resolved.srcs.insert("a".into(), vec![SrcEntry::Path("pkg/x.in".into())]);
        rule.resolved.srcs.insert("b".into(), vec![SrcEntry::Path("pkg/x.txt".into())]);

        let err = run(&rule).unwrap_err();
        let final_path = PathBuf::from("out/.intermediates/pkg/clash/gen/gensrcs/x.h");
        assert_eq!(
            err.errors,
            [RuleError::property("srcs", ErrorKind::DuplicateOutput(final_path))]
        );
    }

    #[test]
    fn same_source_listed_twice_is_a_duplicate_output() {
        let mut rule = gensrcs("twice", "cp $(in) $(out)", 0);
        rule.srcs = vec!["a".into(), "b".into()];
        rule.resolved.srcs.insert("a".into(), vec![SrcEntry::Path("pkg/x.in".into())]);
        rule.resolved.srcs.insert("b".into(), vec![SrcEntry::Path("pkg/x.in".into())]);
        let err = run(&rule).unwrap_err();
        assert!(err.has(|k| matches!(k, ErrorKind::DuplicateOutput(_))));
    }

    #[test]
    fn repeated_out_entries_are_rejected() {
        let mut rule = genrule("repeat", "touch $(out)");
        rule.out = vec!["o".into(), "o".into()];
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].property, Some("out"));
        assert!(err.has(|k| matches!(k, ErrorKind::DuplicateOutput(_))));
    }

    #[test]
    fn unquotable_per_file_command_is_reported_against_cmd() {
        let rule = gensrcs("nul", "echo \0 $(in) > $(out)", 1);
        let err = run(&rule).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].property, Some("cmd"));
        assert!(err.has(|k| matches!(k, ErrorKind::Unquotable(_))));
    }
}
