//! Error types for rule generation and output merging.
//!
//! Every rule-definition error is static and input-derived: it is attached
//! to the property that produced it and is never retried.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// The kind of a rule-definition error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The same label was bound to two different path sets.
    ConflictingLabel {
        /// The label name.
        label: String,
        /// Paths from the first binding.
        existing: Vec<String>,
        /// Paths from the rejected binding.
        new: Vec<String>,
    },
    /// A template referenced a label that was never bound.
    UnknownLabel {
        /// The label name.
        label: String,
        /// Whether the reference used `$(locations ...)`.
        plural: bool,
    },
    /// A singular reference resolved to more than one path.
    AmbiguousLabel {
        /// The label name.
        label: String,
        /// Whether the reference was `$(location)` with no label.
        default: bool,
    },
    /// A reference resolved to no paths at all.
    EmptyLabel {
        /// The label name.
        label: String,
        /// Whether the reference was `$(location)` with no label.
        default: bool,
    },
    /// `$(location)` was used but the rule declares no tools or tool files.
    NoDefaultLabel,
    /// A `$(name)` that is not part of the template vocabulary.
    UnknownVariable(String),
    /// The template itself is malformed.
    TemplateSyntax(String),
    /// `$(depfile)` was used without enabling the depfile property.
    DepfileNotEnabled,
    /// The depfile property is enabled but the template never uses it.
    DepfileUnreferenced,
    /// A task or rule produced no declared outputs.
    NoOutputs,
    /// A referenced tool or source has no producer.
    MissingDependency {
        /// `"tool"` or `"srcs"`.
        what: &'static str,
        /// The unresolved reference.
        name: String,
    },
    /// A tool dependency points at a disabled module.
    DisabledTool(String),
    /// A tool dependency is not something that can be executed on the host.
    NotHostTool(String),
    /// A host tool module did not declare an output file.
    ToolMissingOutput(String),
    /// A property has a value that cannot be used.
    InvalidProperty(String),
    /// Two inputs or `out` entries name the same output file.
    DuplicateOutput(PathBuf),
    /// Command text that cannot be quoted for the shell.
    Unquotable(String),
    /// Two rules with the same name in one build configuration.
    DuplicateRule {
        /// The rule name.
        name: String,
        /// Module directory of the rule that claimed the name first.
        first_module_dir: String,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConflictingLabel {
                label,
                existing,
                new,
            } => write!(
                f,
                "multiple labels for {label:?}, {:?} and {:?}",
                existing.join(" "),
                new.join(" ")
            ),
            Self::UnknownLabel { label, plural } => {
                let form = if *plural { "locations" } else { "location" };
                write!(f, "unknown {form} label {label:?}")
            }
            Self::AmbiguousLabel { label, default } => {
                let which = if *default { "default label" } else { "label" };
                write!(
                    f,
                    "{which} {label:?} has multiple files, use $(locations {label}) to reference it"
                )
            }
            Self::EmptyLabel { label, default } => {
                let which = if *default { "default label" } else { "label" };
                write!(f, "{which} {label:?} has no files")
            }
            Self::NoDefaultLabel => write!(
                f,
                "at least one `tools` or `tool_files` is required if $(location) is used"
            ),
            Self::UnknownVariable(name) => write!(f, "unknown variable '$({name})'"),
            Self::TemplateSyntax(msg) => write!(f, "{msg}"),
            Self::DepfileNotEnabled => write!(f, "$(depfile) used without depfile property"),
            Self::DepfileUnreferenced => write!(
                f,
                "specified depfile=true but did not include a reference to '$(depfile)' in cmd"
            ),
            Self::NoOutputs => write!(f, "must have at least one output file"),
            Self::MissingDependency { what, name } => {
                write!(f, "missing dependency: {what} {name:?} has no producer")
            }
            Self::DisabledTool(name) => write!(f, "depends on disabled module {name:?}"),
            Self::NotHostTool(name) => write!(f, "{name:?} is not a host tool provider"),
            Self::ToolMissingOutput(name) => write!(f, "host tool {name:?} missing output file"),
            Self::InvalidProperty(msg) => write!(f, "{msg}"),
            Self::DuplicateOutput(path) => {
                write!(f, "output {} is produced more than once", path.display())
            }
            Self::Unquotable(msg) => write!(f, "cannot quote command for the shell: {msg}"),
            Self::DuplicateRule {
                name,
                first_module_dir,
            } => write!(
                f,
                "rule {name:?} is already defined in {first_module_dir:?}"
            ),
        }
    }
}

/// A rule-definition error attached to the property that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleError {
    /// The offending property, or `None` for errors about the rule as a whole.
    pub property: Option<&'static str>,
    /// What went wrong.
    pub kind: ErrorKind,
}

impl RuleError {
    /// An error reported against a specific property.
    pub fn property(property: &'static str, kind: ErrorKind) -> Self {
        Self {
            property: Some(property),
            kind,
        }
    }

    /// An error reported against the rule itself.
    pub fn module(kind: ErrorKind) -> Self {
        Self {
            property: None,
            kind,
        }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.property {
            Some(prop) => write!(f, "{prop}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for RuleError {}

/// All errors collected while generating a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateError {
    /// Name of the failed rule.
    pub rule: String,
    /// Every error found, in evaluation order; never empty.
    pub errors: Vec<RuleError>,
}

impl GenerateError {
    /// Returns `true` if any collected error has the given kind.
    pub fn has(&self, pred: impl Fn(&ErrorKind) -> bool) -> bool {
        self.errors.iter().any(|e| pred(&e.kind))
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = &self.rule;
        match self.errors.as_slice() {
            [single] => write!(f, "rule '{rule}': {single}"),
            errors => {
                write!(f, "rule '{rule}': {} errors", errors.len())?;
                for e in errors {
                    write!(f, "\n  {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for GenerateError {}

/// Errors that can occur while merging shard outputs.
#[derive(Debug)]
pub enum MergeError {
    /// I/O error while archiving or unpacking.
    Io(io::Error),
    /// A shard output declared in the merge plan does not exist.
    MissingShardOutput(PathBuf),
    /// Some shard tasks did not complete successfully.
    IncompleteShards(Vec<usize>),
    /// An entry would escape the final directory or is otherwise unusable.
    InvalidEntry(PathBuf),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "merge I/O error: {e}"),
            Self::MissingShardOutput(p) => {
                write!(f, "shard output {} does not exist", p.display())
            }
            Self::IncompleteShards(shards) => {
                write!(f, "refusing to merge, shards did not complete: {shards:?}")
            }
            Self::InvalidEntry(p) => write!(f, "invalid merge entry {}", p.display()),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MergeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
