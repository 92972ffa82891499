//! Rule definitions and their resolved dependencies.
//!
//! Deserialized from the rule manifest. Dependency resolution itself happens
//! outside this crate; a rule only carries the already-resolved result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which task strategy a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// One command producing the explicitly listed `out` files.
    Genrule,
    /// One command per source file, sharded.
    Gensrcs,
}

/// A single genrule/gensrcs definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    /// Rule name, unique within one build configuration.
    pub name: String,
    /// Selects the task strategy.
    pub kind: RuleKind,
    /// Directory of the module, relative to the source root.
    #[serde(default)]
    pub module_dir: String,
    /// The command template.
    pub cmd: Option<String>,
    /// Enable reading a gcc-format dependency file after the command runs.
    #[serde(default)]
    pub depfile: bool,
    /// Host tool modules, bound as labels in declaration order.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Local files used as tools.
    #[serde(default)]
    pub tool_files: Vec<String>,
    /// Source references, bound as labels under their own text.
    #[serde(default)]
    pub srcs: Vec<String>,
    /// Source references whose files are removed from `srcs`.
    #[serde(default)]
    pub exclude_srcs: Vec<String>,
    /// Output file names (genrule only).
    #[serde(default)]
    pub out: Vec<String>,
    /// Extension substituted for each output file (gensrcs only).
    pub output_extension: Option<String>,
    /// Maximum number of inputs per command line (gensrcs only).
    pub shard_size: Option<u64>,
    /// Directories to export generated headers from.
    #[serde(default)]
    pub export_include_dirs: Vec<String>,
    /// What every dependency reference resolved to.
    #[serde(default)]
    pub resolved: ResolvedDeps,
}

impl RuleDef {
    /// A rule with the given name and kind and no properties set.
    pub fn new(name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            module_dir: String::new(),
            cmd: None,
            depfile: false,
            tools: Vec::new(),
            tool_files: Vec::new(),
            srcs: Vec::new(),
            exclude_srcs: Vec::new(),
            out: Vec::new(),
            output_extension: None,
            shard_size: None,
            export_include_dirs: Vec::new(),
            resolved: ResolvedDeps::default(),
        }
    }
}

/// Dependency resolution results supplied by the surrounding build graph.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ResolvedDeps {
    /// Tool name → how it resolved. Tools absent here have no producer.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolResolution>,
    /// Tool file reference → paths. Absent entries are module-relative files.
    #[serde(default)]
    pub tool_files: BTreeMap<String, Vec<PathBuf>>,
    /// Source reference → files, after glob and module expansion.
    #[serde(default)]
    pub srcs: BTreeMap<String, Vec<SrcEntry>>,
}

/// The resolution of one `tools` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResolution {
    /// The tool's host executable.
    Path { path: PathBuf },
    /// The dependency exists but cannot provide a tool.
    State { state: ToolState },
}

/// Why a tool dependency cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    /// The producing module is disabled.
    Disabled,
    /// The module does not build a host executable.
    NotHostTool,
    /// The module builds a host tool but declares no output file.
    NoOutput,
}

/// One resolved source file, either a bare path or a path with an explicit
/// relative name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SrcEntry {
    /// A path whose relative name is derived from the module directory.
    Path(PathBuf),
    /// A path with its relative name given explicitly.
    Explicit {
        /// Path as seen by the command.
        path: PathBuf,
        /// Name used to derive outputs.
        rel: PathBuf,
    },
}

impl SrcEntry {
    /// Convert to a [`SrcFile`], deriving `rel` from `module_dir` if needed.
    pub fn to_src_file(&self, module_dir: &Path) -> SrcFile {
        match self {
            Self::Explicit { path, rel } => SrcFile::new(path.clone(), rel.clone()),
            Self::Path(path) => SrcFile::in_module(path.clone(), module_dir),
        }
    }
}

/// A resolved input file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SrcFile {
    /// Path as seen by the command and declared as a task input.
    pub path: PathBuf,
    /// Path relative to the producing module, used to name outputs.
    pub rel: PathBuf,
}

impl SrcFile {
    /// A source with an explicit relative name.
    pub fn new(path: impl Into<PathBuf>, rel: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rel: rel.into(),
        }
    }

    /// A source living in `module_dir`; `rel` is the path below it.
    pub fn in_module(path: PathBuf, module_dir: &Path) -> Self {
        let rel = path
            .strip_prefix(module_dir)
            .map_or_else(|_| path.clone(), Path::to_path_buf);
        Self { path, rel }
    }

    /// The path as it appears in a command line.
    pub fn command_path(&self) -> String {
        self.path.display().to_string()
    }
}
