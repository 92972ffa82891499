//! Location labels: symbolic names bound to resolved file paths.
//!
//! Tools, tool files, source entries and declared outputs are all bound
//! here before a command template is expanded. Binding order matters: the
//! first label ever bound becomes the default label used by `$(location)`.

use std::collections::{HashMap, HashSet};

use crate::error::ErrorKind;

/// How references to missing producers are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolveMode {
    /// A reference whose producer is missing is an error.
    #[default]
    Strict,
    /// Bind a placeholder path instead. The overall build is already failing
    /// for the missing dependency, so the command will never run.
    AllowMissing,
}

impl ResolveMode {
    /// Returns `true` in permissive mode.
    pub fn allows_missing(self) -> bool {
        self == Self::AllowMissing
    }
}

/// Placeholder bound to a tool label whose producer is missing.
pub fn missing_tool_placeholder(name: &str) -> String {
    format!("***missing tool {name}***")
}

/// Placeholder bound to a source label whose producer is missing.
pub fn missing_srcs_placeholder(name: &str) -> String {
    format!("***missing srcs {name}***")
}

/// Maps label names to the ordered list of paths they resolve to.
#[derive(Debug, Default, Clone)]
pub struct LabelResolver {
    labels: HashMap<String, Vec<String>>,
    default: Option<String>,
}

impl LabelResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `paths`.
    ///
    /// Duplicate paths are dropped, keeping the first occurrence. Binding an
    /// existing name again is a no-op if the (deduplicated) path list is
    /// identical and a [`ErrorKind::ConflictingLabel`] otherwise.
    pub fn bind<I, S>(&mut self, name: &str, paths: I) -> Result<(), ErrorKind>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths = dedup(paths.into_iter().map(Into::into));

        if let Some(existing) = self.labels.get(name) {
            if *existing == paths {
                return Ok(());
            }
            return Err(ErrorKind::ConflictingLabel {
                label: name.to_string(),
                existing: existing.clone(),
                new: paths,
            });
        }

        if self.default.is_none() {
            self.default = Some(name.to_string());
        }
        self.labels.insert(name.to_string(), paths);
        Ok(())
    }

    /// The first label that was successfully bound.
    pub fn default_label(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Returns `true` if no label has been bound.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// All paths bound to `name`, which may be empty.
    pub fn resolve(&self, name: &str) -> Result<&[String], ErrorKind> {
        self.labels
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ErrorKind::UnknownLabel {
                label: name.to_string(),
                plural: false,
            })
    }

    /// The single path bound to `name` (`$(location name)`).
    pub fn resolve_single(&self, name: &str) -> Result<&str, ErrorKind> {
        let paths = self.resolve(name)?;
        single(name, paths, false)
    }

    /// All paths bound to `name` (`$(locations name)`); at least one is required.
    pub fn resolve_plural(&self, name: &str) -> Result<&[String], ErrorKind> {
        let paths = self.labels.get(name).ok_or_else(|| ErrorKind::UnknownLabel {
            label: name.to_string(),
            plural: true,
        })?;
        if paths.is_empty() {
            return Err(ErrorKind::EmptyLabel {
                label: name.to_string(),
                default: false,
            });
        }
        Ok(paths)
    }

    /// The single path bound to the default label (`$(location)`).
    pub fn resolve_default_single(&self) -> Result<&str, ErrorKind> {
        let name = self.default.as_deref().ok_or(ErrorKind::NoDefaultLabel)?;
        let paths = self.labels.get(name).map_or(&[][..], Vec::as_slice);
        single(name, paths, true)
    }
}

fn single<'a>(name: &str, paths: &'a [String], default: bool) -> Result<&'a str, ErrorKind> {
    match paths {
        [only] => Ok(only),
        [] => Err(ErrorKind::EmptyLabel {
            label: name.to_string(),
            default,
        }),
        _ => Err(ErrorKind::AmbiguousLabel {
            label: name.to_string(),
            default,
        }),
    }
}

fn dedup(paths: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths.filter(|p| seen.insert(p.clone())).collect()
}
