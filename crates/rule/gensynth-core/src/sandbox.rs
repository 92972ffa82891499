//! Host path to sandbox path translation.
//!
//! Commands run inside an isolated working directory, so every output path
//! they see is rewritten relative to the task's sandbox directory. The
//! mapping itself belongs to the executor; the expander only calls it.

use std::path::{Component, Path, PathBuf};

/// Sentinel the executor replaces with the real sandbox output directory.
pub const SBOX_OUT_DIR: &str = "__SBOX_OUT_DIR__";

/// Sentinel the executor replaces with the dependency file path.
pub const SBOX_DEPFILE: &str = "__SBOX_DEPFILE__";

/// Maps host paths to the paths a sandboxed command sees.
pub trait SandboxMapper {
    /// The sandbox form of `path`, an output located under `sandbox_dir`.
    fn output_path(&self, path: &Path, sandbox_dir: &Path) -> String;

    /// The sandbox form of the dependency file.
    fn depfile_path(&self) -> String;
}

/// The default `sbox` mapping: outputs are rooted at [`SBOX_OUT_DIR`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SboxMapper;

impl SandboxMapper for SboxMapper {
    fn output_path(&self, path: &Path, sandbox_dir: &Path) -> String {
        let rel = relative_to(path, sandbox_dir);
        if rel.as_os_str().is_empty() {
            SBOX_OUT_DIR.to_string()
        } else {
            format!("{SBOX_OUT_DIR}/{}", rel.display())
        }
    }

    fn depfile_path(&self) -> String {
        SBOX_DEPFILE.to_string()
    }
}

/// `path` relative to `base`, falling back to `path` itself when it does
/// not live under `base`.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rel) => rel
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect(),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_under_sandbox_dir() {
        let m = SboxMapper;
        assert_eq!(
            m.output_path(Path::new("out/gen/b.txt"), Path::new("out/gen")),
            "__SBOX_OUT_DIR__/b.txt"
        );
        assert_eq!(
            m.output_path(Path::new("out/gen/0/sub/x.h"), Path::new("out/gen/0")),
            "__SBOX_OUT_DIR__/sub/x.h"
        );
    }

    #[test]
    fn sandbox_dir_maps_to_root() {
        let m = SboxMapper;
        assert_eq!(
            m.output_path(Path::new("out/gen"), Path::new("out/gen")),
            "__SBOX_OUT_DIR__"
        );
    }

    #[test]
    fn relative_to_outside_base_is_unchanged() {
        assert_eq!(
            relative_to(Path::new("elsewhere/a"), Path::new("out")),
            PathBuf::from("elsewhere/a")
        );
    }
}
