//! Reassembly of sharded outputs into the final output directory.
//!
//! Merging is two steps. All shard outputs are first packed into one tar
//! archive under their final relative names; the archive is then unpacked
//! into the final directory by a synchronizing unpack that deletes every
//! file not in the archive before writing the members. The final directory
//! therefore holds exactly the declared outputs, whatever shard layout a
//! previous run used.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::MergeError;

/// One shard output and the name it takes in the final directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEntry {
    /// Index of the shard task that produces `source`.
    pub shard: usize,
    /// Where the shard wrote the file.
    pub source: PathBuf,
    /// Destination relative to the final directory.
    pub dest: PathBuf,
}

/// Everything needed to run the merge step of a sharded rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    /// Intermediate archive path.
    pub archive: PathBuf,
    /// Directory that ends up holding exactly the merged outputs.
    pub final_dir: PathBuf,
    /// Number of shard tasks that must finish first.
    pub shard_count: usize,
    /// One entry per output, in shard order.
    pub entries: Vec<MergeEntry>,
}

/// The result of a merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergedOutputs {
    /// Files written into the final directory, in archive order.
    pub files: Vec<PathBuf>,
    /// Stale files deleted from the final directory.
    pub removed: Vec<PathBuf>,
}

impl MergePlan {
    /// Check that every shard feeding this merge completed successfully.
    ///
    /// `succeeded` lists the indices of shard tasks that finished without
    /// error. Partial merges are never allowed.
    pub fn check_ready(&self, succeeded: &[usize]) -> Result<(), MergeError> {
        let done: HashSet<usize> = succeeded.iter().copied().collect();
        let missing: Vec<usize> = (0..self.shard_count).filter(|i| !done.contains(i)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MergeError::IncompleteShards(missing))
        }
    }

    /// Final paths of every merged output.
    pub fn final_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.entries.iter().map(|e| self.final_dir.join(&e.dest))
    }
}

/// Archive every shard output and synchronize the final directory with it.
///
/// Nothing is written if any shard output is missing.
pub fn merge(plan: &MergePlan) -> Result<MergedOutputs, MergeError> {
    write_archive(plan)?;
    sync_unpack(&plan.archive, &plan.final_dir)
}

/// Pack all shard outputs into `plan.archive` under their final names.
///
/// Headers are normalized (zero mtime and owner) so the same inputs always
/// produce the same archive. The archive is written to a temporary file and
/// renamed into place.
pub fn write_archive(plan: &MergePlan) -> Result<(), MergeError> {
    validate_entries(plan)?;

    if let Some(parent) = plan.archive.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = plan.archive.with_extension("tar.tmp");
    let mut builder = tar::Builder::new(BufWriter::new(File::create(&tmp_path)?));

    for entry in &plan.entries {
        let data = fs::read(&entry.source)?;
        let meta = fs::metadata(&entry.source)?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(file_mode(&meta));
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, &entry.dest, data.as_slice())?;
    }

    builder.into_inner()?.flush()?;
    fs::rename(&tmp_path, &plan.archive)?;
    Ok(())
}

/// Make `final_dir` contain exactly the members of `archive`.
///
/// Files under `final_dir` that are not archive members are deleted first,
/// along with directories left empty; then every member is written.
pub fn sync_unpack(archive: &Path, final_dir: &Path) -> Result<MergedOutputs, MergeError> {
    let members = archive_members(archive)?;
    let mut merged = MergedOutputs::default();

    if final_dir.exists() {
        merged.removed = remove_stale(final_dir, &members)?;
    }
    fs::create_dir_all(final_dir)?;

    let mut ar = tar::Archive::new(BufReader::new(File::open(archive)?));
    // Outputs must look fresh to whatever consumes them next.
    ar.set_preserve_mtime(false);
    for entry in ar.entries()? {
        let mut entry = entry?;
        let rel = entry.path()?.into_owned();
        if !entry.unpack_in(final_dir)? {
            return Err(MergeError::InvalidEntry(rel));
        }
        merged.files.push(final_dir.join(rel));
    }

    Ok(merged)
}

fn archive_members(archive: &Path) -> Result<HashSet<PathBuf>, MergeError> {
    let mut ar = tar::Archive::new(BufReader::new(File::open(archive)?));
    let mut members = HashSet::new();
    for entry in ar.entries()? {
        let entry = entry?;
        members.insert(entry.path()?.into_owned());
    }
    Ok(members)
}

fn remove_stale(final_dir: &Path, members: &HashSet<PathBuf>) -> Result<Vec<PathBuf>, MergeError> {
    let mut removed = Vec::new();

    for entry in WalkDir::new(final_dir).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|e| MergeError::Io(e.into()))?;
        let path = entry.path();
        let rel = path.strip_prefix(final_dir).unwrap_or(path);

        if entry.file_type().is_dir() {
            if members.contains(rel) {
                fs::remove_dir_all(path)?;
            } else if fs::read_dir(path)?.next().is_none() {
                fs::remove_dir(path)?;
            }
        } else if !members.contains(rel) {
            fs::remove_file(path)?;
            removed.push(path.to_path_buf());
        }
    }

    Ok(removed)
}

fn validate_entries(plan: &MergePlan) -> Result<(), MergeError> {
    let mut seen = HashSet::new();
    for entry in &plan.entries {
        let normal = entry
            .dest
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !normal || entry.dest.as_os_str().is_empty() || !seen.insert(&entry.dest) {
            return Err(MergeError::InvalidEntry(entry.dest.clone()));
        }
        if !entry.source.is_file() {
            return Err(MergeError::MissingShardOutput(entry.source.clone()));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(p: &Path, s: &str) {
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(p, s).unwrap();
    }

    fn list(dir: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(dir).unwrap().display().to_string())
            .collect();
        files.sort();
        files
    }

    /// Two shards with one file each, under `gen/0` and `gen/1`.
    fn two_shard_plan(gen_dir: &Path) -> MergePlan {
        write(&gen_dir.join("0/a.h"), "a");
        write(&gen_dir.join("1/sub/b.h"), "b");
        MergePlan {
            archive: gen_dir.join("gensrcs.tar"),
            final_dir: gen_dir.join("gensrcs"),
            shard_count: 2,
            entries: vec![
                MergeEntry {
                    shard: 0,
                    source: gen_dir.join("0/a.h"),
                    dest: "a.h".into(),
                },
                MergeEntry {
                    shard: 1,
                    source: gen_dir.join("1/sub/b.h"),
                    dest: "sub/b.h".into(),
                },
            ],
        }
    }

    #[test]
    fn merge_populates_final_dir() {
        let tmp = TempDir::new().unwrap();
        let plan = two_shard_plan(tmp.path());
        let merged = merge(&plan).unwrap();

        assert_eq!(list(&plan.final_dir), ["a.h", "sub/b.h"]);
        assert_eq!(fs::read_to_string(plan.final_dir.join("sub/b.h")).unwrap(), "b");
        assert_eq!(merged.files, plan.final_paths().collect::<Vec<_>>());
        assert!(merged.removed.is_empty());
        assert!(plan.archive.is_file());
    }

    #[test]
    fn merge_removes_stale_outputs() {
        let tmp = TempDir::new().unwrap();
        let plan = two_shard_plan(tmp.path());
        write(&plan.final_dir.join("old.h"), "stale");
        write(&plan.final_dir.join("gone/deep.h"), "stale");
        write(&plan.final_dir.join("a.h"), "previous");

        let merged = merge(&plan).unwrap();

        assert_eq!(list(&plan.final_dir), ["a.h", "sub/b.h"]);
        assert_eq!(fs::read_to_string(plan.final_dir.join("a.h")).unwrap(), "a");
        assert!(!plan.final_dir.join("gone").exists());
        assert_eq!(merged.removed.len(), 2);
    }

    #[test]
    fn merge_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let plan = two_shard_plan(tmp.path());
        merge(&plan).unwrap();
        let first_archive = fs::read(&plan.archive).unwrap();
        let first = list(&plan.final_dir);

        let again = merge(&plan).unwrap();
        assert_eq!(list(&plan.final_dir), first);
        assert!(again.removed.is_empty());
        assert_eq!(fs::read(&plan.archive).unwrap(), first_archive);
    }

    #[test]
    fn missing_shard_output_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut plan = two_shard_plan(tmp.path());
        write(&plan.final_dir.join("keep.h"), "untouched");
        plan.entries[1].source = tmp.path().join("1/never-built.h");

        let err = merge(&plan).unwrap_err();
        assert!(matches!(err, MergeError::MissingShardOutput(_)));
        assert_eq!(list(&plan.final_dir), ["keep.h"]);
        assert!(!plan.archive.exists());
    }

    #[test]
    fn escaping_or_duplicate_entries_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut plan = two_shard_plan(tmp.path());
        plan.entries[1].dest = "../escape.h".into();
        assert!(matches!(merge(&plan), Err(MergeError::InvalidEntry(_))));

        plan.entries[1].dest = "a.h".into();
        assert!(matches!(merge(&plan), Err(MergeError::InvalidEntry(_))));
    }

    #[test]
    fn failed_shard_blocks_merge() {
        let tmp = TempDir::new().unwrap();
        let plan = two_shard_plan(tmp.path());
        plan.check_ready(&[0, 1]).unwrap();
        let err = plan.check_ready(&[1]).unwrap_err();
        assert!(matches!(err, MergeError::IncompleteShards(ref s) if s == &[0]));
    }
}
