//! Deterministic partitioning of per-file rule inputs into shards.
//!
//! A shard is processed by one task. When more than one shard exists, each
//! shard writes into its own numbered directory under the rule's gen
//! directory and the merge step later reassembles the final layout.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::config::SrcFile;

/// Maximum number of inputs per shard unless the rule overrides it.
pub const DEFAULT_SHARD_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// Subdirectory of the gen directory holding per-file rule outputs.
pub const GENSRCS_SUBDIR: &str = "gensrcs";

/// Ordered, non-empty, contiguous partitions of a source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan<T> {
    shards: Vec<Vec<T>>,
}

impl<T> ShardPlan<T> {
    /// The shards, in order.
    pub fn shards(&self) -> &[Vec<T>] {
        &self.shards
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Returns `true` if there were no sources to partition.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Sharding is active only when the sources did not fit in one shard.
    pub fn is_active(&self) -> bool {
        self.shards.len() > 1
    }
}

/// Partition `sources` into groups of at most `max_shard_size`.
///
/// Pure: the same inputs always produce the same plan.
pub fn plan<T: Clone>(sources: &[T], max_shard_size: NonZeroUsize) -> ShardPlan<T> {
    ShardPlan {
        shards: sources
            .chunks(max_shard_size.get())
            .map(<[T]>::to_vec)
            .collect(),
    }
}

/// Where a single output is produced and where it finally lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutput {
    /// Path written by the shard's task.
    pub shard_path: PathBuf,
    /// Unified path independent of the shard index.
    pub final_path: PathBuf,
}

/// A shard together with its sandbox directory and output names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    /// Position of this shard.
    pub index: usize,
    /// Total number of shards in the plan.
    pub count: usize,
    /// `<gen>/<index>` when sharded, else `<gen>/gensrcs`.
    pub sandbox_dir: PathBuf,
    /// Sources handled by this shard.
    pub inputs: Vec<SrcFile>,
    /// One output per input, in input order.
    pub outputs: Vec<ShardOutput>,
}

impl ShardAssignment {
    /// Returns `true` if outputs must be merged into their final location.
    pub fn needs_merge(&self) -> bool {
        self.count > 1
    }
}

/// Compute sandbox directories and output names for every shard of `plan`.
pub fn assign(plan: &ShardPlan<SrcFile>, gen_dir: &Path, output_extension: &str) -> Vec<ShardAssignment> {
    let count = plan.len();
    let final_dir = gen_dir.join(GENSRCS_SUBDIR);

    plan.shards()
        .iter()
        .enumerate()
        .map(|(index, shard)| {
            let sandbox_dir = if plan.is_active() {
                gen_dir.join(index.to_string())
            } else {
                final_dir.clone()
            };
            let outputs = shard
                .iter()
                .map(|src| {
                    let rel = replace_extension(&src.rel, output_extension);
                    ShardOutput {
                        shard_path: sandbox_dir.join(&rel),
                        final_path: final_dir.join(&rel),
                    }
                })
                .collect();
            ShardAssignment {
                index,
                count,
                sandbox_dir,
                inputs: shard.clone(),
                outputs,
            }
        })
        .collect()
}

/// Replace the last extension of `path` (if any) with `ext`.
pub fn replace_extension(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}
