//! Command-line interface definitions for gensynth.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Build-action synthesizer for genrule/gensrcs rules.
#[derive(Parser)]
#[command(name = "gensynth", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Print only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print every task and step timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Substitute placeholders for tools and sources with no producer.
    #[arg(long, global = true)]
    pub allow_missing_deps: bool,

    /// Root of the build output tree (overrides the manifest's `out_dir`).
    #[arg(long, global = true)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate every rule in a manifest and emit the task plan as JSON.
    Plan(PlanArgs),
    /// Merge the sharded outputs of one rule from an emitted plan.
    Merge(MergeArgs),
    /// Evaluate a manifest and report errors without emitting anything.
    Check(CheckArgs),
}

/// Arguments for the `plan` subcommand.
#[derive(Parser)]
pub struct PlanArgs {
    /// Rule manifest (TOML).
    pub manifest: PathBuf,

    /// Write the plan here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the `merge` subcommand.
#[derive(Parser)]
pub struct MergeArgs {
    /// Plan previously written by `gensynth plan`.
    pub plan: PathBuf,

    /// Name of the rule to merge.
    #[arg(long)]
    pub rule: String,

    /// Index of a shard task that failed; may be repeated.
    #[arg(long = "failed-shard")]
    pub failed_shards: Vec<usize>,
}

/// Arguments for the `check` subcommand.
#[derive(Parser)]
pub struct CheckArgs {
    /// Rule manifest (TOML).
    pub manifest: PathBuf,
}
