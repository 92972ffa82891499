//! gensynth: synthesize build actions from command-template rules.
//!
//! Pipeline: load manifest → evaluate every rule → emit the JSON task plan.
//! After the executor has run the shard tasks of a per-file rule, `merge`
//! reassembles their outputs from the same plan.

mod cli;
mod manifest;
mod verbose;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use gensynth_core::{GenerateOptions, GeneratedRule, ResolveMode, RuleRegistry, generate};
use serde::{Deserialize, Serialize};

use manifest::Manifest;
use verbose::{Timer, dprintln, vprintln};

/// The emitted plan: every generated rule of one manifest.
#[derive(Debug, Serialize, Deserialize)]
struct Plan {
    rules: Vec<GeneratedRule>,
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    match cli.command {
        cli::Command::Plan(ref args) => cmd_plan(&cli, args),
        cli::Command::Merge(ref args) => cmd_merge(args),
        cli::Command::Check(ref args) => cmd_check(&cli, args),
    }
}

/// Resolve build-wide options from the manifest and global flags.
fn options(cli: &cli::Cli, manifest: &Manifest) -> GenerateOptions {
    let mode = if cli.allow_missing_deps || manifest.allow_missing_dependencies {
        ResolveMode::AllowMissing
    } else {
        ResolveMode::Strict
    };
    GenerateOptions {
        out_dir: cli.out_dir.clone().unwrap_or_else(|| manifest.out_dir.clone()),
        mode,
    }
}

/// Evaluate every rule, reporting each failure. Unrelated rules are still
/// evaluated after one fails.
fn evaluate(cli: &cli::Cli, path: &Path) -> Result<Vec<GeneratedRule>> {
    let manifest = Manifest::load(path)?;
    let opts = options(cli, &manifest);
    let _t = Timer::start("rule evaluation");

    let mut registry = RuleRegistry::new();
    let mut generated = Vec::with_capacity(manifest.rules.len());
    let mut failed = 0usize;

    for rule in &manifest.rules {
        match generate(rule, &mut registry, &opts) {
            Ok(g) => {
                dprintln!("  Planned {} ({} tasks)", g.name, g.tasks.len());
                for task in &g.tasks {
                    vprintln!("    {}: {}", task.name, task.description);
                }
                if !g.missing_dependencies.is_empty() {
                    vprintln!("    missing: {}", g.missing_dependencies.join(", "));
                }
                generated.push(g);
            }
            Err(e) => {
                eprintln!("error: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} rules failed", manifest.rules.len());
    }
    Ok(generated)
}

/// Evaluate a manifest and emit the task plan.
fn cmd_plan(cli: &cli::Cli, args: &cli::PlanArgs) -> Result<()> {
    let rules = evaluate(cli, &args.manifest)?;
    let count = rules.len();
    let json = serde_json::to_string_pretty(&Plan { rules }).context("failed to serialize plan")?;

    match args.output {
        Some(ref out) => {
            write_atomic(out, &json)?;
            dprintln!("\nWrote plan for {count} rules to {}", out.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Evaluate a manifest without emitting anything.
fn cmd_check(cli: &cli::Cli, args: &cli::CheckArgs) -> Result<()> {
    let rules = evaluate(cli, &args.manifest)?;
    let tasks: usize = rules.iter().map(|r| r.tasks.len()).sum();
    eprintln!("\nCheck complete. ({} rules, {tasks} tasks)", rules.len());
    Ok(())
}

/// Merge the sharded outputs of one rule.
fn cmd_merge(args: &cli::MergeArgs) -> Result<()> {
    let text = fs::read_to_string(&args.plan)
        .with_context(|| format!("failed to read plan: {}", args.plan.display()))?;
    let plan: Plan = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse plan: {}", args.plan.display()))?;

    let Some(rule) = plan.rules.iter().find(|r| r.name == args.rule) else {
        bail!("rule '{}' is not in {}", args.rule, args.plan.display());
    };
    let Some(ref merge) = rule.merge else {
        bail!("rule '{}' has no merge step", args.rule);
    };

    let succeeded: Vec<usize> = (0..merge.shard_count)
        .filter(|i| !args.failed_shards.contains(i))
        .collect();
    merge
        .check_ready(&succeeded)
        .with_context(|| format!("cannot merge rule '{}'", args.rule))?;

    let _t = Timer::start(format!("merge {}", rule.name));
    let merged = gensynth_core::merge::merge(merge)
        .with_context(|| format!("failed to merge rule '{}'", args.rule))?;
    for path in &merged.removed {
        vprintln!("    removed stale {}", path.display());
    }
    dprintln!(
        "  Merged {} ({} files into {})",
        rule.name,
        merged.files.len(),
        merge.final_dir.display()
    );
    Ok(())
}

/// Write `contents` to `path` via a temporary file and rename.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut tmp_path = PathBuf::from(path);
    tmp_path.as_mut_os_string().push(".tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;
    Ok(())
}
