//! Build-action synthesis for command-template rules.
//!
//! Turns a `genrule` or `gensrcs` definition with already-resolved
//! dependencies into concrete, sandboxed tasks: location labels are bound,
//! command templates expanded, per-file rules split into shards, and
//! sharded outputs merged back into one directory.
//!
//! The crate never executes commands itself. [`generate`] produces a
//! [`GeneratedRule`] describing the tasks; [`merge::merge`] runs the merge
//! step once every shard task has finished.

pub mod config;
pub mod error;
pub mod expand;
pub mod generate;
pub mod label;
pub mod merge;
pub mod registry;
pub mod sandbox;
pub mod shard;
pub mod shell;
pub mod task;

pub use config::{RuleDef, RuleKind};
pub use error::{ErrorKind, GenerateError, MergeError, RuleError};
pub use generate::{GenerateOptions, GeneratedRule, generate};
pub use label::ResolveMode;
pub use merge::MergePlan;
pub use registry::RuleRegistry;
pub use task::Task;
