//! specbox: a behavioral-conformance harness
//!
//! Ingests a catalog of short code snippets, each annotated with a
//! claimed behavior classification and an expected observable outcome,
//! and empirically verifies those claims by compiling and executing
//! each snippet under a matrix of toolchain configurations inside
//! isolated, resource-bounded sandboxes.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! - [`catalog`]: snippet model, expectation tagged union, eager
//!   validation
//! - [`config`]: toolchain configurations, standards/opt-level axes,
//!   per-cell resource limits
//! - [`sandbox`]: per-cell workspaces, compile-and-run pipeline,
//!   bounded output capture, forced-kill escalation
//! - [`classify`]: pure (expectation, raw result) -> outcome mapping
//! - [`matrix`]: cross-product expansion and bounded worker-pool
//!   dispatch with deterministic result ordering
//! - [`report`]: per-snippet divergence aggregation and JSONL output
//! - [`cli`]: thin command-line wrapper
//!
//! # Design principles
//!
//! 1. **Expectations are declared, never inferred** - a snippet's
//!    contract comes from the catalog alone; observed results never
//!    feed back into it
//! 2. **Undefined is tolerated, not punished** - a snippet declared
//!    undefined diverges only on outcomes the catalog explicitly
//!    forbids
//! 3. **Failures are data** - compile failures, crashes, and timeouts
//!    are classified observations, not control-flow exceptions
//! 4. **Limits before untrusted code** - resource limits are installed
//!    between fork and exec, never racing the child
//! 5. **Partial results are labeled, never discarded** - the report
//!    covers every cell, including the ones that never ran

pub mod catalog;
pub mod classify;
pub mod cli;
pub mod config;
pub mod matrix;
pub mod report;
pub mod sandbox;
pub mod types;

pub use catalog::{Catalog, Expectation, Snippet};
pub use classify::{Outcome, OutcomeClassifier};
pub use config::{Configuration, Limits};
pub use matrix::{run_matrix, CellResult, MatrixOptions};
pub use report::{Report, SnippetSummary};
pub use sandbox::{RawResult, SandboxExecutor};
pub use types::{CancelToken, CatalogError, ExecError, HarnessError};
