//! Sandbox executor.
//!
//! Compiles and runs one snippet under one toolchain configuration in a
//! fresh, exclusively-owned working area with resource limits applied
//! before the child begins running untrusted code.

pub mod executor;
pub mod output;
pub mod workspace;

pub use executor::{CompileRecord, KillReport, RawResult, RunRecord, SandboxExecutor};
pub use output::{CapturedStream, StreamIntegrity};
pub use workspace::CellWorkspace;
