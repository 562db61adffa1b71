/// Shared error taxonomy and run-control primitives.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Catalog ingestion failures. Fatal to the whole run: a harness that
/// cannot trust its expectations has nothing meaningful to execute.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("malformed catalog document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("snippet '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error("duplicate snippet identifier '{0}'")]
    DuplicateId(String),
}

/// Per-cell executor failures. Never abort sibling cells; the scheduler
/// records these as Inconclusive outcomes.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The configuration's compiler is missing or not executable.
    /// Degrades coverage for that configuration only.
    #[error("toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    /// Resource-limit enforcement or workspace setup could not be
    /// established. Recorded Inconclusive, never downgraded to a pass.
    #[error("sandbox setup failed: {0}")]
    SandboxSetupFailed(String),
}

/// Run-aborting failures. Everything scoped to a single cell or a single
/// configuration is captured and classified instead of propagated here.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("configuration list is empty; at least one toolchain configuration is required")]
    NoConfigurations,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Cooperative cancellation token observed at every suspension point:
/// compiler wait, child-process wait, and worker-slot wait.
///
/// Cancellation is a propagated signal, not an unwinding exception; an
/// in-flight sandbox that observes it forcibly terminates its child.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Token that trips automatically once the global deadline passes.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
