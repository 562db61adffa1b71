//! Matrix scheduling.
//!
//! Expands the cross-product of snippets and configurations into
//! execution cells and dispatches them across a bounded worker pool.
//! Workers share nothing but the job channel; each cell's workspace and
//! child process are exclusively owned by the worker running it.
//!
//! Execution order between cells is unconstrained. Results are sorted
//! back into (snippet, configuration) catalog order so two runs of the
//! same matrix produce reports in the same shape regardless of which
//! worker finished first.

use crate::catalog::Snippet;
use crate::classify::{Outcome, OutcomeClassifier};
use crate::config::{Configuration, Limits};
use crate::sandbox::{RawResult, SandboxExecutor};
use crate::types::{CancelToken, ExecError, HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One (snippet, configuration) pairing; the unit of scheduled work.
/// Created at matrix-expansion time, consumed once its outcome is
/// recorded.
#[derive(Clone, Debug)]
struct ExecutionCell {
    snippet_index: usize,
    configuration_index: usize,
}

/// Fully attributed result of one cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellResult {
    pub snippet_id: String,
    pub configuration_id: String,
    pub outcome: Outcome,
    /// Raw observation backing the outcome; absent when the cell never
    /// produced one (toolchain missing, setup failure, skipped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawResult>,
}

/// Scheduler knobs. Concurrency caps simultaneously running sandboxes
/// so the matrix cannot oversubscribe host CPU and memory.
#[derive(Clone, Debug)]
pub struct MatrixOptions {
    pub concurrency: usize,
    pub limits: Limits,
    /// Global deadline for the whole matrix; in-flight cells past it
    /// are forcibly terminated and recorded Inconclusive.
    pub deadline: Option<Duration>,
    /// Base directory for per-cell workspaces.
    pub workspace_root: PathBuf,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            limits: Limits::default(),
            deadline: None,
            workspace_root: std::env::temp_dir().join("specbox"),
        }
    }
}

/// Seam between the scheduler and the sandbox; lets scheduler behavior
/// be exercised without spawning real processes.
pub trait CellRunner: Send + Sync {
    fn run_cell(
        &self,
        snippet: &Snippet,
        configuration: &Configuration,
        limits: &Limits,
        cancel: &CancelToken,
    ) -> std::result::Result<RawResult, ExecError>;
}

impl CellRunner for SandboxExecutor {
    fn run_cell(
        &self,
        snippet: &Snippet,
        configuration: &Configuration,
        limits: &Limits,
        cancel: &CancelToken,
    ) -> std::result::Result<RawResult, ExecError> {
        self.run(snippet, configuration, limits, cancel)
    }
}

/// Run the full matrix with the real sandbox executor.
pub fn run_matrix(
    snippets: &[Snippet],
    configurations: &[Configuration],
    options: &MatrixOptions,
) -> Result<Vec<CellResult>> {
    let executor = SandboxExecutor::new(options.workspace_root.clone())?;
    run_matrix_with(&executor, snippets, configurations, options)
}

/// Run the matrix against an injected runner.
pub fn run_matrix_with(
    runner: &dyn CellRunner,
    snippets: &[Snippet],
    configurations: &[Configuration],
    options: &MatrixOptions,
) -> Result<Vec<CellResult>> {
    if configurations.is_empty() {
        // A zero-configuration matrix is a usage error, not an empty
        // success.
        return Err(HarnessError::NoConfigurations);
    }

    let cancel = match options.deadline {
        Some(deadline) => CancelToken::with_deadline(deadline),
        None => CancelToken::new(),
    };

    // Probe each toolchain once up front. A missing toolchain degrades
    // coverage for its configuration only; sibling cells proceed.
    let mut unavailable: HashMap<usize, String> = HashMap::new();
    for (index, configuration) in configurations.iter().enumerate() {
        if let Err(e) = configuration.probe() {
            log::warn!("configuration '{}' skipped: {e}", configuration.id);
            unavailable.insert(index, e.to_string());
        }
    }

    let mut results: Vec<(usize, usize, CellResult)> = Vec::new();
    let mut cells: Vec<ExecutionCell> = Vec::new();

    for (snippet_index, snippet) in snippets.iter().enumerate() {
        for (configuration_index, configuration) in configurations.iter().enumerate() {
            if let Some(reason) = unavailable.get(&configuration_index) {
                results.push((
                    snippet_index,
                    configuration_index,
                    CellResult {
                        snippet_id: snippet.id.clone(),
                        configuration_id: configuration.id.clone(),
                        outcome: Outcome::Inconclusive(reason.clone()),
                        raw: None,
                    },
                ));
                continue;
            }
            if !configuration.standard.satisfies(snippet.standard) {
                // Full cross-product discipline: the cell still exists
                // and still gets exactly one outcome, it just never
                // reaches a sandbox.
                results.push((
                    snippet_index,
                    configuration_index,
                    CellResult {
                        snippet_id: snippet.id.clone(),
                        configuration_id: configuration.id.clone(),
                        outcome: Outcome::Inconclusive(format!(
                            "configuration standard {:?} does not satisfy snippet requirement {:?}",
                            configuration.standard, snippet.standard
                        )),
                        raw: None,
                    },
                ));
                continue;
            }
            cells.push(ExecutionCell {
                snippet_index,
                configuration_index,
            });
        }
    }

    log::info!(
        "matrix: {} snippets x {} configurations, {} dispatchable cells, concurrency {}",
        snippets.len(),
        configurations.len(),
        cells.len(),
        options.concurrency
    );

    let workers = options.concurrency.max(1).min(cells.len().max(1));
    let (job_tx, job_rx) = crossbeam_channel::bounded::<ExecutionCell>(cells.len().max(1));
    let (result_tx, result_rx) =
        crossbeam_channel::unbounded::<(usize, usize, CellResult)>();

    for cell in cells {
        // Bounded to the cell count, so this never blocks.
        if job_tx.send(cell).is_err() {
            break;
        }
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let limits = options.limits.clone();
            scope.spawn(move || {
                while let Ok(cell) = job_rx.recv() {
                    let snippet = &snippets[cell.snippet_index];
                    let configuration = &configurations[cell.configuration_index];

                    let outcome = if cancel.is_cancelled() {
                        CellResult {
                            snippet_id: snippet.id.clone(),
                            configuration_id: configuration.id.clone(),
                            outcome: Outcome::Inconclusive(
                                "cancelled before the cell started".to_string(),
                            ),
                            raw: None,
                        }
                    } else {
                        run_one(&*runner, snippet, configuration, &limits, &cancel)
                    };

                    if result_tx
                        .send((cell.snippet_index, cell.configuration_index, outcome))
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        // The scope borrows the results vec only here, after all
        // senders are dropped, so this drains to completion.
        for triple in result_rx.iter() {
            results.push(triple);
        }
    });

    results.sort_by_key(|(snippet_index, configuration_index, _)| {
        (*snippet_index, *configuration_index)
    });
    Ok(results.into_iter().map(|(_, _, result)| result).collect())
}

fn run_one(
    runner: &dyn CellRunner,
    snippet: &Snippet,
    configuration: &Configuration,
    limits: &Limits,
    cancel: &CancelToken,
) -> CellResult {
    log::debug!("cell start: {} / {}", snippet.id, configuration.id);
    let (outcome, raw) = match runner.run_cell(snippet, configuration, limits, cancel) {
        Ok(raw) => {
            let outcome = OutcomeClassifier::classify(&snippet.expectation, &raw);
            (outcome, Some(raw))
        }
        // Both executor failures are environmental, never behavioral.
        Err(e @ ExecError::ToolchainUnavailable(_)) => {
            (Outcome::Inconclusive(e.to_string()), None)
        }
        Err(e @ ExecError::SandboxSetupFailed(_)) => {
            (Outcome::Inconclusive(e.to_string()), None)
        }
    };
    log::debug!(
        "cell done: {} / {} -> {}",
        snippet.id,
        configuration.id,
        outcome
    );
    CellResult {
        snippet_id: snippet.id.clone(),
        configuration_id: configuration.id.clone(),
        outcome,
        raw,
    }
}
