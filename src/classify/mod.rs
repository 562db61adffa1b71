//! Outcome classification.
//!
//! Maps one raw execution observation against the snippet's declared
//! expectation. Pure and deterministic: the verdict is a function of
//! (expectation, raw result) alone, with no hidden state, and an
//! expectation is never adjusted to fit what was observed.
//!
//! Tolerance is the whole point of the undefined category: a snippet
//! declared undefined never diverges merely for producing *some*
//! output. Divergence there is reserved for outcomes the catalog
//! explicitly forbids (named signals, hangs). Environmental failures
//! are Inconclusive, never a pass and never a false alarm.

use crate::catalog::Expectation;
use crate::sandbox::{RawResult, RunRecord, StreamIntegrity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized verdict for one execution cell.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Observed behavior is consistent with the declared expectation.
    Matched,
    /// Observed behavior contradicts the declared expectation.
    Diverged(String),
    /// The cell could not be judged: environmental failure, truncated
    /// evidence, or cancellation. Not a behavioral claim.
    Inconclusive(String),
}

impl Outcome {
    pub fn is_diverged(&self) -> bool {
        matches!(self, Outcome::Diverged(_))
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Outcome::Inconclusive(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Matched => write!(f, "matched"),
            Outcome::Diverged(detail) => write!(f, "diverged: {detail}"),
            Outcome::Inconclusive(reason) => write!(f, "inconclusive: {reason}"),
        }
    }
}

/// Pure classifier over (expectation, raw result).
pub struct OutcomeClassifier;

impl OutcomeClassifier {
    pub fn classify(expectation: &Expectation, raw: &RawResult) -> Outcome {
        // Cancellation and compiler hangs poison the evidence for every
        // expectation shape; nothing observed afterwards is attributable
        // to the snippet.
        if raw.cancelled {
            return Outcome::Inconclusive("run cancelled before completion".to_string());
        }
        if raw.compile.timed_out {
            return Outcome::Inconclusive(format!(
                "compiler timed out after {}ms",
                raw.compile.duration_ms
            ));
        }

        match expectation {
            Expectation::MustCompile => {
                if raw.compile.success {
                    Outcome::Matched
                } else {
                    Outcome::Diverged(format!(
                        "expected compile success; compiler said: {}",
                        first_line(&raw.compile.diagnostics)
                    ))
                }
            }

            Expectation::MustNotCompile {
                diagnostic_contains,
            } => {
                if raw.compile.success {
                    return Outcome::Diverged("expected compile failure".to_string());
                }
                match diagnostic_contains {
                    Some(needle) if !raw.compile.diagnostics.contains(needle.as_str()) => {
                        Outcome::Inconclusive(format!(
                            "compilation failed, but not for the declared reason \
                             (diagnostics lack \"{needle}\")"
                        ))
                    }
                    _ => Outcome::Matched,
                }
            }

            Expectation::DefinedOutcome {
                expected_stdout,
                expected_exit_code,
            } => {
                let run = match require_run(raw) {
                    Ok(run) => run,
                    Err(outcome) => return outcome,
                };
                if run.timed_out {
                    return Outcome::Diverged(format!(
                        "expected a defined outcome but execution hung past the {}ms limit",
                        run.wall_time_ms
                    ));
                }
                if let Some(signal) = run.signal {
                    return Outcome::Diverged(format!(
                        "expected exit code {expected_exit_code}, process was killed by signal {signal}"
                    ));
                }
                if run.stdout_integrity == StreamIntegrity::TruncatedByLimit {
                    // Cannot compare against a truncated transcript.
                    return Outcome::Inconclusive(
                        "stdout truncated at the byte cap; comparison unreliable".to_string(),
                    );
                }
                let exit_code = run.exit_code.unwrap_or(-1);
                if run.stdout == *expected_stdout && exit_code == *expected_exit_code {
                    Outcome::Matched
                } else {
                    Outcome::Diverged(outcome_diff(
                        expected_stdout,
                        *expected_exit_code,
                        &run.stdout,
                        exit_code,
                    ))
                }
            }

            Expectation::ImplementationDefinedOutcome { allowed_outcomes } => {
                let run = match require_run(raw) {
                    Ok(run) => run,
                    Err(outcome) => return outcome,
                };
                if run.timed_out {
                    return Outcome::Diverged(
                        "outcome outside declared allowed set: execution hung".to_string(),
                    );
                }
                if run.signal.is_some() {
                    return Outcome::Diverged(format!(
                        "outcome outside declared allowed set: killed by signal {}",
                        run.signal.unwrap_or_default()
                    ));
                }
                if run.stdout_integrity == StreamIntegrity::TruncatedByLimit {
                    return Outcome::Inconclusive(
                        "stdout truncated at the byte cap; comparison unreliable".to_string(),
                    );
                }
                let exit_code = run.exit_code.unwrap_or(-1);
                let accepted = allowed_outcomes
                    .iter()
                    .any(|a| a.stdout == run.stdout && a.exit_code == exit_code);
                if accepted {
                    Outcome::Matched
                } else {
                    Outcome::Diverged(format!(
                        "outcome outside declared allowed set: stdout {:?}, exit code {exit_code}",
                        elide(&run.stdout)
                    ))
                }
            }

            Expectation::UndefinedOutcomeTolerant {
                forbidden_signals,
                must_not_hang,
            } => {
                let run = match require_run(raw) {
                    Ok(run) => run,
                    Err(outcome) => return outcome,
                };
                if run.timed_out {
                    return if *must_not_hang {
                        Outcome::Diverged(format!(
                            "execution hung past the wall-clock limit ({}ms observed)",
                            run.wall_time_ms
                        ))
                    } else {
                        // A timeout with hangs tolerated is a policy
                        // threshold, not evidence of anything.
                        Outcome::Inconclusive(
                            "timed out; snippet declares hangs tolerable".to_string(),
                        )
                    };
                }
                if let Some(signal) = run.signal {
                    if forbidden_signals.contains(&signal) {
                        return Outcome::Diverged(format!(
                            "forbidden signal {signal} observed"
                        ));
                    }
                }
                Outcome::Matched
            }
        }
    }
}

/// Runtime expectations require a compiled artifact and a run record;
/// anything less is judged here.
fn require_run(raw: &RawResult) -> std::result::Result<&RunRecord, Outcome> {
    if !raw.compile.success {
        return Err(Outcome::Diverged(format!(
            "expected successful compilation; compiler said: {}",
            first_line(&raw.compile.diagnostics)
        )));
    }
    match &raw.run {
        Some(run) => Ok(run),
        None => Err(Outcome::Inconclusive(
            "artifact was never executed".to_string(),
        )),
    }
}

fn outcome_diff(expected_stdout: &str, expected_exit: i32, got_stdout: &str, got_exit: i32) -> String {
    let mut parts = Vec::new();
    if expected_stdout != got_stdout {
        parts.push(format!(
            "stdout: expected {:?}, got {:?}",
            elide(expected_stdout),
            elide(got_stdout)
        ));
    }
    if expected_exit != got_exit {
        parts.push(format!("exit code: expected {expected_exit}, got {got_exit}"));
    }
    parts.join("; ")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("<no diagnostics>")
}

fn elide(text: &str) -> String {
    const MAX: usize = 120;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}
