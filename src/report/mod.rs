//! Conformance reporting.
//!
//! Aggregates per-cell outcomes into a per-snippet divergence report.
//! Every run produces an independent, fully attributed result set;
//! repeated runs are never merged, so a flaky cell stays visible as
//! disagreement between reports instead of vanishing into one.

use crate::classify::Outcome;
use crate::matrix::CellResult;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Snippet-level rollup of its per-configuration outcomes.
///
/// Divergence dominates; a snippet with no judgeable cell at all is
/// AllInconclusive; otherwise every judged cell matched.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnippetSummary {
    AllMatched,
    SomeDiverged,
    AllInconclusive,
}

/// All outcomes for one snippet across the configuration axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnippetReport {
    pub snippet_id: String,
    pub summary: SnippetSummary,
    pub cells: Vec<CellResult>,
}

/// Totals across the whole matrix.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ReportTotals {
    pub matched: usize,
    pub diverged: usize,
    pub inconclusive: usize,
}

/// The aggregated conformance report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub snippets: Vec<SnippetReport>,
    pub totals: ReportTotals,
}

impl Report {
    /// Group results by snippet, preserving the scheduler's
    /// deterministic (snippet, configuration) ordering.
    pub fn aggregate(results: Vec<CellResult>) -> Self {
        let mut snippets: Vec<SnippetReport> = Vec::new();
        let mut totals = ReportTotals::default();

        for result in results {
            match &result.outcome {
                Outcome::Matched => totals.matched += 1,
                Outcome::Diverged(_) => totals.diverged += 1,
                Outcome::Inconclusive(_) => totals.inconclusive += 1,
            }

            match snippets.last_mut() {
                Some(report) if report.snippet_id == result.snippet_id => {
                    report.cells.push(result);
                }
                _ => snippets.push(SnippetReport {
                    snippet_id: result.snippet_id.clone(),
                    summary: SnippetSummary::AllInconclusive,
                    cells: vec![result],
                }),
            }
        }

        for report in &mut snippets {
            report.summary = summarize(&report.cells);
        }

        Self { snippets, totals }
    }

    /// Drives the run's non-zero exit status.
    pub fn has_divergence(&self) -> bool {
        self.snippets
            .iter()
            .any(|s| s.summary == SnippetSummary::SomeDiverged)
    }

    /// Machine-readable output: one JSON record per execution cell,
    /// each carrying its snippet's summary for downstream rendering.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> io::Result<()> {
        #[derive(Serialize)]
        struct CellRecord<'a> {
            snippet_id: &'a str,
            configuration_id: &'a str,
            snippet_summary: SnippetSummary,
            #[serde(flatten)]
            outcome: &'a Outcome,
        }

        for snippet in &self.snippets {
            for cell in &snippet.cells {
                let record = CellRecord {
                    snippet_id: &cell.snippet_id,
                    configuration_id: &cell.configuration_id,
                    snippet_summary: snippet.summary,
                    outcome: &cell.outcome,
                };
                serde_json::to_writer(&mut writer, &record)
                    .map_err(io::Error::from)?;
                writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

fn summarize(cells: &[CellResult]) -> SnippetSummary {
    if cells.iter().any(|c| c.outcome.is_diverged()) {
        return SnippetSummary::SomeDiverged;
    }
    if cells.iter().all(|c| c.outcome.is_inconclusive()) {
        return SnippetSummary::AllInconclusive;
    }
    // Inconclusive cells stay individually visible; they do not block a
    // matched verdict when every judgeable cell agreed.
    SnippetSummary::AllMatched
}
