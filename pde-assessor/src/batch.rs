//! Batch runs: JSON Lines requests in, one record per request out, in input order.

use std::future::Future;

use anyhow::Context as _;
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::models::{AssessmentRequest, Report, ReportStatus};
use crate::workflow::Assessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON object per line, written as each run finishes
    #[default]
    JsonLines,
    /// A single JSON array written once the batch ends
    Array,
}

/// One input line: a request, or why the line could not be read
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub line: usize,
    pub request: Result<AssessmentRequest, String>,
}

/// What the batch writes for each entry
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchRecord {
    Report(Box<Report>),
    Invalid {
        line: usize,
        status: ReportStatus,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub written: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Parse JSON Lines; blank lines are skipped, unreadable lines become error entries
pub fn parse_requests(input: &str) -> Vec<BatchEntry> {
    input
        .lines()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(index, text)| {
            let request = serde_json::from_str::<AssessmentRequest>(text)
                .map_err(|e| format!("invalid request on line {}: {}", index + 1, e))
                .and_then(|request| {
                    if request.drug_name.trim().is_empty() || request.route.trim().is_empty() {
                        Err(format!("line {} needs both drug_name and route", index + 1))
                    } else {
                        Ok(request)
                    }
                });
            BatchEntry {
                line: index + 1,
                request,
            }
        })
        .collect()
}

/// Run every entry with at most `concurrency` assessments in flight.
///
/// Records come out in input order. When `shutdown` resolves no further runs are
/// started, in-flight runs are dropped, and everything already written stays valid.
pub async fn run_batch<W, S>(
    assessor: &Assessor,
    entries: Vec<BatchEntry>,
    concurrency: usize,
    format: OutputFormat,
    mut out: W,
    shutdown: S,
) -> anyhow::Result<BatchSummary>
where
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut summary = BatchSummary {
        total: entries.len(),
        ..Default::default()
    };
    info!(total = summary.total, concurrency, "batch started");

    let runs = stream::iter(entries)
        .map(|entry| async move {
            match entry.request {
                Ok(request) => BatchRecord::Report(Box::new(assessor.assess(&request).await)),
                Err(message) => BatchRecord::Invalid {
                    line: entry.line,
                    status: ReportStatus::Error,
                    message,
                },
            }
        })
        .buffered(concurrency.max(1))
        .take_until(shutdown);
    let mut runs = std::pin::pin!(runs);

    let mut collected = Vec::new();
    while let Some(record) = runs.next().await {
        match &record {
            BatchRecord::Report(report) => match report.status {
                ReportStatus::Success => summary.succeeded += 1,
                ReportStatus::PartialSuccess => summary.partial += 1,
                ReportStatus::Error => summary.failed += 1,
            },
            BatchRecord::Invalid { .. } => summary.failed += 1,
        }
        summary.written += 1;

        match format {
            OutputFormat::JsonLines => {
                let mut line = serde_json::to_vec(&record).context("failed to serialize report")?;
                line.push(b'\n');
                out.write_all(&line).await.context("failed to write report")?;
                out.flush().await.context("failed to flush output")?;
            }
            OutputFormat::Array => collected.push(record),
        }
    }

    if format == OutputFormat::Array {
        let body = serde_json::to_vec_pretty(&collected).context("failed to serialize reports")?;
        out.write_all(&body).await.context("failed to write reports")?;
        out.flush().await.context("failed to flush output")?;
    }

    summary.cancelled = summary.written < summary.total;
    if summary.cancelled {
        warn!(written = summary.written, total = summary.total, "batch cancelled before all runs finished");
    }
    info!(
        written = summary.written,
        succeeded = summary.succeeded,
        partial = summary.partial,
        failed = summary.failed,
        "batch finished"
    );
    Ok(summary)
}
