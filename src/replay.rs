//! Replay of recorded request traces through a limiter.
//!
//! A trace is JSON lines, one request per line:
//!
//! ```text
//! {"identity": {"anonymous": "203.0.113.7"}, "at": "2024-03-01T12:00:00Z"}
//! {"identity": {"authenticated": "abc"}, "at": "2024-03-01T12:00:01Z"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Each request yields
//! one decision line on the output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{AdmissionDecision, ClientIdentity, RateLimiter, TimeWindow};

/// One recorded request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceRecord {
    pub identity: ClientIdentity,
    pub at: DateTime<Utc>,
}

/// One decision written to the output.
#[derive(Debug, Serialize)]
pub struct DecisionRecord<'a> {
    pub identity: &'a ClientIdentity,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub decision: AdmissionDecision,
}

/// Totals for a replayed trace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub requests: u64,
    pub allowed: u64,
    pub denied_minute: u64,
    pub denied_day: u64,
}

impl ReplaySummary {
    fn record(&mut self, decision: &AdmissionDecision) {
        self.requests += 1;
        match decision.limit_kind() {
            None => self.allowed += 1,
            Some(TimeWindow::Minute) => self.denied_minute += 1,
            Some(TimeWindow::Day) => self.denied_day += 1,
        }
    }
}

/// Parse a single trace line.
pub fn parse_record(line: &str, line_no: usize) -> Result<TraceRecord> {
    serde_json::from_str(line).map_err(|source| GatekeeperError::Trace {
        line: line_no,
        source,
    })
}

/// Feed every request in `input` through `limiter`, writing decisions to
/// `output`.
///
/// Timestamps for one identity must not go backwards.
pub async fn replay<R, W>(limiter: &RateLimiter, input: R, mut output: W) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut line_no = 0;
    let mut summary = ReplaySummary::default();

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record = parse_record(line, line_no)?;
        let decision = limiter.check_and_increment(&record.identity, record.at);
        summary.record(&decision);

        trace!(line = line_no, identity = %record.identity, ?decision, "Replayed request");

        let mut encoded = serde_json::to_vec(&DecisionRecord {
            identity: &record.identity,
            at: record.at,
            decision,
        })?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
    }

    output.flush().await?;
    Ok(summary)
}
