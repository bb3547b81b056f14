//! Audit and Performance Logging
//!
//! Appends one decision record per request to the audit log and one
//! timing sample per request to the timing log. Both streams are
//! line-oriented and delimited so external tooling can parse them without
//! a schema registry.
//!
//! All appends flow through a single writer task fed by a bounded channel,
//! so concurrent evaluations never interleave bytes inside a record. The
//! sink is strictly best-effort: a full queue or an unwritable file drops
//! the record with a `tracing` warning and never delays or alters the
//! verdict.

use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::AuditConfig;
use crate::decision::Verdict;
use crate::request::RequestRecord;

/// Per-phase wall-clock timings for one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    pub extract: Duration,
    pub score_network: Duration,
    pub score_content: Duration,
    pub total: Duration,
}

enum AuditEvent {
    Lines { audit: String, timing: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit/timing writer task.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditSink {
    /// Start the writer task. Never fails: an unusable log path degrades
    /// the sink to tracing-only output.
    pub fn spawn(config: &AuditConfig) -> Self {
        if !config.enabled {
            return Self { tx: None };
        }

        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        tokio::spawn(writer_task(
            rx,
            config.audit_log.clone(),
            config.timing_log.clone(),
        ));
        Self { tx: Some(tx) }
    }

    /// A disabled sink that drops everything, for callers that opt out.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueue one decision record and one timing sample.
    pub fn record(&self, record: &RequestRecord, verdict: &Verdict, timings: &PhaseTimings) {
        let Some(tx) = &self.tx else { return };

        let event = AuditEvent::Lines {
            audit: format_audit_line(record, verdict, timings),
            timing: format_timing_line(verdict, timings),
        };
        if let Err(err) = tx.try_send(event) {
            warn!(error = %err, "audit sink backlogged, dropping record");
        }
    }

    /// Wait until everything enqueued so far is on disk.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else { return };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(AuditEvent::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn writer_task(mut rx: mpsc::Receiver<AuditEvent>, audit_path: PathBuf, timing_path: PathBuf) {
    let mut audit_file = open_append(&audit_path).await;
    let mut timing_file = open_append(&timing_path).await;

    while let Some(event) = rx.recv().await {
        match event {
            AuditEvent::Lines { audit, timing } => {
                append(&mut audit_file, &audit_path, &audit).await;
                append(&mut timing_file, &timing_path, &timing).await;
            }
            AuditEvent::Flush(ack) => {
                if let Some(file) = audit_file.as_mut() {
                    let _ = file.flush().await;
                }
                if let Some(file) = timing_file.as_mut() {
                    let _ = file.flush().await;
                }
                let _ = ack.send(());
            }
        }
    }
}

async fn open_append(path: &Path) -> Option<tokio::fs::File> {
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "log file unavailable, records will be dropped"
            );
            None
        }
    }
}

async fn append(file: &mut Option<tokio::fs::File>, path: &Path, line: &str) {
    if let Some(f) = file {
        if let Err(err) = f.write_all(line.as_bytes()).await {
            warn!(path = %path.display(), error = %err, "log append failed, disabling file");
            *file = None;
        }
    }
}

/// One decision record:
/// `ts|remote|method|uri|net_score|content_score|blocked|reason|total_us|extract_us|net_us|content_us`
fn format_audit_line(record: &RequestRecord, verdict: &Verdict, timings: &PhaseTimings) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        sanitize(&record.remote_addr),
        sanitize(&record.method),
        sanitize(&record.uri),
        format_score(verdict.network_score),
        format_score(verdict.content_score),
        verdict.blocked,
        verdict.reason,
        timings.total.as_micros(),
        timings.extract.as_micros(),
        timings.score_network.as_micros(),
        timings.score_content.as_micros(),
    )
}

/// One timing sample: `unix_ts,total_secs,blocked`
fn format_timing_line(verdict: &Verdict, timings: &PhaseTimings) -> String {
    let unix_ts = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    format!(
        "{:.6},{:.6},{}\n",
        unix_ts,
        timings.total.as_secs_f64(),
        verdict.blocked
    )
}

fn format_score(score: Option<f32>) -> String {
    match score {
        Some(value) => format!("{value:.6}"),
        None => "-".to_string(),
    }
}

/// Request fields land inside a delimited line; the delimiter and line
/// breaks must not survive in them.
fn sanitize(field: &str) -> String {
    field.replace(['|', '\n', '\r'], "_")
}
