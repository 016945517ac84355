//! Audit records and sinks.
//!
//! Every evaluated request produces exactly one [`AuditRecord`]. Sinks are
//! write-only: the pipeline logs a sink failure and carries on, it never
//! fails a request because the audit trail is unavailable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use riskgate_core::{AggregatedRiskScore, HardBlock, RequestContext, RiskScore, ShadowAgentResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::resilience::{CircuitSnapshot, LlmUsage};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write audit record: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Block => write!(f, "block"),
        }
    }
}

/// Everything decided about one request.
///
/// Carries scores and findings metadata only; no request text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub rule_version: String,
    pub decision: Decision,
    pub block_reason: Option<String>,
    pub hard_block: Option<HardBlock>,
    pub risk_scores: Vec<RiskScore>,
    pub aggregated_risk: Option<AggregatedRiskScore>,
    pub shadow_escalated: bool,
    pub shadow_results: Vec<ShadowAgentResult>,
    pub llm_usage: LlmUsage,
    pub circuit_breakers: Vec<CircuitSnapshot>,
    pub context: RequestContext,
    pub latency_ms: u64,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Emits each record as a structured `tracing` event on the
/// `riskgate::audit` target, with the full record as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;
        tracing::info!(
            target: "riskgate::audit",
            request_id = %record.request_id,
            decision = %record.decision,
            block_reason = record.block_reason.as_deref().unwrap_or(""),
            risk_score = record.aggregated_risk.as_ref().map(|a| a.overall_risk_score),
            shadow_escalated = record.shadow_escalated,
            rule_version = %record.rule_version,
            record = %json,
            "Request evaluated"
        );
        Ok(())
    }
}

/// Keeps records in memory. Useful in tests and for short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Writes one JSON document per line.
pub struct JsonLinesAuditSink<W> {
    writer: tokio::sync::Mutex<W>,
}

impl<W> JsonLinesAuditSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesAuditSink<tokio::fs::File> {
    /// Append to a file, creating it if needed.
    pub async fn append(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl<W> AuditSink for JsonLinesAuditSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl<W> std::fmt::Debug for JsonLinesAuditSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> AuditRecord {
        AuditRecord {
            request_id: id.to_string(),
            timestamp: Utc::now(),
            rule_version: "builtin-1".to_string(),
            decision: Decision::Allow,
            block_reason: None,
            hard_block: None,
            risk_scores: Vec::new(),
            aggregated_risk: None,
            shadow_escalated: false,
            shadow_results: Vec::new(),
            llm_usage: LlmUsage::default(),
            circuit_breakers: Vec::new(),
            context: RequestContext::for_user("u1"),
            latency_ms: 3,
        }
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.record(&record("r1")).await.unwrap();
        sink.record(&record("r2")).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[1].request_id, "r2");
        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_json_lines_sink() {
        let sink = JsonLinesAuditSink::new(Vec::<u8>::new());
        sink.record(&record("r1")).await.unwrap();
        sink.record(&record("r2")).await.unwrap();

        let bytes = sink.into_inner();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.request_id, "r1");
        assert_eq!(parsed.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_records() {
        assert!(TracingAuditSink.record(&record("r1")).await.is_ok());
    }
}
