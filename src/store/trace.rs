//! Per-turn retrieval, trace and error records

use serde::{Deserialize, Serialize};

/// 2D projection of the query embedding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryProjection {
    pub x: f64,
    pub y: f64,
}

/// Retrieval outcome for the current turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagResult {
    /// Clamped to `0.0..=1.0`
    pub confidence: f64,
    pub chunk_ids: Vec<String>,
    pub scores: Vec<f64>,
    pub query_projection: Option<QueryProjection>,
}

impl RagResult {
    pub fn new(
        confidence: f64,
        chunk_ids: Vec<String>,
        scores: Vec<f64>,
        query_projection: Option<QueryProjection>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            confidence,
            chunk_ids,
            scores,
            query_projection,
        }
    }
}

/// Wall-clock span of one node within a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTiming {
    pub node: String,
    pub start_ms: f64,
    pub end_ms: f64,
    pub duration_ms: f64,
}

/// Summary recorded when a turn completes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub timings: Vec<NodeTiming>,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Error reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerError {
    pub code: String,
    pub message: String,
    pub retry_after_seconds: Option<u64>,
}
