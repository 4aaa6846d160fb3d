//! Remote SQL-over-HTTP transport
//!
//! A `POST /v2/pipeline` client implementing the libSQL "Hrana" subset:
//! type-tagged parameterized args, decimal-string integers, and up to
//! three retry attempts with exponential backoff. This is a transport,
//! not an ORM — callers build `PipelineRequest`s by hand.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{FleetError, Result};

const RETRY_BACKOFFS_MS: [u64; 3] = [100, 200, 400];

/// A single Hrana arg value. Integers are encoded as decimal strings to
/// avoid float precision loss when crossing the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HranaValue {
    Text { value: String },
    Integer { value: String },
    Float { value: f64 },
    Null { value: Option<()> },
    Blob { value: String },
}

impl HranaValue {
    pub fn text(v: impl ToString) -> Self {
        HranaValue::Text { value: v.to_string() }
    }
    pub fn integer(v: i64) -> Self {
        HranaValue::Integer { value: v.to_string() }
    }
    pub fn float(v: f64) -> Self {
        HranaValue::Float { value: v }
    }
    pub fn null() -> Self {
        HranaValue::Null { value: None }
    }

    /// Decodes a result-row cell shaped like a `HranaValue` (the same
    /// type-tagged envelope this module encodes args with) out of a raw
    /// `serde_json::Value`, the way a libSQL `/v2/pipeline` result row
    /// actually comes back over the wire.
    pub fn from_cell(cell: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(cell.clone()).ok()
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HranaValue::Text { value } => Some(value),
            HranaValue::Blob { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HranaValue::Integer { value } => value.parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HranaValue::Float { value } => Some(*value),
            HranaValue::Integer { value } => value.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<HranaValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum PipelineItem {
    Execute { stmt: Statement },
}

#[derive(Debug, Serialize)]
struct PipelineRequest {
    requests: Vec<PipelineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultSet {
    pub cols: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultError {
    pub message: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineResult {
    Ok {
        response: Option<ResultSet>,
        rows_affected: Option<u64>,
    },
    Error {
        error: ResultError,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct PipelineResponse {
    results: Vec<PipelineResult>,
}

/// HTTP client for the remote SQL pipeline. `libsql://` URLs are
/// rewritten to `https://` at construction.
pub struct SqlPipelineClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl SqlPipelineClient {
    pub fn new(database_url: &str, auth_token: Option<String>) -> Self {
        let base_url = if let Some(rest) = database_url.strip_prefix("libsql://") {
            format!("https://{rest}")
        } else {
            database_url.to_string()
        };

        Self {
            http: reqwest::Client::new(),
            base_url,
            auth_token,
        }
    }

    /// Executes a batch of statements in one pipelined request. Retries
    /// up to 3 times with exponential backoff (100/200/400 ms) on
    /// transport-level failure; surfaces the last error after exhaustion.
    pub async fn execute(&self, statements: Vec<Statement>, cancel: &watch::Receiver<bool>) -> Result<Vec<PipelineResult>> {
        let body = PipelineRequest {
            requests: statements.into_iter().map(|stmt| PipelineItem::Execute { stmt }).collect(),
        };

        let mut last_err: Option<FleetError> = None;
        for (attempt, backoff_ms) in std::iter::once(0u64).chain(RETRY_BACKOFFS_MS).enumerate() {
            if *cancel.borrow() {
                return Err(FleetError::Cancelled);
            }
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            match self.try_execute(&body).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    warn!(attempt, error = %e, "sql pipeline attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(FleetError::Transport { status: 0, body: "exhausted retries".to_string() }))
    }

    async fn try_execute(&self, body: &PipelineRequest) -> Result<Vec<PipelineResult>> {
        let mut req = self.http.post(format!("{}/v2/pipeline", self.base_url)).json(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| FleetError::Internal(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(FleetError::Transport { status: status.as_u16(), body: text });
        }

        let parsed: PipelineResponse = resp.json().await.map_err(|e| FleetError::Internal(e.into()))?;
        debug!(count = parsed.results.len(), "sql pipeline response received");
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libsql_url_is_rewritten_to_https() {
        let client = SqlPipelineClient::new("libsql://my-db.turso.io", Some("tok".to_string()));
        assert_eq!(client.base_url, "https://my-db.turso.io");
    }

    #[test]
    fn plain_https_url_is_left_untouched() {
        let client = SqlPipelineClient::new("https://my-db.example.com", None);
        assert_eq!(client.base_url, "https://my-db.example.com");
    }

    #[test]
    fn integer_args_serialize_as_decimal_strings() {
        let arg = HranaValue::integer(42);
        let json = serde_json::to_value(&arg).unwrap();
        assert_eq!(json["value"], serde_json::Value::String("42".to_string()));
        assert_eq!(json["type"], "integer");
    }

    #[test]
    fn result_row_cells_decode_back_through_the_same_tagged_envelope() {
        let cell = serde_json::json!({"type": "integer", "value": "42"});
        let value = HranaValue::from_cell(&cell).unwrap();
        assert_eq!(value.as_i64(), Some(42));
        assert_eq!(value.as_u64(), Some(42));

        let cell = serde_json::json!({"type": "text", "value": "hello"});
        assert_eq!(HranaValue::from_cell(&cell).unwrap().as_text(), Some("hello"));

        let cell = serde_json::json!({"type": "float", "value": 0.6});
        assert_eq!(HranaValue::from_cell(&cell).unwrap().as_f64(), Some(0.6));
    }
}
