//! Cold memory tier
//!
//! Persistent mirror of evicted Warm entries, backed by the remote SQL
//! pipeline. Schema: `cold_memory(id, agent_id, timestamp, event_type,
//! category, content, distilled_summary, importance, access_count,
//! last_accessed, created_at)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::memory::scoring;
use crate::memory::sql_pipeline::{HranaValue, SqlPipelineClient, Statement};

const DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdEntry {
    pub id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub category: String,
    pub content: String,
    pub distilled_summary: String,
    pub importance: f64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Persistent mirror of Warm entries, reached only through the SQL
/// pipeline transport. Every call blocks on the remote HTTP pipeline
/// and is therefore `async`.
pub struct ColdMemory {
    client: SqlPipelineClient,
    agent_id: String,
}

impl ColdMemory {
    pub fn new(client: SqlPipelineClient, agent_id: impl Into<String>) -> Self {
        Self { client, agent_id: agent_id.into() }
    }

    pub async fn ensure_schema(&self, cancel: &watch::Receiver<bool>) -> Result<()> {
        let statements = vec![
            Statement {
                sql: "CREATE TABLE IF NOT EXISTS cold_memory (\
                        id TEXT PRIMARY KEY, agent_id TEXT, timestamp TEXT, event_type TEXT, \
                        category TEXT, content TEXT, distilled_summary TEXT, importance REAL, \
                        access_count INTEGER, last_accessed TEXT, created_at TEXT)"
                    .to_string(),
                args: vec![],
            },
            Statement {
                sql: "CREATE INDEX IF NOT EXISTS idx_cold_agent_category ON cold_memory(agent_id, category)".to_string(),
                args: vec![],
            },
            Statement {
                sql: "CREATE INDEX IF NOT EXISTS idx_cold_agent_timestamp ON cold_memory(agent_id, timestamp DESC)".to_string(),
                args: vec![],
            },
            Statement {
                sql: "CREATE INDEX IF NOT EXISTS idx_cold_agent_importance ON cold_memory(agent_id, importance DESC)".to_string(),
                args: vec![],
            },
        ];

        for stmt in statements {
            self.client.execute(vec![stmt], cancel).await?;
        }
        Ok(())
    }

    pub async fn add(&self, entry: &ColdEntry, cancel: &watch::Receiver<bool>) -> Result<()> {
        let stmt = Statement {
            sql: "INSERT INTO cold_memory (id, agent_id, timestamp, event_type, category, content, \
                    distilled_summary, importance, access_count, last_accessed, created_at) \
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                .to_string(),
            args: vec![
                HranaValue::text(&entry.id),
                HranaValue::text(&entry.agent_id),
                HranaValue::text(entry.timestamp.to_rfc3339()),
                HranaValue::text(&entry.event_type),
                HranaValue::text(&entry.category),
                HranaValue::text(&entry.content),
                HranaValue::text(&entry.distilled_summary),
                HranaValue::float(entry.importance),
                HranaValue::integer(entry.access_count as i64),
                HranaValue::text(entry.last_accessed.to_rfc3339()),
                HranaValue::text(entry.created_at.to_rfc3339()),
            ],
        };
        self.client.execute(vec![stmt], cancel).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str, cancel: &watch::Receiver<bool>) -> Result<()> {
        let increment = Statement {
            sql: "UPDATE cold_memory SET access_count = access_count + 1, last_accessed = ? WHERE id = ? AND agent_id = ?"
                .to_string(),
            args: vec![HranaValue::text(Utc::now().to_rfc3339()), HranaValue::text(id), HranaValue::text(&self.agent_id)],
        };
        self.client.execute(vec![increment], cancel).await?;
        Ok(())
    }

    const SELECT_COLUMNS: &'static str =
        "id, agent_id, timestamp, event_type, category, content, distilled_summary, importance, access_count, last_accessed, created_at";

    pub async fn get_by_category(&self, category: &str, cancel: &watch::Receiver<bool>) -> Result<Vec<ColdEntry>> {
        let stmt = Statement {
            sql: format!("SELECT {} FROM cold_memory WHERE agent_id = ? AND category = ?", Self::SELECT_COLUMNS),
            args: vec![HranaValue::text(&self.agent_id), HranaValue::text(category)],
        };
        let results = self.client.execute(vec![stmt], cancel).await?;
        Ok(parse_cold_entries(&results))
    }

    pub async fn query_by_importance(&self, min_importance: f64, cancel: &watch::Receiver<bool>) -> Result<Vec<ColdEntry>> {
        let stmt = Statement {
            sql: format!(
                "SELECT {} FROM cold_memory WHERE agent_id = ? AND importance >= ? ORDER BY importance DESC",
                Self::SELECT_COLUMNS
            ),
            args: vec![HranaValue::text(&self.agent_id), HranaValue::float(min_importance)],
        };
        let results = self.client.execute(vec![stmt], cancel).await?;
        Ok(parse_cold_entries(&results))
    }

    pub async fn query_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<ColdEntry>> {
        let stmt = Statement {
            sql: format!(
                "SELECT {} FROM cold_memory WHERE agent_id = ? AND timestamp >= ? AND timestamp <= ? ORDER BY timestamp DESC",
                Self::SELECT_COLUMNS
            ),
            args: vec![
                HranaValue::text(&self.agent_id),
                HranaValue::text(start.to_rfc3339()),
                HranaValue::text(end.to_rfc3339()),
            ],
        };
        let results = self.client.execute(vec![stmt], cancel).await?;
        Ok(parse_cold_entries(&results))
    }

    /// Selects entries older than `retention_years`, recomputes their
    /// score, and deletes the ones that have gone Frozen in batches of
    /// 100 using parameterized `IN (?,?,...)`.
    pub async fn delete_frozen(
        &self,
        retention_years: f64,
        half_life_days: f64,
        reinforcement_boost: f64,
        cancel: &watch::Receiver<bool>,
    ) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days((retention_years * 365.25) as i64);
        let select = Statement {
            sql: "SELECT id, importance, created_at, access_count FROM cold_memory WHERE agent_id = ? AND created_at < ?"
                .to_string(),
            args: vec![HranaValue::text(&self.agent_id), HranaValue::text(cutoff.to_rfc3339())],
        };
        let results = self.client.execute(vec![select], cancel).await?;

        let mut frozen_ids = Vec::new();
        for result in &results {
            if let crate::memory::sql_pipeline::PipelineResult::Ok { response: Some(rs), .. } = result {
                for row in &rs.rows {
                    let id = cell(row, 0).and_then(|v| v.as_text().map(str::to_string)).unwrap_or_default();
                    let importance = cell(row, 1).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let created_at_str = cell(row, 2).and_then(|v| v.as_text().map(str::to_string)).unwrap_or_default();
                    let access_count = cell(row, 3).and_then(|v| v.as_u64()).unwrap_or(0);
                    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now());

                    let config = crate::config::ScoringConfig { half_life_days, reinforcement_boost };
                    let s = scoring::score(importance, scoring::age_days(created_at), access_count, &config);
                    if s < 0.05 {
                        frozen_ids.push(id);
                    }
                }
            }
        }

        let mut deleted = 0;
        for chunk in frozen_ids.chunks(DELETE_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM cold_memory WHERE agent_id = ? AND id IN ({placeholders})");
            let mut args = vec![HranaValue::text(&self.agent_id)];
            args.extend(chunk.iter().map(HranaValue::text));
            self.client.execute(vec![Statement { sql, args }], cancel).await?;
            deleted += chunk.len();
        }
        Ok(deleted)
    }
}

/// Parses result rows shaped like `ColdMemory::SELECT_COLUMNS` into
/// `ColdEntry`s. Rows that don't parse cleanly are skipped rather than
/// failing the whole query — a single malformed row shouldn't take down a
/// retrieval that otherwise has useful results.
fn parse_cold_entries(results: &[crate::memory::sql_pipeline::PipelineResult]) -> Vec<ColdEntry> {
    let mut entries = Vec::new();
    for result in results {
        match result {
            crate::memory::sql_pipeline::PipelineResult::Ok { response: Some(rs), .. } => {
                for row in &rs.rows {
                    if let Some(entry) = parse_cold_row(row) {
                        entries.push(entry);
                    }
                }
            }
            crate::memory::sql_pipeline::PipelineResult::Error { error } => {
                tracing::warn!(message = %error.message, "cold memory query returned an error result");
            }
            _ => {}
        }
    }
    entries
}

/// Cells come back from the pipeline in the same type-tagged envelope the
/// write path encodes args with (`{"type":"text","value":"..."}`, integers
/// as decimal strings) — decode through `HranaValue`, never as a bare
/// JSON scalar.
fn cell(row: &[serde_json::Value], i: usize) -> Option<HranaValue> {
    row.get(i).and_then(HranaValue::from_cell)
}

fn parse_cold_row(row: &[serde_json::Value]) -> Option<ColdEntry> {
    let text = |i: usize| cell(row, i).and_then(|v| v.as_text().map(str::to_string));
    let ts = |i: usize| {
        text(i).and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc))
    };

    Some(ColdEntry {
        id: text(0)?,
        agent_id: text(1)?,
        timestamp: ts(2)?,
        event_type: text(3)?,
        category: text(4)?,
        content: text(5)?,
        distilled_summary: text(6)?,
        importance: cell(row, 7).and_then(|v| v.as_f64())?,
        access_count: cell(row, 8).and_then(|v| v.as_u64())?,
        last_accessed: ts(9)?,
        created_at: ts(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_entry_roundtrips_through_json() {
        let entry = ColdEntry {
            id: "c1".to_string(),
            agent_id: "agent-1".to_string(),
            timestamp: Utc::now(),
            event_type: "note".to_string(),
            category: "project/alpha".to_string(),
            content: "raw content".to_string(),
            distilled_summary: "short summary".to_string(),
            importance: 0.6,
            access_count: 2,
            last_accessed: Utc::now(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: ColdEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, entry.id);
        assert_eq!(back.category, entry.category);
    }

    #[test]
    fn parse_cold_row_decodes_type_tagged_cells() {
        let now = Utc::now().to_rfc3339();
        let row = vec![
            serde_json::json!({"type": "text", "value": "c1"}),
            serde_json::json!({"type": "text", "value": "agent-1"}),
            serde_json::json!({"type": "text", "value": now}),
            serde_json::json!({"type": "text", "value": "note"}),
            serde_json::json!({"type": "text", "value": "project/alpha"}),
            serde_json::json!({"type": "text", "value": "raw content"}),
            serde_json::json!({"type": "text", "value": "short summary"}),
            serde_json::json!({"type": "float", "value": 0.6}),
            serde_json::json!({"type": "integer", "value": "2"}),
            serde_json::json!({"type": "text", "value": now}),
            serde_json::json!({"type": "text", "value": now}),
        ];

        let entry = parse_cold_row(&row).expect("row parses");
        assert_eq!(entry.id, "c1");
        assert_eq!(entry.agent_id, "agent-1");
        assert_eq!(entry.category, "project/alpha");
        assert_eq!(entry.importance, 0.6);
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn parse_cold_row_rejects_bare_scalar_cells() {
        let row = vec![serde_json::json!("c1"), serde_json::json!("agent-1")];
        assert!(parse_cold_row(&row).is_none());
    }
}
