// src/audit.rs
// Append-only threat audit trail over the Spin SQLite binding.
// Entries are never mutated or deleted here; the analytics endpoint reads
// them newest-first.

use serde::{Deserialize, Serialize};
use spin_sdk::sqlite::{Connection, Value};

/// Longest payload snippet persisted with a threat entry.
pub const SNIPPET_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    Unavailable(String),
    Query(String),
}

/// One adjudicated threat (or repeat attempt while blocked), ready to append.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ThreatEntry {
    pub ip: String,
    pub country: String,
    pub payload_snippet: String,
    pub timestamp: u64,
}

/// A persisted threat row as served by the analytics endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ThreatRow {
    pub id: i64,
    pub ip: String,
    pub country: String,
    pub payload_snippet: String,
    pub timestamp: u64,
}

pub trait ThreatLog {
    fn record_threat(&self, entry: &ThreatEntry) -> Result<(), AuditError>;
    fn list_recent(&self, limit: u32) -> Result<Vec<ThreatRow>, AuditError>;
}

/// Truncates a serialized payload to the persisted snippet length,
/// char-boundary safe.
pub fn snippet_of(serialized: &str) -> String {
    serialized.chars().take(SNIPPET_MAX_CHARS).collect()
}

const CREATE_THREATS_TABLE: &str = "CREATE TABLE IF NOT EXISTS threats (\
     id INTEGER PRIMARY KEY AUTOINCREMENT, \
     ip TEXT NOT NULL, \
     country TEXT NOT NULL, \
     payload_snippet TEXT NOT NULL, \
     timestamp INTEGER NOT NULL)";

pub struct SqliteThreatLog {
    conn: Connection,
}

impl SqliteThreatLog {
    pub fn open_default() -> Result<Self, AuditError> {
        let conn = Connection::open_default()
            .map_err(|err| AuditError::Unavailable(format!("{:?}", err)))?;
        conn.execute(CREATE_THREATS_TABLE, &[])
            .map_err(|err| AuditError::Query(format!("{:?}", err)))?;
        Ok(SqliteThreatLog { conn })
    }
}

impl ThreatLog for SqliteThreatLog {
    fn record_threat(&self, entry: &ThreatEntry) -> Result<(), AuditError> {
        self.conn
            .execute(
                "INSERT INTO threats (ip, country, payload_snippet, timestamp) \
                 VALUES (?, ?, ?, ?)",
                &[
                    Value::Text(entry.ip.clone()),
                    Value::Text(entry.country.clone()),
                    Value::Text(entry.payload_snippet.clone()),
                    Value::Integer(entry.timestamp as i64),
                ],
            )
            .map_err(|err| AuditError::Query(format!("{:?}", err)))?;
        Ok(())
    }

    fn list_recent(&self, limit: u32) -> Result<Vec<ThreatRow>, AuditError> {
        let result = self
            .conn
            .execute(
                "SELECT id, ip, country, payload_snippet, timestamp FROM threats \
                 ORDER BY timestamp DESC, id DESC LIMIT ?",
                &[Value::Integer(limit as i64)],
            )
            .map_err(|err| AuditError::Query(format!("{:?}", err)))?;

        let rows = result
            .rows()
            .map(|row| ThreatRow {
                id: row.get::<i64>("id").unwrap_or(0),
                ip: row.get::<&str>("ip").unwrap_or("").to_string(),
                country: row.get::<&str>("country").unwrap_or("").to_string(),
                payload_snippet: row.get::<&str>("payload_snippet").unwrap_or("").to_string(),
                timestamp: row.get::<i64>("timestamp").unwrap_or(0) as u64,
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryThreatLog;

    #[test]
    fn snippet_truncates_to_200_chars() {
        let long: String = "x".repeat(500);
        assert_eq!(snippet_of(&long).chars().count(), SNIPPET_MAX_CHARS);
        let short = r#"{"a":1}"#;
        assert_eq!(snippet_of(short), short);
    }

    #[test]
    fn snippet_respects_multibyte_boundaries() {
        let payload: String = "é".repeat(300);
        let snippet = snippet_of(&payload);
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS);
        assert!(payload.starts_with(&snippet));
    }

    #[test]
    fn threat_rows_serialize_with_the_analytics_field_names() {
        let row = ThreatRow {
            id: 7,
            ip: "1.2.3.4".to_string(),
            country: "NL".to_string(),
            payload_snippet: r#"{"q":"x"}"#.to_string(),
            timestamp: 42,
        };
        let json = serde_json::to_value(&row).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 5);
        for field in ["id", "ip", "country", "payload_snippet", "timestamp"] {
            assert!(obj.contains_key(field), "missing field {}", field);
        }
        assert_eq!(json["id"], 7);
        assert_eq!(json["ip"], "1.2.3.4");
        assert_eq!(json["country"], "NL");
        assert_eq!(json["payload_snippet"], r#"{"q":"x"}"#);
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn mock_log_lists_newest_first_with_limit() {
        let log = InMemoryThreatLog::default();
        for i in 0..25u64 {
            log.record_threat(&ThreatEntry {
                ip: format!("10.0.0.{}", i),
                country: "Unknown".to_string(),
                payload_snippet: format!("payload-{}", i),
                timestamp: 1_000 + i,
            })
            .unwrap();
        }
        let recent = log.list_recent(20).unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].timestamp, 1_024);
        assert!(recent.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        for row in &recent {
            assert!(!row.ip.is_empty());
            assert!(!row.country.is_empty());
            assert!(!row.payload_snippet.is_empty());
            assert!(row.timestamp > 0);
        }
    }
}
