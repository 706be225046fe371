// src/test_support.rs
// Shared mocks for unit tests: in-memory store, scripted classifier, and an
// in-memory threat log.

use once_cell::sync::Lazy;
use spin_sdk::http::{Method, Request};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::audit::{AuditError, ThreatEntry, ThreatLog, ThreatRow};
use crate::classifier::{Classifier, ClassifierError};
use crate::store::KeyValueStore;

#[derive(Default)]
pub(crate) struct InMemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        let map = self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.remove(key);
        Ok(())
    }
}

/// Classifier that always answers with the same verdict text and records
/// what it was asked to classify.
pub(crate) struct ScriptedClassifier {
    verdict: String,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub(crate) fn always(verdict: &str) -> Self {
        ScriptedClassifier {
            verdict: verdict.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn last_payload(&self) -> Option<String> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, payload_json: &str) -> Result<String, ClassifierError> {
        self.calls.lock().unwrap().push(payload_json.to_string());
        Ok(self.verdict.clone())
    }
}

pub(crate) struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn classify(&self, _payload_json: &str) -> Result<String, ClassifierError> {
        Err(ClassifierError::Inference("mock inference outage".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct InMemoryThreatLog {
    rows: Mutex<Vec<ThreatRow>>,
}

impl ThreatLog for InMemoryThreatLog {
    fn record_threat(&self, entry: &ThreatEntry) -> Result<(), AuditError> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        rows.push(ThreatRow {
            id,
            ip: entry.ip.clone(),
            country: entry.country.clone(),
            payload_snippet: entry.payload_snippet.clone(),
            timestamp: entry.timestamp,
        });
        Ok(())
    }

    fn list_recent(&self, limit: u32) -> Result<Vec<ThreatRow>, AuditError> {
        let rows = self.rows.lock().unwrap();
        let mut sorted: Vec<ThreatRow> = rows.clone();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        sorted.truncate(limit as usize);
        Ok(sorted)
    }
}

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn json_request(method: Method, path: &str, body: &str) -> Request {
    plain_request(method, path, "application/json", body)
}

pub(crate) fn plain_request(
    method: Method,
    path: &str,
    content_type: &str,
    body: &str,
) -> Request {
    let mut builder = Request::builder();
    builder
        .method(method)
        .uri(path)
        .header("content-type", content_type)
        .body(body.as_bytes().to_vec());
    builder.build()
}
