use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Something worth recording about a generation session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    GenerationStarted {
        mode: String,
        deployment: String,
        operation: String,
        n: u32,
        prompt_chars: usize,
    },
    GenerationSucceeded {
        count: usize,
        elapsed_ms: u64,
    },
    GenerationFailed {
        kind: String,
        message: String,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
        queue_cleared: bool,
    },
    ConfigSaved {
        deployment: String,
    },
}

/// Append-only writer for `activity.jsonl`.
///
/// Each line is one compact JSON object: the event fields plus `run_id` and
/// `ts`. Handles are cheap to clone and share one file lock.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    inner: Arc<ActivityLogInner>,
}

#[derive(Debug)]
struct ActivityLogInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_run_id(path, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ActivityLogInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event: &ActivityEvent) -> anyhow::Result<Value> {
        let mut line = Map::new();
        if let Value::Object(fields) = serde_json::to_value(event)? {
            line.extend(fields);
        }
        line.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let encoded = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("activity log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
