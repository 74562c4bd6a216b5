use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::items::ItemStatus;

/// One lifecycle event of a generation run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        category: String,
        labels: Vec<String>,
        workers: usize,
    },
    ItemSettled {
        label: String,
        status: ItemStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ItemReset {
        label: String,
        operation: String,
    },
    RunFinished {
        done: usize,
        failed: usize,
    },
}

/// Append-only writer for the run's `events.jsonl`.
///
/// Every record is one compact JSON object per line, enveloped with `run_id`
/// and an RFC3339 `ts` before the event's own fields.
#[derive(Debug, Clone)]
pub struct RunLog {
    inner: Arc<RunLogInner>,
}

#[derive(Debug)]
struct RunLogInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RunLogInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Creates a log with a fresh v4 run id.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn record(&self, event: &RunEvent) -> anyhow::Result<()> {
        let Value::Object(fields) = serde_json::to_value(event)? else {
            anyhow::bail!("run event did not serialize to an object");
        };
        let mut envelope = serde_json::Map::new();
        envelope.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        envelope.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            envelope.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&Value::Object(envelope))?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("run log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
