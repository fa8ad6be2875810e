use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Session log for one atelier process, one JSON object per line.
///
/// Every record starts with `type`, `session_id`, `seq` and `ts`; the caller's
/// payload is merged on top and may override them. `seq` is shared by all
/// clones, so records written from the visual and voice threads can be put
/// back in emission order even when lines interleave.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SharedLog>,
}

#[derive(Debug)]
struct SharedLog {
    path: PathBuf,
    session_id: String,
    seq: AtomicU64,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SharedLog {
                path: path.into(),
                session_id: session_id.into(),
                seq: AtomicU64::new(0),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst);
        let mut record = Map::new();
        record.insert("type".into(), Value::from(event_type));
        record.insert("session_id".into(), Value::from(self.session_id()));
        record.insert("seq".into(), Value::from(seq));
        record.insert(
            "ts".into(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        record.extend(payload);

        let record = Value::Object(record);
        self.append_line(&serde_json::to_string(&record)?)?;
        Ok(record)
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        let mut slot = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            if let Some(parent) = self.shared.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.shared.path)
                .with_context(|| format!("failed opening {}", self.shared.path.display()))?;
            *slot = Some(file);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(format!("{line}\n").as_bytes())?;
        }
        Ok(())
    }
}

/// Builds an [`EventPayload`] from a `json!({...})` object literal.
pub fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
