use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use super::{check_quota, SlotStore};

/// Slots kept as one JSON object file (`{"key": "value", ...}`).
///
/// Every `set` re-reads the file and merges the single key before writing, so
/// slots written by another process under different keys survive. Two writers
/// of the same key still race: the last write wins. A file that is not a JSON
/// object fails both `get` and `set`.
#[derive(Debug, Clone)]
pub struct FileSlotStore {
    path: PathBuf,
    quota: Option<usize>,
}

impl FileSlotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota: None,
        }
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SlotStore for FileSlotStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let payload = read_json_object(&self.path)?;
        Ok(payload.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        check_quota(self.quota, key, value)?;
        // A file that cannot be parsed is left alone rather than replaced.
        let mut on_disk = if self.path.exists() {
            read_json_object(&self.path)?
        } else {
            Map::new()
        };
        on_disk.insert(key.to_string(), Value::String(value.to_string()));
        write_json_object(&self.path, &on_disk)
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::FileSlotStore;
    use crate::storage::SlotStore;

    #[test]
    fn missing_file_reads_as_empty_slot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileSlotStore::new(temp.path().join("slots.json"));
        assert_eq!(store.get("atelier_snapshot_v1")?, None);
        Ok(())
    }

    #[test]
    fn set_then_get_across_instances() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state").join("slots.json");
        let mut store = FileSlotStore::new(&path);
        store.set("key", "{\"a\":1}")?;

        let reloaded = FileSlotStore::new(&path);
        assert_eq!(reloaded.get("key")?, Some("{\"a\":1}".to_string()));
        Ok(())
    }

    #[test]
    fn set_merges_keys_written_by_another_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("slots.json");
        let mut store_a = FileSlotStore::new(&path);
        let mut store_b = FileSlotStore::new(&path);

        store_a.set("a", "1")?;
        store_b.set("b", "2")?;
        store_a.set("a", "3")?;

        let reloaded = FileSlotStore::new(&path);
        assert_eq!(reloaded.get("a")?, Some("3".to_string()));
        assert_eq!(reloaded.get("b")?, Some("2".to_string()));
        Ok(())
    }

    #[test]
    fn quota_failure_leaves_file_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("slots.json");
        let mut store = FileSlotStore::new(&path).with_quota(12);
        store.set("k", "short")?;
        assert!(store.set("k", "much too long for the quota").is_err());
        assert_eq!(store.get("k")?, Some("short".to_string()));
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error_on_read() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("slots.json");
        std::fs::write(&path, "not json")?;
        let store = FileSlotStore::new(&path);
        assert!(store.get("k").is_err());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_not_overwritten_on_set() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("slots.json");
        std::fs::write(&path, "not json")?;
        let mut store = FileSlotStore::new(&path);
        assert!(store.set("k", "v").is_err());
        assert_eq!(std::fs::read_to_string(&path)?, "not json");
        Ok(())
    }
}
