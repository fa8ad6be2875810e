use std::collections::BTreeMap;

use super::{check_quota, SlotStore};

#[derive(Debug, Clone, Default)]
pub struct MemorySlotStore {
    slots: BTreeMap<String, String>,
    quota: Option<usize>,
    writes: u64,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut store = Self::default();
        store.slots.insert(key.to_string(), value.to_string());
        store
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.slots.get(key).map(String::as_str)
    }

    /// Successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl SlotStore for MemorySlotStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        check_quota(self.quota, key, value)?;
        self.slots.insert(key.to_string(), value.to_string());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySlotStore;
    use crate::storage::SlotStore;

    #[test]
    fn quota_rejects_oversize_values_and_keeps_old_value() -> anyhow::Result<()> {
        let mut store = MemorySlotStore::with_quota(16);
        store.set("k", "small")?;
        let err = store.set("k", "a value that is far too large").unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(store.get("k")?, Some("small".to_string()));
        assert_eq!(store.writes(), 1);
        Ok(())
    }
}
