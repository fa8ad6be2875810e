//! String-keyed persistent slots, the local-storage contract the content store
//! writes through.

mod file_slot;
mod memory_slot;

pub use file_slot::FileSlotStore;
pub use memory_slot::MemorySlotStore;

/// Browsers commonly cap local storage around five megabytes per origin.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

pub trait SlotStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

impl<T: SlotStore + ?Sized> SlotStore for Box<T> {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).set(key, value)
    }
}

fn check_quota(quota: Option<usize>, key: &str, value: &str) -> anyhow::Result<()> {
    let Some(limit) = quota else {
        return Ok(());
    };
    let needed = key.len() + value.len();
    if needed > limit {
        anyhow::bail!("storage quota exceeded for '{key}': {needed} bytes > {limit} bytes");
    }
    Ok(())
}
