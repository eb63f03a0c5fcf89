use std::time::Duration;

use tidekv_core::StorageConfig;

#[derive(Debug, Clone)]
pub struct MemTableConfig {
    /// Active table is frozen once its key+value bytes exceed this
    pub max_bytes: usize,
}

impl MemTableConfig {
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            max_bytes: config.memtable_max_bytes,
        }
    }
}

impl Default for MemTableConfig {
    fn default() -> Self {
        Self::from_storage(&StorageConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemTableStats {
    pub id: u64,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub age: Duration,
    pub frozen: bool,
}

#[derive(Debug, Clone)]
pub struct MemTableManagerStats {
    pub active: MemTableStats,
    /// Oldest first
    pub frozen: Vec<MemTableStats>,
}

impl MemTableManagerStats {
    pub fn frozen_bytes(&self) -> usize {
        self.frozen.iter().map(|s| s.size_bytes).sum()
    }
}
