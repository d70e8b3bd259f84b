//! # State Store
//!
//! Key/value persistence for trigger state and promotion records.
//!
//! Keys are `/`-separated strings built from target identities, values are
//! JSON. The engine performs reads during a pass and writes only after it, so
//! implementations need safe concurrent reads but no transactions.

use anyhow::Result;
use async_trait::async_trait;

pub mod file;
pub mod memory;
pub mod promotion;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use promotion::PromotionState;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Value stored under `key`, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// All keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
