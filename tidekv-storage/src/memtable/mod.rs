//! # MemTable - In-Memory Storage
//!
//! Recent writes live in a skip list until the table grows past its byte
//! threshold. It is then frozen (read-only, still searchable) and queued for
//! the background flush that turns it into a level 0 SSTable.
//!
//! ## Module Structure
//!
//! - `skiplist.rs` - concurrent ordered map backing every table
//! - `table.rs` - one table: size accounting and the frozen flag
//! - `manager.rs` - active table plus the queue of frozen ones
//! - `types.rs` - configuration and stats
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MemTableManager                        │
//! │                                                              │
//! │   put ──> ┌──────────────┐  size > max  ┌─────────────────┐  │
//! │           │    active    │ ───freeze──> │ frozen (queue)  │  │
//! │           │  (SkipList)  │              │ oldest ... new  │  │
//! │           └──────────────┘              └────────┬────────┘  │
//! │                                                  │ oldest    │
//! │   get: active, then frozen newest first          ▼           │
//! │                                           flush to SSTable   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod manager;
mod skiplist;
mod table;
mod types;

pub use manager::MemTableManager;
pub use skiplist::{Iter as SkipListIter, SkipList};
pub use table::MemTable;
pub use types::{MemTableConfig, MemTableManagerStats, MemTableStats};
