//! # tidekv Core
//!
//! This crate provides the fundamental building blocks shared by the tidekv
//! crates:
//! - Error types
//! - Configuration
//! - Metrics
//! - The injected random source
//! - The key-value trait exposed to replication and request layers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   tidekv-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • error   - Error handling                     │
//! │  • config  - Storage configuration             │
//! │  • metrics - Atomic counters                   │
//! │  • random  - Seedable shared RNG               │
//! │  • traits  - KvStore / LogEntry                │
//! │  • utils   - Common utilities                  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod random;
pub mod traits;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, StorageConfig};
pub use error::{Error, Result, ResultExt};
pub use metrics::{Metrics, MetricsSnapshot};
pub use random::RandomSource;
pub use traits::{KvStore, LogEntry};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
