//! Cache backends implementing [`crate::contract::Cache`].
//!
//! - [`MemoryCache`]: process-local, used by tests and throwaway runs.
//! - [`FsCache`]: one file per key under a directory; survives restarts.

mod fs;
mod memory;

pub use fs::FsCache;
pub use memory::MemoryCache;
