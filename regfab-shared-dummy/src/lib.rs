//! C10 — SharedMemoryManager (SPEC_FULL.md §4.10) and the `shared-dummy`
//! backend it supports: a simulated device whose BARs live in POSIX shared
//! memory so several independently-opened processes see the same state.

mod backend;
mod shared_memory;

pub use backend::{SharedDummyBackend, SharedDummyBackendFactory};
pub use shared_memory::{SharedMemoryManager, SHARED_MEMORY_N_MAX_MEMBER};
