// ── State store ──
//
// Shared application state addressed by dot paths, with change events on
// the bus and optional write-through to durable storage.

pub mod path;
pub mod selectors;
mod state;
mod storage;

pub use selectors::Selector;
pub use state::{
    LoadReport, PushOptions, STORAGE_KEY_PREFIX, SetOptions, StateStore, storage_key,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
