//! Shared caches

pub mod overrides;

pub use overrides::OverrideFileCache;
