// src/store/mod.rs

//! Persistent boolean configuration flags.

pub mod sdkconfig;

pub use sdkconfig::SdkconfigStore;

use crate::errors::Result;

/// Key/value store of boolean options, written back with a backup.
///
/// Keys are option ids without the `CONFIG_` prefix.
pub trait ConfigStore {
    /// Add every key in `keys` that the store does not have yet, as disabled.
    /// Returns how many were added.
    fn ensure_keys_exist(&mut self, keys: &[String]) -> Result<usize>;

    /// Current value of a boolean key; `None` if unknown or not boolean.
    fn get(&self, key: &str) -> Option<bool>;

    /// Set a boolean key. Returns whether the value changed.
    fn set(&mut self, key: &str, value: bool) -> Result<bool>;

    /// Back up the persisted version, then persist the current state.
    fn write(&mut self) -> Result<()>;

    /// True if there are changes that `write` has not persisted.
    fn is_dirty(&self) -> bool;
}
