//! Backend abstraction layer
//!
//! Provides the device contract and the backends that implement it.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use dummy::{DummyBackend, DummyConfig, DummyEvent, DummyInspector, RecordedCommand};
pub use traits::*;
pub use types::*;
