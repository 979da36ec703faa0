//! Tether Core
//!
//! Bridges host values to an event-loop driven native graphics runtime:
//! - Call dispatcher onto the single event-loop thread
//! - Value fold registry (alias chains, ownership, pending folds)
//! - Reflection marshaller for native field/method/list callbacks
//! - Change notifier
//! - Type/value codec

pub mod codec;
pub mod error;
pub mod managed;
pub mod native;
pub mod paint;
pub mod reflect;
pub mod settings;

mod bridge;
mod dispatch;
mod fold;
mod marshal;
mod notify;
mod registry;

#[cfg(test)]
mod mock;

pub use bridge::{Bridge, Engine, TypeSpec};
pub use codec::{DataType, DataValue, List, Marshal, Object, Value, ValueKind, MAX_PARAMS};
pub use error::{fatal, BridgeError, BridgeResult};
pub use fold::FoldId;
pub use managed::Managed;
pub use native::{EngineAddr, Hooks, NativeHandle, NativeRuntime, Ownership, TypeSpecId};
pub use paint::Painter;
pub use reflect::{descriptor_of, Reflect, TypeBuilder, TypeDescriptor};
pub use registry::Registry;
pub use settings::{BridgeSettings, SettingsError};
pub use tether_metrics::StatsSnapshot;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
