//! Drawing context handed to paint methods

use crate::codec::Object;
use crate::native::EngineAddr;

/// Drawing context for a paint callback.
///
/// Only valid for the duration of the callback. New native objects cannot be
/// allocated while it is alive.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    engine: EngineAddr,
    object: Object,
}

impl Painter {
    pub(crate) fn new(engine: EngineAddr, object: Object) -> Self {
        Self { engine, object }
    }

    pub fn engine(&self) -> EngineAddr {
        self.engine
    }

    /// The native item being painted.
    pub fn object(&self) -> Object {
        self.object
    }
}
