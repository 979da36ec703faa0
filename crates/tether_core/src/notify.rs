//! Change notifier

use crate::bridge::BridgeInner;
use crate::error::{BridgeError, BridgeResult};
use crate::managed::Managed;

impl BridgeInner {
    /// Signal every native handle wrapping `value` that the property stored
    /// at `offset` changed. Runs on the event-loop thread.
    ///
    /// Folds still waiting for their engine are signalled after all engine
    /// chains, once the registry is no longer borrowed.
    pub(crate) fn notify(&self, value: &Managed, offset: usize) -> BridgeResult<usize> {
        if !self.dispatcher.is_loop_thread() {
            return Err(BridgeError::NotOnLoopThread);
        }
        let key = value.key()?;
        let (chained, pending) = self.registry.lock().handles_for(key);
        let ty = value.descriptor();

        for handle in &chained {
            self.runtime.value_changed(*handle, ty, offset);
        }
        for handle in &pending {
            self.runtime.value_changed(*handle, ty, offset);
        }

        tracing::trace!(
            type_name = ty.name(),
            offset,
            chained = chained.len(),
            pending = pending.len(),
            "value change signalled"
        );
        Ok(chained.len() + pending.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::{Bridge, TypeSpec};
    use crate::error::BridgeError;
    use crate::managed::Managed;
    use crate::mock::MockRuntime;
    use crate::native::{NativeHandle, Ownership};
    use crate::reflect::{Reflect, TypeBuilder};
    use crate::settings::BridgeSettings;
    use std::mem::offset_of;
    use std::sync::Arc;

    #[derive(Default)]
    struct Dial {
        min: i64,
        max: i64,
    }

    impl Reflect for Dial {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.field("min", offset_of!(Dial, min), |d| &mut d.min)
                .field("max", offset_of!(Dial, max), |d| &mut d.max);
        }
    }

    fn bridge() -> (Arc<MockRuntime>, Bridge) {
        let rt = Arc::new(MockRuntime::new());
        let bridge = Bridge::new(rt.clone(), BridgeSettings::default());
        bridge.bind_loop_thread().unwrap();
        (rt, bridge)
    }

    #[test]
    fn each_alias_in_each_engine_is_signalled_once() {
        let (rt, bridge) = bridge();
        let a = bridge.new_engine();
        let b = bridge.new_engine();
        let dial = Managed::new(Dial::default());
        a.wrap(&dial, Ownership::Script);
        a.wrap(&dial, Ownership::Native);
        b.wrap(&dial, Ownership::Script);

        let signalled = bridge.inner().notify(&dial, offset_of!(Dial, max)).unwrap();
        assert_eq!(signalled, 3);
        assert!(rt.changes().iter().all(|(_, offset)| *offset == offset_of!(Dial, max)));
        assert_eq!(rt.changes().len(), 3);
    }

    #[test]
    fn unrelated_values_are_not_signalled() {
        let (rt, bridge) = bridge();
        let engine = bridge.new_engine();
        let dial = Managed::new(Dial::default());
        engine.wrap(&Managed::new(Dial::default()), Ownership::Script);

        assert_eq!(bridge.inner().notify(&dial, 0).unwrap(), 0);
        assert!(rt.changes().is_empty());
    }

    #[test]
    fn pending_folds_are_signalled_after_engine_chains() {
        let (rt, bridge) = bridge();
        let engine = bridge.new_engine();
        let spec = bridge.register_type(TypeSpec::<Dial>::new("Dial"));
        let hooks = rt.hooks();
        let fold = hooks.type_new(NativeHandle(0x99), spec);
        let dial = bridge.inspect(|r| r.value_of(fold)).unwrap();
        let wrapped = engine.wrap(&dial, Ownership::Native);

        bridge.inner().notify(&dial, offset_of!(Dial, min)).unwrap();
        let handles: Vec<_> = rt.changes().into_iter().map(|(h, _)| h).collect();
        assert_eq!(handles, vec![wrapped, NativeHandle(0x99)]);
        assert!(bridge.inspect(|r| r.is_pending(fold)));
    }

    #[test]
    fn notify_refuses_other_threads() {
        let (rt, bridge) = bridge();
        let engine = bridge.new_engine();
        let dial = Managed::new(Dial::default());
        engine.wrap(&dial, Ownership::Script);

        let inner = bridge.inner();
        let outcome = std::thread::scope(|s| s.spawn(|| inner.notify(&dial, 0)).join().unwrap());
        assert!(matches!(outcome, Err(BridgeError::NotOnLoopThread)));
        assert!(rt.changes().is_empty());
    }
}
