//! Tether Headless Runtime
//!
//! A native runtime without a display, for tools, demos and tests. It keeps
//! an object table of every handle the bridge allocates and replays
//! native-side activity (bindings reading properties, method calls, paints,
//! deferred deletions) on its own event loop.

pub mod runtime;
pub mod scene;

pub use runtime::HeadlessRuntime;
pub use scene::{Change, HandleRecord, ListRecord, ValueRecord};

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tether_core::{
        Bridge, BridgeSettings, DataValue, Managed, NativeHandle, Object, Ownership, Painter,
        Reflect, TypeBuilder, TypeSpec, Value, ValueKind,
    };

    #[derive(Default)]
    struct Slider {
        value: i64,
        label: String,
        marks: Vec<Object>,
        repaints: i64,
    }

    impl Reflect for Slider {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.field("value", offset_of!(Slider, value), |s| &mut s.value)
                .field("label", offset_of!(Slider, label), |s| &mut s.label)
                .object_list("marks", offset_of!(Slider, marks), |s| &mut s.marks)
                .setter("set_value", |s, value: i64| s.value = value.clamp(0, 100))
                .method("nudge", &[ValueKind::Int], |s, args| {
                    if let Some(Value::Int(step)) = args.first() {
                        s.value += step;
                    }
                    vec![Value::Int(s.value)]
                })
                .paint("render", |s, painter: &Painter| {
                    if painter.object().engine().is_some() {
                        s.repaints += 1;
                    }
                });
        }
    }

    fn start() -> (Arc<HeadlessRuntime>, Bridge) {
        let runtime = Arc::new(HeadlessRuntime::new());
        let bridge = Bridge::start(runtime.clone(), BridgeSettings::default()).unwrap();
        (runtime, bridge)
    }

    #[test]
    fn marshalled_calls_run_on_the_loop_thread() {
        let (_runtime, bridge) = start();
        let name = bridge.run(|| std::thread::current().name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("tether-gui"));
        assert!(!bridge.is_loop_thread());
        bridge.quit();
    }

    #[test]
    fn lock_freezes_native_progress_until_last_unlock() {
        let (runtime, bridge) = start();
        let ran = Arc::new(AtomicBool::new(false));

        bridge.lock();
        bridge.lock();
        bridge.unlock();

        let flag = Arc::clone(&ran);
        runtime.post(move |_, _| flag.store(true, Ordering::SeqCst));
        for _ in 0..3 {
            assert_eq!(bridge.run(|| 1 + 1), 2);
        }
        assert!(!ran.load(Ordering::SeqCst));

        bridge.unlock();
        bridge.flush();
        assert!(ran.load(Ordering::SeqCst));
        bridge.quit();
    }

    #[test]
    #[should_panic(expected = "unlock called without lock being held")]
    fn third_unlock_is_fatal() {
        let (_runtime, bridge) = start();
        bridge.lock();
        bridge.lock();
        bridge.unlock();
        bridge.unlock();
        bridge.unlock();
    }

    #[test]
    fn native_bindings_read_and_write_through_the_bridge() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let slider = Managed::new(Slider::default());
        let handle = engine.wrap(&slider, Ownership::Native);

        runtime.write_property(handle, "value", DataValue::Int32(250));
        assert_eq!(slider.lock::<Slider>().unwrap().value, 100);
        runtime.write_property(handle, "label", DataValue::String("volume".into()));
        assert_eq!(
            runtime.read_property(handle, "label"),
            DataValue::String("volume".into())
        );

        let out = runtime.call(handle, "nudge", vec![DataValue::Float64(-30.0)]);
        assert_eq!(out, DataValue::Int32(70));

        runtime.paint(handle, "render");
        assert_eq!(slider.lock::<Slider>().unwrap().repaints, 1);
        bridge.quit();
    }

    #[test]
    fn list_property_stays_live() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let slider = Managed::new(Slider::default());
        let handle = engine.wrap(&slider, Ownership::Script);

        let DataValue::ListProperty(marks) = runtime.read_property(handle, "marks") else {
            panic!("marks should be a list property");
        };
        runtime.list_append(marks, NativeHandle(0xa0));
        runtime.list_append(marks, NativeHandle(0xb0));
        assert_eq!(runtime.list_count(marks), 2);
        assert_eq!(runtime.list_at(marks, 0), NativeHandle(0xa0));
        assert_eq!(slider.lock::<Slider>().unwrap().marks.len(), 2);

        runtime.list_clear(marks);
        assert_eq!(runtime.list_count(marks), 0);
        bridge.quit();
    }

    #[test]
    fn change_reaches_aliases_in_both_engines() {
        let (runtime, bridge) = start();
        let first = bridge.new_engine();
        let second = bridge.new_engine();
        let slider = Managed::new(Slider::default());
        let h1 = first.wrap(&slider, Ownership::Script);
        let h2 = second.wrap(&slider, Ownership::Native);

        slider.lock::<Slider>().unwrap().value = 42;
        bridge.changed(&slider, |s: &Slider| &s.value);

        let mut changes = runtime.take_changes();
        changes.sort_by_key(|change| change.handle);
        let mut expected = vec![h1, h2];
        expected.sort();
        assert_eq!(changes.iter().map(|c| c.handle).collect::<Vec<_>>(), expected);
        for change in &changes {
            assert_eq!(change.offset, offset_of!(Slider, value));
            assert_eq!(change.property.as_deref(), Some("value"));
        }
        bridge.quit();
    }

    #[test]
    fn change_report_does_not_block_a_concurrent_binding() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let slider = Managed::new(Slider::default());
        let handle = engine.wrap(&slider, Ownership::Script);

        let guard = slider.lock::<Slider>();
        let reader = {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || runtime.read_property(handle, "value"))
        };
        // Let the binding read reach the loop thread and wait on the value.
        std::thread::sleep(Duration::from_millis(50));
        if let Some(mut guard) = guard {
            guard.value = 42;
        }

        bridge.changed(&slider, |s: &Slider| &s.value);
        assert_eq!(reader.join().unwrap(), DataValue::Int32(42));
        assert_eq!(runtime.take_changes().len(), 1);
        bridge.quit();
    }

    #[test]
    #[should_panic(expected = "event loop is gone")]
    fn marshalled_call_after_quit_is_fatal() {
        let (_runtime, bridge) = start();
        bridge.quit();
        bridge.run(|| 1);
    }

    #[test]
    fn registered_type_resolves_on_first_access() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let spec = bridge.register_type(
            TypeSpec::<Slider>::new("Slider").with_init(|s: &mut Slider, obj: Object| {
                s.label = format!("slider@{}", obj.addr());
            }),
        );

        let handle = runtime.instantiate(engine.addr(), spec);
        let fold = runtime.fold_of(handle).unwrap();
        assert!(bridge.inspect(|r| r.is_pending(fold)));

        let label = runtime.read_property(handle, "label");
        assert_eq!(label, DataValue::String(format!("slider@{handle}")));
        assert!(!bridge.inspect(|r| r.is_pending(fold)));
        assert_eq!(bridge.inspect(|r| r.fold_engine(fold)), Some(engine.addr()));

        // The initializer only runs once.
        runtime.write_property(handle, "label", DataValue::String("kept".into()));
        assert_eq!(runtime.read_property(handle, "label"), DataValue::String("kept".into()));
        bridge.quit();
    }

    #[test]
    fn engine_teardown_drains_values_then_releases_engine() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let addr = engine.addr();
        let a = Managed::new(Slider::default());
        let b = Managed::new(Slider::default());
        engine.wrap(&a, Ownership::Script);
        engine.wrap(&a, Ownership::Native);
        engine.wrap(&b, Ownership::Script);
        assert_eq!(bridge.inspect(|r| r.chain(addr, &a)).len(), 2);
        assert_eq!(runtime.value_count(), 3);

        engine.destroy();
        bridge.flush();
        assert!(!bridge.inspect(|r| r.has_engine(addr)));
        assert_eq!(bridge.inspect(|r| r.fold_count()), 0);
        assert_eq!(runtime.value_count(), 0);
        assert!(!runtime.has_engine(addr));
        bridge.quit();
    }

    #[test]
    fn deleting_one_alias_keeps_the_chain_consistent() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let slider = Managed::new(Slider::default());
        let script = engine.wrap(&slider, Ownership::Script);
        let native = engine.wrap(&slider, Ownership::Native);
        assert_ne!(script, native);

        runtime.delete_later(script);
        bridge.flush();

        let chain = bridge.inspect(|r| r.chain(engine.addr(), &slider));
        assert_eq!(chain.len(), 1);
        assert_eq!(bridge.inspect(|r| r.fold_handle(chain[0])), Some(native));
        assert_eq!(runtime.value(native).map(|v| v.parent), Some(Some(engine.addr())));
        bridge.inspect(|r| r.check_integrity()).unwrap();
        bridge.quit();
    }

    #[test]
    #[should_panic(expected = "native runtime failure: Slider has no property missing")]
    fn native_failure_is_raised_on_the_host() {
        let (runtime, bridge) = start();
        let engine = bridge.new_engine();
        let handle = engine.wrap(&Managed::new(Slider::default()), Ownership::Script);
        runtime.read_property(handle, "missing");
    }
}
