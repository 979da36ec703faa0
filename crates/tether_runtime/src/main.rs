//! Tether Runtime
//!
//! Boots the bridge on a headless native runtime and walks one value through
//! its whole life: wrapped, bound, changed and finally torn down.

use anyhow::{Context, Result};
use std::mem::offset_of;
use std::sync::Arc;
use tether_core::{
    Bridge, BridgeSettings, DataValue, Managed, Object, Ownership, Reflect, TypeBuilder, TypeSpec,
};
use tether_headless::HeadlessRuntime;
use tracing::Level;

const SETTINGS_ENV: &str = "TETHER_SETTINGS";

#[derive(Default)]
struct Counter {
    count: i64,
    caption: String,
}

impl Reflect for Counter {
    fn describe(ty: &mut TypeBuilder<Self>) {
        ty.field("count", offset_of!(Counter, count), |c| &mut c.count)
            .field("caption", offset_of!(Counter, caption), |c| &mut c.caption)
            .getter("doubled", |c| c.count * 2)
            .computed("double", "doubled");
    }
}

fn load_settings() -> Result<BridgeSettings> {
    match std::env::var(SETTINGS_ENV) {
        Ok(path) => BridgeSettings::load(&path).with_context(|| format!("loading {SETTINGS_ENV}")),
        Err(_) => Ok(BridgeSettings::default()),
    }
}

fn main() -> Result<()> {
    let settings = load_settings()?;
    let level: Level = settings
        .log_level
        .parse()
        .with_context(|| format!("unknown log level {:?}", settings.log_level))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Tether v{}", tether_core::VERSION);

    let runtime = Arc::new(HeadlessRuntime::new());
    let bridge = Bridge::start(runtime.clone(), settings)?;
    let engine = bridge.new_engine();

    let counter = Managed::new(Counter::default());
    let handle = engine.wrap(&counter, Ownership::Script);
    tracing::info!(handle = %handle, "counter wrapped");

    counter.with(|c: &mut Counter| c.count = 21)?;
    bridge.changed(&counter, |c: &Counter| &c.count);
    for change in runtime.take_changes() {
        tracing::info!(handle = %change.handle, property = ?change.property, "native side notified");
    }
    if let DataValue::Int32(double) = runtime.read_property(handle, "double") {
        tracing::info!(double, "binding evaluated");
    }

    let spec = bridge.register_type(TypeSpec::<Counter>::new("Counter").with_init(
        |c: &mut Counter, obj: Object| c.caption = format!("counter at {}", obj.addr()),
    ));
    let item = runtime.instantiate(engine.addr(), spec);
    tracing::info!(caption = ?runtime.read_property(item, "caption"), "declared instance resolved");

    bridge.lock();
    let on_loop = bridge.run(|| std::thread::current().name().map(str::to_string));
    tracing::info!(thread = ?on_loop, "ran while the loop was frozen");
    bridge.unlock();

    engine.destroy();
    bridge.flush();

    let stats = bridge.stats();
    tracing::info!(
        values = stats.values_alive,
        engines = stats.engines_alive,
        marshalled = stats.calls_marshalled,
        "bridge statistics"
    );

    bridge.quit();
    Ok(())
}
