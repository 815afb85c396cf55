use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::Context as _;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use patchbay_interface::{FrameTime, Path, Value};

use crate::bindings::{BindingKey, BindingOutcome, ControlBindings};
use crate::broadcaster::Broadcaster;
use crate::buffer_factory::BufferFactory;
use crate::compiler;
use crate::config::EngineConfig;
use crate::context::ProcessContext;
use crate::driver::{Driver, DriverPort};
use crate::events::{Event, SetPortValue};
use crate::maid::Maid;
use crate::messaging::MessageContext;
use crate::metrics::Metrics;
use crate::patch::Patch;
use crate::plugin::PluginLibrary;
use crate::source::{self, EventSource};
use crate::store::{GraphObject, Store};

/// The assembled engine core.
///
/// Owns the root patch, the store, the event pipeline, and every shared
/// service the events coordinate through. The audio driver calls
/// [`Engine::run`] once per block.
pub struct Engine {
    config: EngineConfig,
    store: Store,
    root: Arc<Patch>,
    buffer_factory: BufferFactory,
    broadcaster: Broadcaster,
    maid: Maid,
    bindings: ControlBindings,
    messaging: MessageContext,
    plugins: Arc<dyn PluginLibrary>,
    driver: RwLock<Option<Arc<dyn Driver>>>,
    source: EventSource,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sample_pos: AtomicU64,
    activated: AtomicBool,
    quit: AtomicBool,
    metrics: Metrics,
    self_ref: RwLock<Weak<Engine>>,
}

impl Engine {
    pub fn new(config: EngineConfig, plugins: Arc<dyn PluginLibrary>) -> Arc<Engine> {
        let buffer_factory = BufferFactory::new(&config);
        let root = Patch::new(Path::root(), 1);
        root.enable();

        let engine = Arc::new(Engine {
            source: EventSource::new(config.event_queue_size),
            maid: Maid::new(config.event_queue_size),
            store: Store::new(),
            buffer_factory,
            broadcaster: Broadcaster::new(),
            bindings: ControlBindings::new(),
            messaging: MessageContext::new(),
            plugins,
            driver: RwLock::new(None),
            workers: Mutex::new(Vec::new()),
            sample_pos: AtomicU64::new(0),
            activated: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            metrics: Metrics::new(),
            root: Arc::clone(&root),
            config,
            self_ref: RwLock::new(Weak::new()),
        });

        *engine.self_ref.write() = Arc::downgrade(&engine);
        engine.store.insert(GraphObject::Patch(root));
        if let Ok(compiled) = compiler::compile(&engine.root) {
            engine.root.set_compiled(Some(compiled));
        }
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn root(&self) -> &Arc<Patch> {
        &self.root
    }

    pub fn buffer_factory(&self) -> &BufferFactory {
        &self.buffer_factory
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn maid(&self) -> &Maid {
        &self.maid
    }

    pub fn control_bindings(&self) -> &ControlBindings {
        &self.bindings
    }

    pub fn message_context(&self) -> &MessageContext {
        &self.messaging
    }

    pub fn plugin_library(&self) -> &Arc<dyn PluginLibrary> {
        &self.plugins
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn set_driver(&self, driver: Arc<dyn Driver>) {
        *self.driver.write() = Some(driver);
    }

    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.read().clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.driver()
            .map(|d| d.sample_rate())
            .unwrap_or(self.config.sample_rate)
    }

    pub fn block_length(&self) -> u32 {
        self.driver()
            .map(|d| d.block_length())
            .unwrap_or(self.config.block_length)
    }

    /// Current time in driver frames; timestamps new events.
    pub fn frame_time(&self) -> FrameTime {
        self.driver()
            .map(|d| d.frame_time())
            .unwrap_or_else(|| self.sample_pos.load(Ordering::Relaxed))
    }

    pub fn activated(&self) -> bool {
        self.activated.load(Ordering::Relaxed)
    }

    /// Brings the engine live: mirrors the root patch's external ports
    /// into the driver, activates every node, starts the workers, then
    /// the driver.
    pub fn activate(self: &Arc<Self>) -> anyhow::Result<()> {
        let driver = self
            .driver()
            .context("cannot activate: no audio driver attached")?;
        if self.activated.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        for port in self.root.ports() {
            driver.add_port(DriverPort::new(port));
        }
        for object in self.store.snapshot() {
            if let Some(node) = object.as_node() {
                node.activate();
            }
        }

        *self.workers.lock() = source::spawn_workers(self);
        driver
            .start(Arc::clone(self))
            .context("failed to start audio driver")?;
        info!(
            sample_rate = driver.sample_rate(),
            block_length = driver.block_length(),
            "engine activated"
        );
        Ok(())
    }

    pub fn deactivate(&self) {
        if !self.activated.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(driver) = self.driver() {
            driver.stop();
        }
        for object in self.store.snapshot() {
            if let Some(node) = object.as_node() {
                node.deactivate();
            }
        }
        debug!("engine deactivated");
    }

    /// Full teardown: stops the driver and joins the workers. Host thread
    /// only; never called from a worker.
    pub fn shutdown(&self) {
        self.deactivate();
        self.source.request_stop();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        // Flush anything the post worker did not live to see.
        self.source.pump_post(self);
        self.maid.drain(&self.buffer_factory);
    }

    /// One audio block: drain ready events, walk the root patch's
    /// compiled list, advance the frame clock.
    pub fn run(&self, nframes: u32) {
        let nframes = nframes.min(self.config.block_length);
        if nframes == 0 {
            return;
        }
        let started = Instant::now();
        let start = self.sample_pos.load(Ordering::Relaxed);
        let ctx = ProcessContext::new(start, nframes);

        let executed = self.source.process_prepared(self, &ctx);
        self.root.process(&ctx);

        self.sample_pos
            .store(ctx.end(), Ordering::Relaxed);
        let ns = started.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.metrics.record(ns, nframes, executed);
    }

    /// Submits an event to the pipeline.
    pub fn submit(&self, event: Box<dyn Event>) -> bool {
        self.source.submit(event)
    }

    /// Feeds one external controller value: a pending learn captures the
    /// key, a bound port receives the value through the normal port-value
    /// event path.
    pub fn control_input(&self, key: BindingKey, raw: u8) {
        match self.bindings.feed(key, raw) {
            BindingOutcome::Learned(captured, port) => {
                self.broadcaster.send_property_change(
                    port.path().as_str(),
                    patchbay_interface::uris::CONTROL_BINDING,
                    &captured.to_dict(),
                );
            }
            BindingOutcome::Applied(port, value) => {
                let event = SetPortValue::immediate(
                    None,
                    self.frame_time(),
                    port,
                    Value::Float(value),
                );
                self.submit(Box::new(event));
            }
            BindingOutcome::Unbound => {}
        }
    }

    /// Activation entry point for events, which only hold `&Engine`.
    pub fn activate_by_ref(&self) -> anyhow::Result<()> {
        let strong = self
            .self_ref
            .read()
            .upgrade()
            .context("engine is shutting down")?;
        strong.activate()
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.source.request_stop();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}
