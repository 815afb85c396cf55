use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::{Mutex, RwLock};

use patchbay_interface::{uris, Path, Properties, Value};

use crate::buffer_factory::{BufferFactory, BufferRef};
use crate::context::ProcessContext;
use crate::plugin::{Plugin, PluginInstance, PortBuffers, PortGuard, MAX_NODE_PORTS};
use crate::port::{Port, PortType};
use crate::store::ObjectBase;

/// A plugin instance occupying one slot in a patch.
///
/// Voiced nodes run one plugin instance per patch voice; shared nodes run
/// a single instance serving every voice.
pub struct Node {
    base: ObjectBase,
    plugin: Arc<dyn Plugin>,
    ports: RwLock<Vec<Arc<Port>>>,
    polyphonic: AtomicBool,
    instances: Mutex<Vec<Box<dyn PluginInstance>>>,
    staged_extra: Mutex<Vec<Box<dyn PluginInstance>>>,
    staged_poly: AtomicUsize,
    activated: AtomicBool,
}

impl Node {
    pub fn new(
        path: Path,
        plugin: Arc<dyn Plugin>,
        polyphonic: bool,
        poly: usize,
        sample_rate: u32,
        factory: &BufferFactory,
    ) -> Result<Arc<Node>, NodeError> {
        let specs = plugin.ports();
        if specs.len() > MAX_NODE_PORTS {
            return Err(NodeError::TooManyPorts(specs.len()));
        }
        let mut ports = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let port_path = path
                .child(&spec.symbol)
                .map_err(|_| NodeError::BadPortSymbol(spec.symbol.clone()))?;
            ports.push(Port::new(
                port_path,
                index as u32,
                spec.direction,
                spec.ty,
                polyphonic,
                poly,
                spec.default.unwrap_or(0.0),
                factory,
            ));
        }
        let voices = if polyphonic { poly.max(1) } else { 1 };
        let instances = (0..voices)
            .map(|_| plugin.instantiate(sample_rate))
            .collect();
        Ok(Arc::new(Node {
            base: ObjectBase::new(path, Properties::new()),
            plugin,
            ports: RwLock::new(ports),
            polyphonic: AtomicBool::new(polyphonic),
            instances: Mutex::new(instances),
            staged_extra: Mutex::new(Vec::new()),
            staged_poly: AtomicUsize::new(voices),
            activated: AtomicBool::new(false),
        }))
    }

    pub fn base(&self) -> &ObjectBase {
        &self.base
    }

    pub fn path(&self) -> Path {
        self.base.path()
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn polyphonic(&self) -> bool {
        self.polyphonic.load(Ordering::Relaxed)
    }

    pub fn set_polyphonic(&self, polyphonic: bool) {
        self.polyphonic.store(polyphonic, Ordering::Relaxed);
        for port in self.ports.read().iter() {
            port.set_polyphonic(polyphonic);
        }
    }

    pub fn ports(&self) -> Vec<Arc<Port>> {
        self.ports.read().clone()
    }

    pub fn port(&self, index: usize) -> Option<Arc<Port>> {
        self.ports.read().get(index).cloned()
    }

    pub fn port_by_symbol(&self, symbol: &str) -> Option<Arc<Port>> {
        self.ports
            .read()
            .iter()
            .find(|p| p.base().symbol() == symbol)
            .cloned()
    }

    pub fn activate(&self) {
        if !self.activated.swap(true, Ordering::Relaxed) {
            for instance in self.instances.lock().iter_mut() {
                instance.activate();
            }
        }
    }

    pub fn deactivate(&self) {
        if self.activated.swap(false, Ordering::Relaxed) {
            for instance in self.instances.lock().iter_mut() {
                instance.deactivate();
            }
        }
    }

    /// Runs every voice's message-context callback. Message worker only.
    pub fn message_run(&self) {
        for instance in self.instances.lock().iter_mut() {
            instance.message_run();
        }
    }

    /// Stages plugin voices for a polyphony change. Pre-process phase:
    /// instantiation may allocate, and the live voice vector reserves
    /// capacity here so the swap never allocates on the audio thread.
    pub fn prepare_poly(&self, poly: usize, sample_rate: u32) {
        if !self.polyphonic() {
            return;
        }
        let poly = poly.max(1);
        let current = {
            let mut instances = self.instances.lock();
            let len = instances.len();
            instances.reserve(poly.saturating_sub(len));
            len
        };
        let mut extra = Vec::new();
        for _ in current..poly {
            let mut instance = self.plugin.instantiate(sample_rate);
            if self.activated.load(Ordering::Relaxed) {
                instance.activate();
            }
            extra.push(instance);
        }
        *self.staged_extra.lock() = extra;
        self.staged_poly.store(poly, Ordering::Relaxed);
    }

    /// Publishes a staged polyphony change. Execute phase: moves staged
    /// voices in and hands surplus voices back for deferred teardown.
    pub fn apply_poly(&self, mut retire: impl FnMut(Box<dyn PluginInstance>)) {
        if !self.polyphonic() {
            return;
        }
        let target = self.staged_poly.load(Ordering::Relaxed);
        let mut instances = self.instances.lock();
        let mut extra = self.staged_extra.lock();
        while instances.len() > target {
            if let Some(instance) = instances.pop() {
                retire(instance);
            }
        }
        while instances.len() < target {
            match extra.pop() {
                Some(instance) => instances.push(instance),
                None => break,
            }
        }
    }

    /// Runs one block: every voice locks its port buffers (inputs shared,
    /// outputs exclusive) and invokes the plugin.
    ///
    /// Event buffers are one-shot: outputs are emptied before the run so
    /// plugins append fresh stamps, and own-buffered inputs are emptied
    /// after the run once their stamps have been consumed.
    pub fn process(&self, ctx: &ProcessContext) {
        let ports = self.ports.read();
        let mut instances = self.instances.lock();
        for (voice, instance) in instances.iter_mut().enumerate() {
            for port in ports.iter() {
                if !port.is_input() && matches!(port.port_type(), PortType::Event) {
                    port.voice_buffer(voice).write().clear();
                }
            }
            {
                let mut refs: ArrayVec<BufferRef, MAX_NODE_PORTS> = ArrayVec::new();
                for port in ports.iter() {
                    if refs.try_push(port.voice_buffer(voice)).is_err() {
                        return;
                    }
                }
                let mut guards: ArrayVec<PortGuard<'_>, MAX_NODE_PORTS> = ArrayVec::new();
                for (port, buffer) in ports.iter().zip(refs.iter()) {
                    let guard = if port.is_input() {
                        PortGuard::Read(buffer.read())
                    } else {
                        PortGuard::Write(buffer.write())
                    };
                    if guards.try_push(guard).is_err() {
                        return;
                    }
                }
                let mut buffers = PortBuffers::new(guards);
                instance.run(&mut buffers, ctx.nframes());

                if voice == 0 {
                    for (index, port) in ports.iter().enumerate() {
                        if !port.is_input() && port.broadcast() {
                            if let Some(value) =
                                buffers.get(index).and_then(|b| b.control_value())
                            {
                                port.set_last_value(value);
                            }
                        }
                    }
                }
            }
            for port in ports.iter() {
                if port.is_input()
                    && matches!(port.port_type(), PortType::Event)
                    && !port.is_aliased()
                    && !port.binding_is_local()
                {
                    port.voice_buffer(voice).write().clear();
                }
            }
        }
    }

    pub fn describe(&self) -> Properties {
        let mut properties = self.base.properties();
        properties.insert(uris::TYPE, Value::Uri(uris::CLASS_NODE.to_string()));
        properties.insert(
            uris::INSTANCE_OF,
            Value::Uri(self.plugin.uri().to_string()),
        );
        properties.insert(uris::POLYPHONIC, Value::Bool(self.polyphonic()));
        properties
    }
}

/// Errors detected while building a node from a plugin signature.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("plugin exposes {0} ports, more than the supported maximum")]
    TooManyPorts(usize),
    #[error("plugin port symbol {0:?} is not a valid path symbol")]
    BadPortSymbol(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::BuiltinLibrary;
    use crate::config::EngineConfig;
    use crate::plugin::PluginLibrary;

    fn fixture() -> (BufferFactory, Arc<dyn Plugin>) {
        let factory = BufferFactory::new(&EngineConfig {
            block_length: 8,
            ..EngineConfig::default()
        });
        let library = BuiltinLibrary::new();
        let plugin = library.plugin("urn:patchbay:amp").expect("amp plugin");
        (factory, plugin)
    }

    #[test]
    fn ports_follow_the_plugin_signature() {
        let (factory, plugin) = fixture();
        let node = Node::new(
            Path::new("/p/amp").expect("path"),
            plugin,
            false,
            1,
            48_000,
            &factory,
        )
        .expect("node");
        let ports = node.ports();
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].base().symbol(), "in");
        assert_eq!(ports[1].base().symbol(), "gain");
        assert_eq!(ports[2].base().symbol(), "out");
        assert_eq!(ports[2].index(), 2);
        assert!(node.port_by_symbol("gain").is_some());
    }

    #[test]
    fn poly_staging_adds_and_retires_voices() {
        let (factory, plugin) = fixture();
        let node = Node::new(
            Path::new("/p/amp").expect("path"),
            plugin,
            true,
            2,
            48_000,
            &factory,
        )
        .expect("node");

        node.prepare_poly(4, 48_000);
        let mut retired = 0;
        node.apply_poly(|_| retired += 1);
        assert_eq!(node.instances.lock().len(), 4);
        assert_eq!(retired, 0);

        node.prepare_poly(1, 48_000);
        node.apply_poly(|_| retired += 1);
        assert_eq!(node.instances.lock().len(), 1);
        assert_eq!(retired, 3);
    }

    #[test]
    fn amp_scales_input_by_gain() {
        let (factory, plugin) = fixture();
        let node = Node::new(
            Path::new("/p/amp").expect("path"),
            plugin,
            false,
            1,
            48_000,
            &factory,
        )
        .expect("node");

        let ports = node.ports();
        ports[0].voice_buffer(0).write().set_float(0.5, 0);
        ports[1].voice_buffer(0).write().set_float(2.0, 0);

        let ctx = ProcessContext::new(0, 8);
        node.process(&ctx);

        let out = ports[2].voice_buffer(0);
        let guard = out.read();
        assert_eq!(guard.as_audio().expect("audio"), &[1.0; 8]);
    }
}
