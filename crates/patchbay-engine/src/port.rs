use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use atomic_float::AtomicF32;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use patchbay_interface::{uris, Path, Properties, Value};

use crate::buffer_factory::{BufferFactory, BufferRef};
use crate::store::ObjectBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn is_input(&self) -> bool {
        matches!(self, Direction::Input)
    }
}

/// Signal type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Audio,
    Control,
    /// Control-rate signal with an audio-shaped buffer.
    Cv,
    Event,
    Atom,
    Unknown,
}

impl PortType {
    pub fn from_uri(uri: &str) -> Self {
        match uri {
            uris::AUDIO_PORT => PortType::Audio,
            uris::CONTROL_PORT => PortType::Control,
            uris::CV_PORT => PortType::Cv,
            uris::EVENT_PORT => PortType::Event,
            uris::ATOM_PORT => PortType::Atom,
            _ => PortType::Unknown,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            PortType::Audio => uris::AUDIO_PORT,
            PortType::Control => uris::CONTROL_PORT,
            PortType::Cv => uris::CV_PORT,
            PortType::Event => uris::EVENT_PORT,
            PortType::Atom => uris::ATOM_PORT,
            PortType::Unknown => uris::CLASS_PORT,
        }
    }

    /// Buffer shape backing this type; CV signals live in audio buffers.
    pub fn shape(&self) -> PortType {
        match self {
            PortType::Cv => PortType::Audio,
            other => *other,
        }
    }
}

/// Where a port's per-voice buffers currently come from.
///
/// Inputs move between these states as connections come and go; outputs
/// always use their own buffers.
#[derive(Debug)]
pub enum PortBinding {
    /// The port's own buffers, holding its default or last-set value.
    Own,
    /// Exactly one compatible connection: read the source port directly.
    Alias(Arc<Port>),
    /// Dedicated buffers owned for mixing or type conversion.
    Local(Arc<Vec<BufferRef>>),
}

/// A typed, directional port on a node or patch.
pub struct Port {
    base: ObjectBase,
    index: u32,
    direction: Direction,
    ty: PortType,
    default_value: f32,
    polyphonic: AtomicBool,
    /// Port-owned buffers, one per voice.
    own: ArcSwap<Vec<BufferRef>>,
    /// Published buffer source the audio thread resolves through.
    binding: ArcSwap<PortBinding>,
    staged_own: Mutex<Option<Vec<BufferRef>>>,
    staged_binding: Mutex<Option<PortBinding>>,
    num_connections: AtomicUsize,
    last_value: AtomicF32,
    broadcast: AtomicBool,
}

impl Port {
    pub fn new(
        path: Path,
        index: u32,
        direction: Direction,
        ty: PortType,
        polyphonic: bool,
        voices: usize,
        default_value: f32,
        factory: &BufferFactory,
    ) -> Arc<Port> {
        let voices = if polyphonic { voices.max(1) } else { 1 };
        let own: Vec<BufferRef> = (0..voices)
            .map(|_| {
                let buffer = factory.get(ty);
                buffer.write().set_float(default_value, 0);
                buffer
            })
            .collect();
        Arc::new(Port {
            base: ObjectBase::new(path, Properties::new()),
            index,
            direction,
            ty,
            default_value,
            polyphonic: AtomicBool::new(polyphonic),
            own: ArcSwap::from_pointee(own),
            binding: ArcSwap::from_pointee(PortBinding::Own),
            staged_own: Mutex::new(None),
            staged_binding: Mutex::new(None),
            num_connections: AtomicUsize::new(0),
            last_value: AtomicF32::new(default_value),
            broadcast: AtomicBool::new(false),
        })
    }

    pub fn base(&self) -> &ObjectBase {
        &self.base
    }

    pub fn path(&self) -> Path {
        self.base.path()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn port_type(&self) -> PortType {
        self.ty
    }

    pub fn is_input(&self) -> bool {
        self.direction.is_input()
    }

    pub fn polyphonic(&self) -> bool {
        self.polyphonic.load(Ordering::Relaxed)
    }

    pub fn set_polyphonic(&self, polyphonic: bool) {
        self.polyphonic.store(polyphonic, Ordering::Relaxed);
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    pub fn last_value(&self) -> f32 {
        self.last_value.load(Ordering::Relaxed)
    }

    pub fn set_last_value(&self, value: f32) {
        self.last_value.store(value, Ordering::Relaxed);
    }

    pub fn broadcast(&self) -> bool {
        self.broadcast.load(Ordering::Relaxed)
    }

    pub fn set_broadcast(&self, broadcast: bool) {
        self.broadcast.store(broadcast, Ordering::Relaxed);
    }

    /// Current buffer count; equals the patch's internal polyphony for
    /// voiced ports and 1 for shared ports.
    pub fn voices(&self) -> usize {
        self.own.load().len()
    }

    pub fn num_connections(&self) -> usize {
        self.num_connections.load(Ordering::Relaxed)
    }

    pub fn increment_num_connections(&self) -> usize {
        self.num_connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn decrement_num_connections(&self) -> usize {
        let previous = self.num_connections.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0);
        previous - 1
    }

    /// Resolves the buffer the given voice reads or writes this block.
    ///
    /// Aliased inputs chase through their source port; shared sources
    /// serve every voice from their single buffer.
    pub fn voice_buffer(&self, voice: usize) -> BufferRef {
        match &**self.binding.load() {
            PortBinding::Own => {
                let own = self.own.load();
                own[voice % own.len()].clone()
            }
            PortBinding::Alias(src) => src.voice_buffer(voice),
            PortBinding::Local(buffers) => buffers[voice % buffers.len()].clone(),
        }
    }

    pub fn is_aliased(&self) -> bool {
        matches!(&**self.binding.load(), PortBinding::Alias(_))
    }

    /// True when the port's effective binding (staged if present,
    /// otherwise published) already owns local mix/conversion buffers.
    pub fn binding_is_local(&self) -> bool {
        if let Some(staged) = self.staged_binding.lock().as_ref() {
            return matches!(staged, PortBinding::Local(_));
        }
        matches!(&**self.binding.load(), PortBinding::Local(_))
    }

    /// The port the published (or staged) binding aliases, if any.
    pub fn aliased_to(&self) -> Option<Arc<Port>> {
        if let Some(PortBinding::Alias(src)) = self.staged_binding.lock().as_ref() {
            return Some(Arc::clone(src));
        }
        match &**self.binding.load() {
            PortBinding::Alias(src) => Some(Arc::clone(src)),
            _ => None,
        }
    }

    pub fn own_buffers(&self) -> Arc<Vec<BufferRef>> {
        self.own.load_full()
    }

    /// Stages a binding change; published later by [`Port::apply_staged`]
    /// at a block boundary.
    pub fn stage_binding(&self, binding: PortBinding) {
        *self.staged_binding.lock() = Some(binding);
    }

    /// Stages a replacement own-buffer set (polyphony changes).
    pub fn stage_own(&self, buffers: Vec<BufferRef>) {
        *self.staged_own.lock() = Some(buffers);
    }

    /// Publishes any staged buffers and binding. RT-safe: swaps pointers
    /// only. Returns the retired buffer sets for deferred reclamation.
    pub fn apply_staged(&self) -> Vec<Arc<Vec<BufferRef>>> {
        let mut retired = Vec::new();
        if let Some(own) = self.staged_own.lock().take() {
            retired.push(self.own.swap(Arc::new(own)));
        }
        if let Some(binding) = self.staged_binding.lock().take() {
            let old = self.binding.swap(Arc::new(binding));
            if let PortBinding::Local(buffers) = &*old {
                retired.push(Arc::clone(buffers));
            }
        }
        retired
    }

    /// Allocates the own-buffer set for a new polyphony, pre-filled with
    /// the port's last value. Pre-process phase only.
    pub fn prepare_poly(&self, factory: &BufferFactory, poly: usize) {
        let voices = if self.polyphonic() { poly.max(1) } else { 1 };
        let value = self.last_value();
        let own: Vec<BufferRef> = (0..voices)
            .map(|_| {
                let buffer = factory.get(self.ty);
                buffer.write().set_float(value, 0);
                buffer
            })
            .collect();
        self.stage_own(own);

        // Mix and conversion buffers track the voice count too.
        if let PortBinding::Local(_) = &**self.binding.load() {
            let local: Vec<BufferRef> = (0..voices).map(|_| factory.get(self.ty)).collect();
            self.stage_binding(PortBinding::Local(Arc::new(local)));
        }
    }

    /// Writes a float value into every voice of the published buffers,
    /// from `from_frame` onward for audio-shaped ports. Execute phase.
    pub fn write_value(&self, value: f32, from_frame: usize) {
        for voice in 0..self.voices() {
            self.voice_buffer(voice).write().set_float(value, from_frame);
        }
        self.set_last_value(value);
    }

    /// Object description sent to clients: engine-attached facts merged
    /// over the stored properties.
    pub fn describe(&self) -> Properties {
        let mut properties = self.base.properties();
        properties.insert(uris::TYPE, Value::Uri(uris::CLASS_PORT.to_string()));
        properties.insert(uris::PORT_TYPE, Value::Uri(self.ty.uri().to_string()));
        properties.insert(uris::IS_OUTPUT, Value::Bool(!self.is_input()));
        properties.insert(uris::INDEX, Value::Int(self.index as i32));
        properties.insert(uris::POLYPHONIC, Value::Bool(self.polyphonic()));
        if matches!(self.ty, PortType::Control | PortType::Cv | PortType::Audio) {
            properties.insert(uris::VALUE, Value::Float(self.last_value()));
        }
        properties
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("path", &self.base.path())
            .field("index", &self.index)
            .field("direction", &self.direction)
            .field("type", &self.ty)
            .field("voices", &self.voices())
            .field("connections", &self.num_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn factory() -> BufferFactory {
        BufferFactory::new(&EngineConfig {
            block_length: 8,
            ..EngineConfig::default()
        })
    }

    fn port(direction: Direction, ty: PortType, polyphonic: bool, voices: usize) -> Arc<Port> {
        Port::new(
            Path::new("/n/p").expect("path"),
            0,
            direction,
            ty,
            polyphonic,
            voices,
            0.5,
            &factory(),
        )
    }

    #[test]
    fn shared_port_has_one_voice() {
        let p = port(Direction::Input, PortType::Control, false, 4);
        assert_eq!(p.voices(), 1);
        assert_eq!(p.voice_buffer(3).read().control_value(), Some(0.5));
    }

    #[test]
    fn voiced_port_tracks_poly() {
        let f = factory();
        let p = Port::new(
            Path::new("/n/p").expect("path"),
            0,
            Direction::Input,
            PortType::Audio,
            true,
            2,
            0.0,
            &f,
        );
        assert_eq!(p.voices(), 2);
        p.prepare_poly(&f, 4);
        // Not yet published.
        assert_eq!(p.voices(), 2);
        let retired = p.apply_staged();
        assert_eq!(p.voices(), 4);
        assert_eq!(retired.len(), 1);
    }

    #[test]
    fn alias_chases_source() {
        let f = factory();
        let src = Port::new(
            Path::new("/a/out").expect("path"),
            0,
            Direction::Output,
            PortType::Control,
            false,
            1,
            0.25,
            &f,
        );
        let dst = port(Direction::Input, PortType::Control, false, 1);
        dst.stage_binding(PortBinding::Alias(Arc::clone(&src)));
        dst.apply_staged();
        assert!(dst.is_aliased());
        assert_eq!(dst.voice_buffer(0).read().control_value(), Some(0.25));
    }

    #[test]
    fn write_value_updates_all_voices() {
        let f = factory();
        let p = Port::new(
            Path::new("/n/p").expect("path"),
            0,
            Direction::Input,
            PortType::Control,
            true,
            3,
            0.0,
            &f,
        );
        p.write_value(0.75, 0);
        for voice in 0..3 {
            assert_eq!(p.voice_buffer(voice).read().control_value(), Some(0.75));
        }
        assert_eq!(p.last_value(), 0.75);
    }
}
