use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::Buffer;
use crate::port::{Direction, PortType};

/// Most ports a single plugin may expose.
pub const MAX_NODE_PORTS: usize = 32;

/// One port in a plugin's signature.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub symbol: String,
    pub direction: Direction,
    pub ty: PortType,
    pub default: Option<f32>,
}

impl PortSpec {
    pub fn new(symbol: impl Into<String>, direction: Direction, ty: PortType) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: f32) -> Self {
        self.default = Some(default);
        self
    }
}

/// Plugin descriptor consumed by the engine.
///
/// Descriptors are shared by reference; they are not graph objects.
pub trait Plugin: Send + Sync {
    fn uri(&self) -> &str;

    fn name(&self) -> &str;

    /// Port signature, in index order.
    fn ports(&self) -> &[PortSpec];

    fn instantiate(&self, sample_rate: u32) -> Box<dyn PluginInstance>;

    /// Whether value changes should also schedule a pass on the
    /// non-realtime message context.
    fn wants_message_context(&self) -> bool {
        false
    }
}

/// A live plugin voice.
///
/// `run` receives the block's port buffers in the plugin's port-index
/// order and must not allocate or block.
pub trait PluginInstance: Send {
    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    fn run(&mut self, buffers: &mut PortBuffers<'_>, nframes: u32);

    /// Non-realtime callback scheduled through the message context.
    fn message_run(&mut self) {}
}

/// Source of plugin descriptors (built-in table, or an external loader).
pub trait PluginLibrary: Send + Sync {
    /// Scans for plugins; returns the number available afterwards.
    fn load(&self) -> usize;

    fn plugin(&self, uri: &str) -> Option<Arc<dyn Plugin>>;

    fn plugins(&self) -> Vec<Arc<dyn Plugin>>;
}

/// A locked port buffer: shared for inputs, exclusive for outputs.
pub enum PortGuard<'a> {
    Read(RwLockReadGuard<'a, Buffer>),
    Write(RwLockWriteGuard<'a, Buffer>),
}

impl PortGuard<'_> {
    pub fn buffer(&self) -> &Buffer {
        match self {
            PortGuard::Read(guard) => guard,
            PortGuard::Write(guard) => guard,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut Buffer> {
        match self {
            PortGuard::Read(_) => None,
            PortGuard::Write(guard) => Some(&mut *guard),
        }
    }
}

/// The buffers of one voice for one block, indexed by plugin port index.
pub struct PortBuffers<'a> {
    guards: ArrayVec<PortGuard<'a>, MAX_NODE_PORTS>,
}

impl<'a> PortBuffers<'a> {
    pub fn new(guards: ArrayVec<PortGuard<'a>, MAX_NODE_PORTS>) -> Self {
        Self { guards }
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Buffer> {
        self.guards.get(index).map(PortGuard::buffer)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        self.guards.get_mut(index).and_then(PortGuard::buffer_mut)
    }

    /// Borrows an input and an output buffer at once.
    pub fn in_out(&mut self, input: usize, output: usize) -> Option<(&Buffer, &mut Buffer)> {
        if input == output || input >= self.guards.len() || output >= self.guards.len() {
            return None;
        }
        let slice = self.guards.as_mut_slice();
        if input < output {
            let (head, tail) = slice.split_at_mut(output);
            Some((head[input].buffer(), tail[0].buffer_mut()?))
        } else {
            let (head, tail) = slice.split_at_mut(input);
            Some((tail[0].buffer(), head[output].buffer_mut()?))
        }
    }
}
