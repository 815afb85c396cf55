use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::Buffer;
use crate::config::EngineConfig;
use crate::port::PortType;

/// Shared handle to a pooled buffer.
///
/// Readers on the audio thread take recursive read guards so that several
/// input ports aliasing the same upstream buffer can be locked together;
/// the single writer per block is the producing port.
#[derive(Debug, Clone)]
pub struct BufferRef(Arc<RwLock<Buffer>>);

impl BufferRef {
    pub fn new(buffer: Buffer) -> Self {
        BufferRef(Arc::new(RwLock::new(buffer)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Buffer> {
        self.0.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Buffer> {
        self.0.write()
    }

    pub fn ptr_eq(&self, other: &BufferRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn try_unwrap(self) -> Option<Buffer> {
        Arc::try_unwrap(self.0).ok().map(|lock| lock.into_inner())
    }
}

/// Pooled allocator for block buffers, keyed by (type shape, capacity).
///
/// The factory is the only legal buffer allocator during the pre-process
/// and post-process phases; the audio thread never touches it.
pub struct BufferFactory {
    audio_capacity: usize,
    event_capacity: usize,
    atom_capacity: usize,
    pools: Mutex<HashMap<(PortType, usize), Vec<Buffer>>>,
}

impl BufferFactory {
    pub fn new(config: &EngineConfig) -> Self {
        let factory = Self {
            audio_capacity: config.block_length as usize,
            event_capacity: config.event_buffer_size,
            atom_capacity: config.atom_buffer_size,
            pools: Mutex::new(HashMap::new()),
        };
        for ty in [PortType::Audio, PortType::Control, PortType::Event, PortType::Atom] {
            let mut pool = factory.pools.lock();
            let entry = pool
                .entry((ty.shape(), factory.capacity_for(ty)))
                .or_default();
            for _ in 0..config.pre_allocated_buffers {
                entry.push(factory.allocate(ty));
            }
        }
        factory
    }

    /// Block capacity used for buffers of the given port type.
    pub fn capacity_for(&self, ty: PortType) -> usize {
        match ty.shape() {
            PortType::Audio => self.audio_capacity,
            PortType::Control => 1,
            PortType::Event => self.event_capacity,
            _ => self.atom_capacity,
        }
    }

    /// Acquires a cleared buffer for a port of type `ty`.
    pub fn get(&self, ty: PortType) -> BufferRef {
        let key = (ty.shape(), self.capacity_for(ty));
        let buffer = {
            let mut pools = self.pools.lock();
            pools.get_mut(&key).and_then(Vec::pop)
        };
        BufferRef::new(buffer.unwrap_or_else(|| self.allocate(ty)))
    }

    /// Returns a buffer to its pool once no other handle references it.
    ///
    /// Buffers still shared elsewhere are simply dropped from this handle;
    /// the final holder returns them.
    pub fn release(&self, buffer: BufferRef) {
        if let Some(mut buffer) = buffer.try_unwrap() {
            buffer.clear();
            let key = (shape_of(&buffer), buffer.capacity());
            self.pools.lock().entry(key).or_default().push(buffer);
        }
    }

    fn allocate(&self, ty: PortType) -> Buffer {
        match ty.shape() {
            PortType::Audio => Buffer::audio(self.audio_capacity),
            PortType::Control => Buffer::control(0.0),
            PortType::Event => Buffer::event(self.event_capacity),
            _ => Buffer::atom(self.atom_capacity),
        }
    }

    #[cfg(test)]
    fn pooled(&self, ty: PortType) -> usize {
        let key = (ty.shape(), self.capacity_for(ty));
        self.pools.lock().get(&key).map(Vec::len).unwrap_or(0)
    }
}

fn shape_of(buffer: &Buffer) -> PortType {
    match buffer {
        Buffer::Audio { .. } => PortType::Audio,
        Buffer::Control { .. } => PortType::Control,
        Buffer::Event { .. } => PortType::Event,
        Buffer::Atom { .. } => PortType::Atom,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> BufferFactory {
        BufferFactory::new(&EngineConfig {
            block_length: 8,
            pre_allocated_buffers: 2,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn recycles_released_buffers() {
        let factory = factory();
        let before = factory.pooled(PortType::Audio);
        let buf = factory.get(PortType::Audio);
        assert_eq!(factory.pooled(PortType::Audio), before - 1);
        buf.write().set_float(1.0, 0);
        factory.release(buf);
        assert_eq!(factory.pooled(PortType::Audio), before);

        // Recycled buffers come back cleared.
        let again = factory.get(PortType::Audio);
        assert_eq!(again.read().as_audio().expect("audio"), &[0.0; 8]);
    }

    #[test]
    fn shared_buffers_return_only_at_last_release() {
        let factory = factory();
        let buf = factory.get(PortType::Control);
        let alias = buf.clone();
        let before = factory.pooled(PortType::Control);

        factory.release(buf);
        assert_eq!(factory.pooled(PortType::Control), before);

        factory.release(alias);
        assert_eq!(factory.pooled(PortType::Control), before + 1);
    }

    #[test]
    fn cv_shares_the_audio_pool() {
        let factory = factory();
        let cv = factory.get(PortType::Cv);
        assert!(cv.read().as_audio().is_some());
        factory.release(cv);
        assert!(factory.pooled(PortType::Cv) >= 1);
    }
}
