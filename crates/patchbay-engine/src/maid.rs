use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::buffer_factory::{BufferFactory, BufferRef};
use crate::compiler::CompiledPatch;
use crate::plugin::PluginInstance;
use crate::store::GraphObject;

/// An object retired by an executing event, awaiting reclamation off the
/// audio thread.
pub enum Retired {
    /// A per-voice buffer set; buffers go back to the pool.
    Buffers(Arc<Vec<BufferRef>>),
    Compiled(Arc<CompiledPatch>),
    Instance(Box<dyn PluginInstance>),
    Object(GraphObject),
    Subtree(BTreeMap<String, GraphObject>),
}

/// Deferred-free queue: execute() appends, the post-process worker drains
/// once per pass, after the audio thread has moved past the retiring
/// block.
pub struct Maid {
    queue: ArrayQueue<Retired>,
    overflowed: AtomicU64,
}

impl Maid {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Appends without blocking. When the queue is full the item is
    /// reclaimed inline, which may free on the calling thread; the
    /// overflow counter records that the queue is undersized.
    pub fn push(&self, retired: Retired) {
        if self.queue.push(retired).is_err() {
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Reclaims everything queued so far, returning buffers to the pool.
    pub fn drain(&self, factory: &BufferFactory) {
        while let Some(retired) = self.queue.pop() {
            match retired {
                Retired::Buffers(buffers) => {
                    if let Ok(buffers) = Arc::try_unwrap(buffers) {
                        for buffer in buffers {
                            factory.release(buffer);
                        }
                    }
                }
                Retired::Compiled(_)
                | Retired::Instance(_)
                | Retired::Object(_)
                | Retired::Subtree(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::port::PortType;

    #[test]
    fn drained_buffers_return_to_the_pool() {
        let factory = BufferFactory::new(&EngineConfig {
            block_length: 8,
            pre_allocated_buffers: 0,
            ..EngineConfig::default()
        });
        let maid = Maid::new(8);

        let buffers = Arc::new(vec![factory.get(PortType::Audio), factory.get(PortType::Audio)]);
        maid.push(Retired::Buffers(buffers));
        assert_eq!(maid.len(), 1);

        maid.drain(&factory);
        assert!(maid.is_empty());
        // Both buffers are poolable again.
        let a = factory.get(PortType::Audio);
        let b = factory.get(PortType::Audio);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn overflow_is_counted_not_lost() {
        let factory = BufferFactory::new(&EngineConfig::default());
        let maid = Maid::new(1);
        maid.push(Retired::Buffers(Arc::new(vec![factory.get(PortType::Control)])));
        maid.push(Retired::Buffers(Arc::new(vec![factory.get(PortType::Control)])));
        assert_eq!(maid.overflowed(), 1);
    }
}
