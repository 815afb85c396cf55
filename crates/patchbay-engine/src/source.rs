use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::Event;

/// Counting semaphore used by blocking events to hold the pre-process
/// worker until their execute() has run.
pub struct Semaphore {
    count: Mutex<u32>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cv.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cv.wait(&mut count);
        }
        *count -= 1;
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// The event pipeline's queues.
///
/// Client threads submit onto an SPSC ring drained by the pre-process
/// worker; prepared events travel on a second ring to the audio thread;
/// executed events queue for the post-process worker.
pub struct EventSource {
    incoming_tx: Mutex<rtrb::Producer<Box<dyn Event>>>,
    incoming_rx: Mutex<rtrb::Consumer<Box<dyn Event>>>,
    prepared_tx: Mutex<rtrb::Producer<Box<dyn Event>>>,
    prepared_rx: Mutex<rtrb::Consumer<Box<dyn Event>>>,
    completed: ArrayQueue<Box<dyn Event>>,
    current_blocking: Mutex<Option<Arc<Semaphore>>>,
    stop: AtomicBool,
    dropped: AtomicU64,
}

impl EventSource {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(4);
        let (incoming_tx, incoming_rx) = rtrb::RingBuffer::new(capacity);
        let (prepared_tx, prepared_rx) = rtrb::RingBuffer::new(capacity);
        Self {
            incoming_tx: Mutex::new(incoming_tx),
            incoming_rx: Mutex::new(incoming_rx),
            prepared_tx: Mutex::new(prepared_tx),
            prepared_rx: Mutex::new(prepared_rx),
            completed: ArrayQueue::new(capacity),
            current_blocking: Mutex::new(None),
            stop: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues an event from a client thread. Returns false when the
    /// queue is full (the event is dropped and counted).
    pub fn submit(&self, event: Box<dyn Event>) -> bool {
        match self.incoming_tx.lock().push(event) {
            Ok(()) => true,
            Err(rtrb::PushError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event queue full, dropping event");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Stops the workers and releases any blocking event's semaphore so
    /// the pre-process worker can exit.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(sem) = self.current_blocking.lock().clone() {
            sem.post();
        }
    }

    /// One pre-process pass: prepares every pending event in submission
    /// order. With `wait_blocking`, a blocking event holds the pass until
    /// the audio thread has executed it.
    pub fn pump_pre(&self, engine: &Engine, wait_blocking: bool) -> usize {
        let mut prepared = 0;
        loop {
            if self.stopping() {
                break;
            }
            let event = self.incoming_rx.lock().pop();
            let Ok(mut event) = event else {
                break;
            };
            event.pre_process(engine);
            let sem = event.base().blocking.clone();

            let mut pending = event;
            loop {
                match self.prepared_tx.lock().push(pending) {
                    Ok(()) => break,
                    Err(rtrb::PushError::Full(back)) => {
                        if self.stopping() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            drop(back);
                            return prepared;
                        }
                        pending = back;
                        std::thread::sleep(Duration::from_micros(200));
                    }
                }
            }
            prepared += 1;

            if let Some(sem) = sem {
                *self.current_blocking.lock() = Some(Arc::clone(&sem));
                if wait_blocking && !self.stopping() {
                    sem.wait();
                }
                *self.current_blocking.lock() = None;
            }
        }
        prepared
    }

    /// Audio-thread drain: executes every prepared event whose timestamp
    /// falls before the end of this block; later events stay queued.
    pub fn process_prepared(&self, engine: &Engine, ctx: &ProcessContext) -> u32 {
        let mut executed = 0;
        let mut rx = self.prepared_rx.lock();
        loop {
            let ready = match rx.peek() {
                Ok(event) => event.base().time < ctx.end(),
                Err(_) => false,
            };
            if !ready {
                break;
            }
            let Ok(mut event) = rx.pop() else {
                break;
            };
            event.execute(engine, ctx);
            if let Some(sem) = &event.base().blocking {
                sem.post();
            }
            if self.completed.push(event).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            executed += 1;
        }
        executed
    }

    /// One post-process pass over executed events.
    pub fn pump_post(&self, engine: &Engine) -> usize {
        let mut finished = 0;
        while let Some(mut event) = self.completed.pop() {
            event.post_process(engine);
            finished += 1;
        }
        finished
    }

    pub fn completed_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

/// Spawns the pre- and post-process workers for an activated engine.
pub fn spawn_workers(engine: &Arc<Engine>) -> Vec<JoinHandle<()>> {
    let mut workers = Vec::new();

    let pre_engine = Arc::clone(engine);
    if let Ok(handle) = std::thread::Builder::new()
        .name("pb-pre".to_string())
        .spawn(move || {
            let source = pre_engine.source();
            let mut idle = 0u32;
            loop {
                if source.stopping() {
                    break;
                }
                if source.pump_pre(&pre_engine, true) > 0 {
                    idle = 0;
                    continue;
                }
                idle_step(&mut idle);
            }
        })
    {
        workers.push(handle);
    }

    let post_engine = Arc::clone(engine);
    if let Ok(handle) = std::thread::Builder::new()
        .name("pb-post".to_string())
        .spawn(move || {
            let source = post_engine.source();
            let mut idle = 0u32;
            loop {
                let finished = source.pump_post(&post_engine);
                post_engine.maid().drain(post_engine.buffer_factory());
                if finished > 0 {
                    idle = 0;
                    continue;
                }
                if source.stopping() && source.completed_empty() {
                    break;
                }
                idle_step(&mut idle);
            }
        })
    {
        workers.push(handle);
    }

    workers
}

/// Idle ladder: spin briefly, then yield, then sleep.
fn idle_step(idle: &mut u32) {
    if *idle < 500 {
        core::hint::spin_loop();
    } else if *idle < 2000 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_micros(200));
        return;
    }
    *idle = idle.saturating_add(1);
}
