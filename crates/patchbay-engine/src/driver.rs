use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use patchbay_interface::{FrameTime, Path};

use crate::engine::Engine;
use crate::port::Port;

/// Audio driver consumed by the engine.
///
/// The driver owns the block clock: once started it invokes
/// `Engine::run(nframes)` once per block and moves samples between its
/// own buffers and the root patch's external ports through the registered
/// [`DriverPort`]s.
pub trait Driver: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn block_length(&self) -> u32;

    /// Current time in frames since the driver started.
    fn frame_time(&self) -> FrameTime;

    fn add_port(&self, port: DriverPort);

    fn remove_port(&self, path: &Path) -> Option<DriverPort>;

    fn start(&self, engine: Arc<Engine>) -> anyhow::Result<()>;

    fn stop(&self);
}

/// Bridge between one root-patch port and the driver's sample buffers.
pub struct DriverPort {
    port: Arc<Port>,
    /// Samples fed to an input port at the next block.
    injected: Mutex<Option<Vec<f32>>>,
    /// Last block captured from an output port.
    captured: Mutex<Vec<f32>>,
}

impl DriverPort {
    pub fn new(port: Arc<Port>) -> Self {
        Self {
            port,
            injected: Mutex::new(None),
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Path {
        self.port.path()
    }

    pub fn port(&self) -> &Arc<Port> {
        &self.port
    }

    pub fn inject(&self, samples: Vec<f32>) {
        *self.injected.lock() = Some(samples);
    }

    pub fn captured(&self) -> Vec<f32> {
        self.captured.lock().clone()
    }

    /// Pre pass: move driver input into the port's buffers.
    pub fn pre_block(&self, nframes: u32) {
        if !self.port.is_input() {
            return;
        }
        let injected = self.injected.lock().take();
        let buffer = self.port.voice_buffer(0);
        let mut guard = buffer.write();
        match injected {
            Some(samples) => {
                if let Some(out) = guard.as_audio_mut() {
                    let n = out.len().min(samples.len()).min(nframes as usize);
                    out[..n].copy_from_slice(&samples[..n]);
                    out[n..].fill(0.0);
                } else {
                    guard.set_float(samples.first().copied().unwrap_or(0.0), 0);
                }
            }
            None => {
                if let Some(out) = guard.as_audio_mut() {
                    out.fill(0.0);
                }
            }
        }
    }

    /// Post pass: collect the port's rendered block for the driver.
    pub fn post_block(&self, nframes: u32) {
        if self.port.is_input() {
            return;
        }
        let buffer = self.port.voice_buffer(0);
        let guard = buffer.read();
        let mut captured = self.captured.lock();
        captured.clear();
        match guard.as_audio() {
            Some(samples) => {
                captured.extend_from_slice(&samples[..samples.len().min(nframes as usize)]);
            }
            None => {
                captured.push(guard.control_value().unwrap_or(0.0));
            }
        }
    }
}

/// In-process pull driver: blocks run when the owner pumps them.
///
/// Serves the standalone host's offline mode and the engine tests; real
/// audio backends live outside the core behind the same trait.
pub struct OfflineDriver {
    sample_rate: u32,
    block_length: u32,
    frame: AtomicU64,
    ports: RwLock<Vec<DriverPort>>,
    engine: Mutex<Option<Weak<Engine>>>,
}

impl OfflineDriver {
    pub fn new(sample_rate: u32, block_length: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            block_length: block_length.max(1),
            frame: AtomicU64::new(0),
            ports: RwLock::new(Vec::new()),
            engine: Mutex::new(None),
        })
    }

    /// Runs `blocks` audio blocks back to back.
    pub fn run_blocks(&self, blocks: usize) {
        let engine = match self.engine.lock().clone() {
            Some(weak) => match weak.upgrade() {
                Some(engine) => engine,
                None => return,
            },
            None => return,
        };
        for _ in 0..blocks {
            {
                let ports = self.ports.read();
                for port in ports.iter() {
                    port.pre_block(self.block_length);
                }
            }
            engine.run(self.block_length);
            {
                let ports = self.ports.read();
                for port in ports.iter() {
                    port.post_block(self.block_length);
                }
            }
            self.frame
                .fetch_add(u64::from(self.block_length), Ordering::Relaxed);
        }
    }

    pub fn port(&self, path: &Path) -> bool {
        self.ports.read().iter().any(|p| &p.path() == path)
    }

    pub fn inject(&self, path: &Path, samples: Vec<f32>) -> bool {
        let ports = self.ports.read();
        match ports.iter().find(|p| &p.path() == path) {
            Some(port) => {
                port.inject(samples);
                true
            }
            None => false,
        }
    }

    pub fn captured(&self, path: &Path) -> Option<Vec<f32>> {
        let ports = self.ports.read();
        ports.iter().find(|p| &p.path() == path).map(|p| p.captured())
    }
}

impl Driver for OfflineDriver {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_length(&self) -> u32 {
        self.block_length
    }

    fn frame_time(&self) -> FrameTime {
        self.frame.load(Ordering::Relaxed)
    }

    fn add_port(&self, port: DriverPort) {
        self.ports.write().push(port);
    }

    fn remove_port(&self, path: &Path) -> Option<DriverPort> {
        let mut ports = self.ports.write();
        let at = ports.iter().position(|p| &p.path() == path)?;
        Some(ports.remove(at))
    }

    fn start(&self, engine: Arc<Engine>) -> anyhow::Result<()> {
        *self.engine.lock() = Some(Arc::downgrade(&engine));
        Ok(())
    }

    fn stop(&self) {
        *self.engine.lock() = None;
    }
}
