//! Built-in plugin library.
//!
//! A small set of internal plugins so the engine has runnable content
//! without any external plugin back-end: an amplifier, a sine oscillator,
//! and a noise source.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::plugin::{Plugin, PluginInstance, PluginLibrary, PortBuffers, PortSpec};
use crate::port::{Direction, PortType};

pub const AMP_URI: &str = "urn:patchbay:amp";
pub const SINE_URI: &str = "urn:patchbay:sine";
pub const NOISE_URI: &str = "urn:patchbay:noise";

/// The in-process plugin table.
pub struct BuiltinLibrary {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl BuiltinLibrary {
    pub fn new() -> Self {
        Self {
            plugins: vec![
                Arc::new(AmpPlugin::new()),
                Arc::new(SinePlugin::new()),
                Arc::new(NoisePlugin::new()),
            ],
        }
    }
}

impl Default for BuiltinLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLibrary for BuiltinLibrary {
    fn load(&self) -> usize {
        self.plugins.len()
    }

    fn plugin(&self, uri: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.uri() == uri).cloned()
    }

    fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.clone()
    }
}

/// Multiplies its audio input by a control gain.
struct AmpPlugin {
    ports: Vec<PortSpec>,
}

impl AmpPlugin {
    fn new() -> Self {
        Self {
            ports: vec![
                PortSpec::new("in", Direction::Input, PortType::Audio),
                PortSpec::new("gain", Direction::Input, PortType::Control).with_default(1.0),
                PortSpec::new("out", Direction::Output, PortType::Audio),
            ],
        }
    }
}

impl Plugin for AmpPlugin {
    fn uri(&self) -> &str {
        AMP_URI
    }

    fn name(&self) -> &str {
        "Amplifier"
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn instantiate(&self, _sample_rate: u32) -> Box<dyn PluginInstance> {
        Box::new(AmpVoice)
    }
}

struct AmpVoice;

impl PluginInstance for AmpVoice {
    fn run(&mut self, buffers: &mut PortBuffers<'_>, nframes: u32) {
        let gain = buffers.get(1).map(|b| b.sample_at(0)).unwrap_or(1.0);
        let Some((input, output)) = buffers.in_out(0, 2) else {
            return;
        };
        let Some(out) = output.as_audio_mut() else {
            return;
        };
        for (frame, sample) in out.iter_mut().take(nframes as usize).enumerate() {
            *sample = input.sample_at(frame) * gain;
        }
    }
}

/// Sine oscillator with control-rate frequency and amplitude.
struct SinePlugin {
    ports: Vec<PortSpec>,
}

impl SinePlugin {
    fn new() -> Self {
        Self {
            ports: vec![
                PortSpec::new("freq", Direction::Input, PortType::Control).with_default(440.0),
                PortSpec::new("amp", Direction::Input, PortType::Control).with_default(1.0),
                PortSpec::new("out", Direction::Output, PortType::Audio),
            ],
        }
    }
}

impl Plugin for SinePlugin {
    fn uri(&self) -> &str {
        SINE_URI
    }

    fn name(&self) -> &str {
        "Sine Oscillator"
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn instantiate(&self, sample_rate: u32) -> Box<dyn PluginInstance> {
        Box::new(SineVoice {
            phase: 0.0,
            sample_rate: sample_rate.max(1) as f32,
        })
    }
}

struct SineVoice {
    phase: f32,
    sample_rate: f32,
}

impl PluginInstance for SineVoice {
    fn activate(&mut self) {
        self.phase = 0.0;
    }

    fn run(&mut self, buffers: &mut PortBuffers<'_>, nframes: u32) {
        let freq = buffers.get(0).map(|b| b.sample_at(0)).unwrap_or(440.0);
        let amp = buffers.get(1).map(|b| b.sample_at(0)).unwrap_or(1.0);
        let Some(out) = buffers.get_mut(2).and_then(|b| b.as_audio_mut()) else {
            return;
        };
        let increment = TAU * freq.max(0.0) / self.sample_rate;
        for sample in out.iter_mut().take(nframes as usize) {
            *sample = self.phase.sin() * amp;
            self.phase += increment;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}

/// White-ish noise source (xorshift, so the realtime path stays
/// deterministic and allocation free).
struct NoisePlugin {
    ports: Vec<PortSpec>,
}

impl NoisePlugin {
    fn new() -> Self {
        Self {
            ports: vec![
                PortSpec::new("amp", Direction::Input, PortType::Control).with_default(0.25),
                PortSpec::new("out", Direction::Output, PortType::Audio),
            ],
        }
    }
}

impl Plugin for NoisePlugin {
    fn uri(&self) -> &str {
        NOISE_URI
    }

    fn name(&self) -> &str {
        "Noise"
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn instantiate(&self, _sample_rate: u32) -> Box<dyn PluginInstance> {
        Box::new(NoiseVoice { state: 0x9e3779b9 })
    }
}

struct NoiseVoice {
    state: u32,
}

impl PluginInstance for NoiseVoice {
    fn run(&mut self, buffers: &mut PortBuffers<'_>, nframes: u32) {
        let amp = buffers.get(0).map(|b| b.sample_at(0)).unwrap_or(0.25);
        let Some(out) = buffers.get_mut(1).and_then(|b| b.as_audio_mut()) else {
            return;
        };
        for sample in out.iter_mut().take(nframes as usize) {
            self.state ^= self.state << 13;
            self.state ^= self.state >> 17;
            self.state ^= self.state << 5;
            let unit = self.state as f32 / u32::MAX as f32;
            *sample = (unit * 2.0 - 1.0) * amp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_lists_all_plugins() {
        let library = BuiltinLibrary::new();
        assert_eq!(library.load(), 3);
        assert!(library.plugin(AMP_URI).is_some());
        assert!(library.plugin(SINE_URI).is_some());
        assert!(library.plugin(NOISE_URI).is_some());
        assert!(library.plugin("urn:patchbay:missing").is_none());
    }

    #[test]
    fn amp_signature_orders_ports() {
        let library = BuiltinLibrary::new();
        let amp = library.plugin(AMP_URI).expect("amp");
        let symbols: Vec<&str> = amp.ports().iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["in", "gain", "out"]);
        assert_eq!(amp.ports()[1].default, Some(1.0));
    }
}
