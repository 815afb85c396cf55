use std::sync::Arc;

use arrayvec::ArrayVec;

/// Largest event payload carried inline by an [`EventStamp`].
///
/// Keeping payloads inline means merging event buffers on the audio thread
/// never allocates.
pub const MAX_EVENT_BYTES: usize = 16;

/// A single time-stamped event inside an event buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStamp {
    /// Offset within the block, in frames.
    pub frame: u32,
    pub type_uri: Arc<str>,
    pub data: ArrayVec<u8, MAX_EVENT_BYTES>,
}

impl EventStamp {
    pub fn new(frame: u32, type_uri: impl Into<Arc<str>>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_EVENT_BYTES {
            return None;
        }
        let mut payload = ArrayVec::new();
        payload.try_extend_from_slice(data).ok()?;
        Some(Self {
            frame,
            type_uri: type_uri.into(),
            data: payload,
        })
    }
}

/// A structured value held by an atom buffer or sent to one.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomValue {
    pub type_uri: Arc<str>,
    pub data: Vec<u8>,
}

/// Atom type produced when an event sequence is lifted into an atom buffer.
pub const EVENT_SEQUENCE: &str = "urn:patchbay:EventSequence";

/// One typed per-block payload.
///
/// The variant shape is fixed at allocation; ports swap whole buffers
/// rather than retyping or resizing them.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    /// `capacity` frames of samples. Also carries CV signals.
    Audio { samples: Vec<f32> },
    /// A single value held for the whole block.
    Control { value: f32 },
    /// Time-ordered sparse events, capped at `capacity` stamps.
    Event {
        stamps: Vec<EventStamp>,
        capacity: usize,
    },
    /// One structured value, capped at `capacity` payload bytes.
    Atom {
        type_uri: Option<Arc<str>>,
        data: Vec<u8>,
        capacity: usize,
    },
}

impl Buffer {
    pub fn audio(capacity: usize) -> Self {
        Buffer::Audio {
            samples: vec![0.0; capacity],
        }
    }

    pub fn control(value: f32) -> Self {
        Buffer::Control { value }
    }

    pub fn event(capacity: usize) -> Self {
        Buffer::Event {
            stamps: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn atom(capacity: usize) -> Self {
        Buffer::Atom {
            type_uri: None,
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Zeroes or empties the payload in place.
    pub fn clear(&mut self) {
        match self {
            Buffer::Audio { samples } => samples.fill(0.0),
            Buffer::Control { value } => *value = 0.0,
            Buffer::Event { stamps, .. } => stamps.clear(),
            Buffer::Atom { type_uri, data, .. } => {
                *type_uri = None;
                data.clear();
            }
        }
    }

    /// Sets a float payload: the whole block for control buffers, samples
    /// from `from_frame` onward for audio buffers.
    pub fn set_float(&mut self, value: f32, from_frame: usize) -> bool {
        match self {
            Buffer::Audio { samples } => {
                let from = from_frame.min(samples.len());
                samples[from..].fill(value);
                true
            }
            Buffer::Control { value: v } => {
                *v = value;
                true
            }
            _ => false,
        }
    }

    /// Appends an event stamp, keeping stamps ordered by frame.
    ///
    /// Returns false when the buffer is full (the stamp is dropped).
    pub fn append_event(&mut self, stamp: EventStamp) -> bool {
        match self {
            Buffer::Event { stamps, capacity } => {
                if stamps.len() >= *capacity {
                    return false;
                }
                let at = stamps.partition_point(|s| s.frame <= stamp.frame);
                stamps.insert(at, stamp);
                true
            }
            _ => false,
        }
    }

    /// Replaces an atom payload, truncating to the buffer's capacity.
    pub fn set_atom(&mut self, value: &AtomValue) -> bool {
        match self {
            Buffer::Atom {
                type_uri,
                data,
                capacity,
            } => {
                if value.data.len() > *capacity {
                    return false;
                }
                *type_uri = Some(Arc::clone(&value.type_uri));
                data.clear();
                data.extend_from_slice(&value.data);
                true
            }
            _ => false,
        }
    }

    /// Mixes `src` into `self` according to the destination type:
    /// sample-wise addition for audio (control sources broadcast their
    /// value), addition for control, time-ordered merge for events,
    /// replacement for atoms. An event source mixed into an atom buffer is
    /// lifted into an event-sequence atom.
    pub fn mix_in(&mut self, src: &Buffer) {
        match (self, src) {
            (Buffer::Audio { samples }, Buffer::Audio { samples: other }) => {
                for (dst, s) in samples.iter_mut().zip(other.iter()) {
                    *dst += *s;
                }
            }
            (Buffer::Audio { samples }, Buffer::Control { value }) => {
                for dst in samples.iter_mut() {
                    *dst += *value;
                }
            }
            (Buffer::Control { value }, Buffer::Control { value: other }) => {
                *value += *other;
            }
            (
                Buffer::Event { stamps, capacity },
                Buffer::Event { stamps: other, .. },
            ) => {
                for stamp in other {
                    if stamps.len() >= *capacity {
                        break;
                    }
                    let at = stamps.partition_point(|s| s.frame <= stamp.frame);
                    stamps.insert(at, stamp.clone());
                }
            }
            (
                Buffer::Atom {
                    type_uri,
                    data,
                    capacity,
                },
                Buffer::Atom {
                    type_uri: src_type,
                    data: src_data,
                    ..
                },
            ) => {
                if src_data.len() <= *capacity {
                    *type_uri = src_type.clone();
                    data.clear();
                    data.extend_from_slice(src_data);
                }
            }
            (
                Buffer::Atom {
                    type_uri,
                    data,
                    capacity,
                },
                Buffer::Event { stamps, .. },
            ) => {
                *type_uri = Some(Arc::from(EVENT_SEQUENCE));
                data.clear();
                for stamp in stamps {
                    // Framing: frame (LE u32), payload length, payload.
                    let needed = 4 + 1 + stamp.data.len();
                    if data.len() + needed > *capacity {
                        break;
                    }
                    data.extend_from_slice(&stamp.frame.to_le_bytes());
                    data.push(stamp.data.len() as u8);
                    data.extend_from_slice(&stamp.data);
                }
            }
            _ => {}
        }
    }

    /// Overwrites `self` with `src`, converting per the destination type.
    pub fn copy_from(&mut self, src: &Buffer) {
        self.clear();
        self.mix_in(src);
    }

    pub fn as_audio(&self) -> Option<&[f32]> {
        match self {
            Buffer::Audio { samples } => Some(samples),
            _ => None,
        }
    }

    pub fn as_audio_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Buffer::Audio { samples } => Some(samples),
            _ => None,
        }
    }

    /// Sample at `frame` as seen by an audio-rate reader, broadcasting
    /// control values across the block.
    #[inline]
    pub fn sample_at(&self, frame: usize) -> f32 {
        match self {
            Buffer::Audio { samples } => samples.get(frame).copied().unwrap_or(0.0),
            Buffer::Control { value } => *value,
            _ => 0.0,
        }
    }

    pub fn control_value(&self) -> Option<f32> {
        match self {
            Buffer::Control { value } => Some(*value),
            _ => None,
        }
    }

    pub fn events(&self) -> Option<&[EventStamp]> {
        match self {
            Buffer::Event { stamps, .. } => Some(stamps),
            _ => None,
        }
    }

    /// Frame capacity for audio, stamp capacity for events, byte capacity
    /// for atoms, 1 for control.
    pub fn capacity(&self) -> usize {
        match self {
            Buffer::Audio { samples } => samples.len(),
            Buffer::Control { .. } => 1,
            Buffer::Event { capacity, .. } => *capacity,
            Buffer::Atom { capacity, .. } => *capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_mix_adds_samples() {
        let mut a = Buffer::audio(4);
        let mut b = Buffer::audio(4);
        a.set_float(0.25, 0);
        b.set_float(0.5, 2);
        a.mix_in(&b);
        assert_eq!(a.as_audio().expect("audio"), &[0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn control_broadcasts_into_audio() {
        let mut audio = Buffer::audio(3);
        let control = Buffer::control(0.5);
        audio.mix_in(&control);
        assert_eq!(audio.as_audio().expect("audio"), &[0.5, 0.5, 0.5]);
    }

    #[test]
    fn event_merge_preserves_time_order() {
        let mut a = Buffer::event(8);
        let mut b = Buffer::event(8);
        for frame in [0u32, 10, 20] {
            a.append_event(EventStamp::new(frame, "urn:patchbay:MidiEvent", &[frame as u8]).expect("stamp"));
        }
        b.append_event(EventStamp::new(5, "urn:patchbay:MidiEvent", &[5]).expect("stamp"));
        b.append_event(EventStamp::new(15, "urn:patchbay:MidiEvent", &[15]).expect("stamp"));
        a.mix_in(&b);
        let frames: Vec<u32> = a.events().expect("events").iter().map(|s| s.frame).collect();
        assert_eq!(frames, vec![0, 5, 10, 15, 20]);
    }

    #[test]
    fn event_buffer_respects_capacity() {
        let mut buf = Buffer::event(2);
        for frame in 0..4u32 {
            buf.append_event(EventStamp::new(frame, "urn:patchbay:MidiEvent", &[]).expect("stamp"));
        }
        assert_eq!(buf.events().expect("events").len(), 2);
    }

    #[test]
    fn atom_replace_and_lift() {
        let mut atom = Buffer::atom(64);
        let value = AtomValue {
            type_uri: Arc::from("urn:patchbay:Blob"),
            data: vec![1, 2, 3],
        };
        assert!(atom.set_atom(&value));

        let mut events = Buffer::event(4);
        events.append_event(EventStamp::new(7, "urn:patchbay:MidiEvent", &[0x90, 60, 100]).expect("stamp"));
        atom.mix_in(&events);
        match &atom {
            Buffer::Atom { type_uri, data, .. } => {
                assert_eq!(type_uri.as_deref(), Some(EVENT_SEQUENCE));
                assert_eq!(&data[..4], &7u32.to_le_bytes());
                assert_eq!(data[4], 3);
                assert_eq!(&data[5..], &[0x90, 60, 100]);
            }
            _ => panic!("expected atom"),
        }
    }

    #[test]
    fn audio_mix_is_commutative() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut a = Buffer::audio(32);
        let mut b = Buffer::audio(32);
        for buffer in [&mut a, &mut b] {
            for sample in buffer.as_audio_mut().expect("audio") {
                *sample = rng.gen_range(-1.0..1.0);
            }
        }

        let mut ab = a.clone();
        ab.mix_in(&b);
        let mut ba = b.clone();
        ba.mix_in(&a);
        for (x, y) in ab
            .as_audio()
            .expect("audio")
            .iter()
            .zip(ba.as_audio().expect("audio"))
        {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn clear_resets_payloads() {
        let mut audio = Buffer::audio(2);
        audio.set_float(1.0, 0);
        audio.clear();
        assert_eq!(audio.as_audio().expect("audio"), &[0.0, 0.0]);

        let mut control = Buffer::control(3.0);
        control.clear();
        assert_eq!(control.control_value(), Some(0.0));
    }
}
