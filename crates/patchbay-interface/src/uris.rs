//! Property and class URIs with engine-level meaning.
//!
//! All other property keys are opaque to the engine and pass through to
//! clients unchanged.

/// Namespace prefix for all engine vocabulary.
pub const NS: &str = "urn:patchbay:";

// Properties the engine interprets.
pub const POLYPHONY: &str = "urn:patchbay:polyphony";
pub const POLYPHONIC: &str = "urn:patchbay:polyphonic";
pub const ENABLED: &str = "urn:patchbay:enabled";
pub const VALUE: &str = "urn:patchbay:value";
pub const CONTROL_BINDING: &str = "urn:patchbay:controlBinding";
pub const BROADCAST: &str = "urn:patchbay:broadcast";

// Descriptive properties attached by the engine.
pub const TYPE: &str = "urn:patchbay:type";
pub const INSTANCE_OF: &str = "urn:patchbay:instanceOf";
pub const PORT_TYPE: &str = "urn:patchbay:portType";
pub const IS_OUTPUT: &str = "urn:patchbay:isOutput";
pub const INDEX: &str = "urn:patchbay:index";

// Object classes, used as the `TYPE` property value.
pub const CLASS_PATCH: &str = "urn:patchbay:Patch";
pub const CLASS_NODE: &str = "urn:patchbay:Node";
pub const CLASS_PORT: &str = "urn:patchbay:Port";
pub const CLASS_PLUGIN: &str = "urn:patchbay:Plugin";

// Port type URIs, used as the `PORT_TYPE` property value.
pub const AUDIO_PORT: &str = "urn:patchbay:AudioPort";
pub const CONTROL_PORT: &str = "urn:patchbay:ControlPort";
pub const CV_PORT: &str = "urn:patchbay:CVPort";
pub const EVENT_PORT: &str = "urn:patchbay:EventPort";
pub const ATOM_PORT: &str = "urn:patchbay:AtomPort";

// Keys inside a `controlBinding` dictionary value.
pub const BINDING_TYPE: &str = "urn:patchbay:bindingType";
pub const BINDING_NUMBER: &str = "urn:patchbay:bindingNumber";
pub const BINDING_MIDI_CC: &str = "urn:patchbay:MidiController";

/// Event type stamped on MIDI payloads in event buffers.
pub const MIDI_EVENT: &str = "urn:patchbay:MidiEvent";
