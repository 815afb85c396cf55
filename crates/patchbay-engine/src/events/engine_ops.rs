use std::sync::Arc;

use tracing::{info, warn};

use patchbay_interface::{uris, FrameTime, Path, Status};

use crate::buffer::EventStamp;
use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::{Event, EventBase, Request};
use crate::port::{Port, PortType};
use crate::store::GraphObject;

/// MIDI all-notes-off controller message.
const ALL_NOTES_OFF_CC: u8 = 123;

/// Brings the engine live (driver, workers, node activation).
pub struct Activate {
    base: EventBase,
}

impl Activate {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
        }
    }
}

impl Event for Activate {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, _engine: &Engine) {}

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, engine: &Engine) {
        if let Err(error) = engine.activate_by_ref() {
            warn!(%error, "activation failed");
            self.base.set_error(Status::Internal);
        }
        self.base.respond("");
    }
}

/// Stops the driver and deactivates every node.
pub struct Deactivate {
    base: EventBase,
}

impl Deactivate {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
        }
    }
}

impl Event for Deactivate {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, _engine: &Engine) {}

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, engine: &Engine) {
        engine.deactivate();
        self.base.respond("");
    }
}

/// Scans the plugin library.
pub struct LoadPlugins {
    base: EventBase,
}

impl LoadPlugins {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
        }
    }
}

impl Event for LoadPlugins {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        let count = engine.plugin_library().load();
        info!(count, "loaded plugins");
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond("");
    }
}

/// Asks the host to shut the engine down.
pub struct Quit {
    base: EventBase,
}

impl Quit {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
        }
    }
}

impl Event for Quit {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, _engine: &Engine) {}

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond("");
        engine.request_quit();
    }
}

/// Arms the control bindings to capture the next inbound controller value
/// for a port.
pub struct Learn {
    base: EventBase,
    path: Path,
}

impl Learn {
    pub fn new(request: Option<Request>, time: FrameTime, path: Path) -> Self {
        Self {
            base: EventBase::new(request, time),
            path,
        }
    }
}

impl Event for Learn {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        match engine.store().find_port(&self.path) {
            Some(port) => engine.control_bindings().learn(port),
            None => self.base.set_error(Status::PortNotFound),
        }
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond(self.path.as_str());
    }
}

/// Stamps a MIDI all-notes-off message into every event-typed input port
/// under the target patch.
pub struct AllNotesOff {
    base: EventBase,
    patch_path: Path,
    ports: Vec<Arc<Port>>,
    stamp: Option<EventStamp>,
}

impl AllNotesOff {
    pub fn new(request: Option<Request>, time: FrameTime, patch_path: Path) -> Self {
        Self {
            base: EventBase::new(request, time),
            patch_path,
            ports: Vec::new(),
            stamp: None,
        }
    }
}

impl Event for AllNotesOff {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if engine.store().find_patch(&self.patch_path).is_none() {
            self.base.set_error(Status::NotFound);
            return;
        }
        let mut gather = |object: &GraphObject| {
            if let GraphObject::Port(port) = object {
                if port.is_input() && matches!(port.port_type(), PortType::Event) {
                    self.ports.push(Arc::clone(port));
                }
            }
        };
        for object in engine.store().descendants(&self.patch_path) {
            gather(&object);
        }
        self.stamp = EventStamp::new(0, uris::MIDI_EVENT, &[0xB0, ALL_NOTES_OFF_CC, 0]);
    }

    fn execute(&mut self, _engine: &Engine, ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        let Some(stamp) = &self.stamp else { return };
        let offset = ctx.offset_of(self.base.time);
        for port in &self.ports {
            for voice in 0..port.voices() {
                let mut stamp = stamp.clone();
                stamp.frame = offset;
                port.voice_buffer(voice).write().append_event(stamp);
            }
        }
    }

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond(self.patch_path.as_str());
    }
}
