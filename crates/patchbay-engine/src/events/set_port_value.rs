use std::sync::Arc;

use patchbay_interface::{FrameTime, Path, Status, Value};

use crate::buffer::{AtomValue, EventStamp, MAX_EVENT_BYTES};
use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::{Event, EventBase, Request};
use crate::port::{Port, PortType};

/// Writes a value into a port's buffers at a sample-accurate offset.
///
/// Queued mode resolves the port by path in pre-processing; immediate
/// mode is used internally when the port is already known.
pub struct SetPortValue {
    base: EventBase,
    path: Option<Path>,
    port: Option<Arc<Port>>,
    value: Value,
    prepared_stamp: Option<EventStamp>,
    prepared_atom: Option<AtomValue>,
}

impl SetPortValue {
    pub fn queued(request: Option<Request>, time: FrameTime, path: Path, value: Value) -> Self {
        Self {
            base: EventBase::new(request, time),
            path: Some(path),
            port: None,
            value,
            prepared_stamp: None,
            prepared_atom: None,
        }
    }

    pub fn immediate(
        request: Option<Request>,
        time: FrameTime,
        port: Arc<Port>,
        value: Value,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            path: None,
            port: Some(port),
            value,
            prepared_stamp: None,
            prepared_atom: None,
        }
    }

    fn subject(&self) -> String {
        match (&self.port, &self.path) {
            (Some(port), _) => port.path().as_str().to_string(),
            (None, Some(path)) => path.as_str().to_string(),
            (None, None) => String::new(),
        }
    }
}

impl Event for SetPortValue {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if self.port.is_none() {
            let Some(port) = self.path.as_ref().and_then(|p| engine.store().find_port(p))
            else {
                self.base.set_error(Status::PortNotFound);
                return;
            };
            self.port = Some(port);
        }
        let Some(port) = &self.port else { return };

        // Plugins that asked for the message context get one pass per
        // value change.
        if let Some(node) = port
            .path()
            .parent()
            .and_then(|p| engine.store().find_node(&p))
        {
            if node.plugin().wants_message_context() {
                engine.message_context().schedule(node);
            }
        }

        // Payloads that need allocation are prepared here so execute()
        // only copies.
        match (port.port_type().shape(), &self.value) {
            (PortType::Audio | PortType::Control, Value::Float(_)) => {}
            (PortType::Event, Value::Blob { type_uri, data }) => {
                if data.len() > MAX_EVENT_BYTES {
                    self.base.set_error(Status::NoSpace);
                    return;
                }
                match EventStamp::new(0, type_uri.as_str(), data) {
                    Some(stamp) => self.prepared_stamp = Some(stamp),
                    None => {
                        self.base.set_error(Status::NoSpace);
                        return;
                    }
                }
            }
            (PortType::Atom, Value::Blob { type_uri, data }) => {
                if data.len() > engine.buffer_factory().capacity_for(PortType::Atom) {
                    self.base.set_error(Status::NoSpace);
                    return;
                }
                self.prepared_atom = Some(AtomValue {
                    type_uri: Arc::from(type_uri.as_str()),
                    data: data.clone(),
                });
            }
            _ => {
                self.base.set_error(Status::TypeMismatch);
            }
        }
    }

    fn execute(&mut self, _engine: &Engine, ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        let Some(port) = &self.port else { return };
        let offset = ctx.offset_of(self.base.time);

        if let Value::Float(value) = self.value {
            port.write_value(value, offset as usize);
        } else if let Some(stamp) = &self.prepared_stamp {
            let mut stamp = stamp.clone();
            stamp.frame = offset;
            for voice in 0..port.voices() {
                port.voice_buffer(voice).write().append_event(stamp.clone());
            }
        } else if let Some(atom) = &self.prepared_atom {
            for voice in 0..port.voices() {
                port.voice_buffer(voice).write().set_atom(atom);
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        let subject = self.subject();
        self.base.respond(&subject);
        if !self.base.ok() {
            return;
        }
        engine.broadcaster().send_property_change(
            &subject,
            patchbay_interface::uris::VALUE,
            &self.value,
        );
        if let Some(port) = &self.port {
            if port.broadcast() {
                engine.broadcaster().send_activity(&port.path());
            }
        }
    }
}
