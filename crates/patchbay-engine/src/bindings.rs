use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use patchbay_interface::{uris, Value};

use crate::port::Port;

/// An external controller address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKey {
    MidiCc(u8),
}

impl BindingKey {
    pub fn to_dict(self) -> Value {
        let mut dict = BTreeMap::new();
        match self {
            BindingKey::MidiCc(number) => {
                dict.insert(
                    uris::BINDING_TYPE.to_string(),
                    Value::Uri(uris::BINDING_MIDI_CC.to_string()),
                );
                dict.insert(
                    uris::BINDING_NUMBER.to_string(),
                    Value::Int(i32::from(number)),
                );
            }
        }
        Value::Dict(dict)
    }

    pub fn from_dict(value: &Value) -> Option<BindingKey> {
        let dict = value.as_dict()?;
        match dict.get(uris::BINDING_TYPE)?.as_uri()? {
            uris::BINDING_MIDI_CC => {
                let number = dict.get(uris::BINDING_NUMBER)?.as_int()?;
                u8::try_from(number).ok().map(BindingKey::MidiCc)
            }
            _ => None,
        }
    }
}

/// What a controller value did when fed into the binding table.
pub enum BindingOutcome {
    /// A learn was pending; this key is now bound to the returned port.
    Learned(BindingKey, Arc<Port>),
    /// The key was bound; the port received the normalised value.
    Applied(Arc<Port>, f32),
    Unbound,
}

/// Mapping between external controllers and port values.
pub struct ControlBindings {
    bindings: RwLock<HashMap<BindingKey, Arc<Port>>>,
    learning: Mutex<Option<Arc<Port>>>,
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBindings {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            learning: Mutex::new(None),
        }
    }

    /// Arms capture of the next inbound controller value.
    pub fn learn(&self, port: Arc<Port>) {
        *self.learning.lock() = Some(port);
    }

    pub fn learning(&self) -> Option<Arc<Port>> {
        self.learning.lock().clone()
    }

    pub fn bind(&self, key: BindingKey, port: Arc<Port>) {
        port.base()
            .set_property(uris::CONTROL_BINDING, key.to_dict());
        self.bindings.write().insert(key, port);
    }

    pub fn binding(&self, key: BindingKey) -> Option<Arc<Port>> {
        self.bindings.read().get(&key).cloned()
    }

    /// Drops every binding aimed at `port` (the port is going away).
    pub fn unbind_port(&self, port: &Arc<Port>) {
        self.bindings
            .write()
            .retain(|_, bound| !Arc::ptr_eq(bound, port));
    }

    /// Feeds one controller value. A pending learn captures the key;
    /// otherwise a bound port gets the value, normalised to [0, 1].
    pub fn feed(&self, key: BindingKey, raw: u8) -> BindingOutcome {
        if let Some(port) = self.learning.lock().take() {
            self.bind(key, Arc::clone(&port));
            return BindingOutcome::Learned(key, port);
        }
        match self.binding(key) {
            Some(port) => {
                let value = f32::from(raw.min(127)) / 127.0;
                BindingOutcome::Applied(port, value)
            }
            None => BindingOutcome::Unbound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_factory::BufferFactory;
    use crate::config::EngineConfig;
    use crate::port::{Direction, PortType};
    use patchbay_interface::Path;

    fn port() -> Arc<Port> {
        let factory = BufferFactory::new(&EngineConfig::default());
        Port::new(
            Path::new("/n/gain").expect("path"),
            0,
            Direction::Input,
            PortType::Control,
            false,
            1,
            0.0,
            &factory,
        )
    }

    #[test]
    fn learn_captures_next_value() {
        let bindings = ControlBindings::new();
        let port = port();
        bindings.learn(Arc::clone(&port));

        match bindings.feed(BindingKey::MidiCc(7), 64) {
            BindingOutcome::Learned(BindingKey::MidiCc(7), learned) => {
                assert!(Arc::ptr_eq(&learned, &port));
            }
            _ => panic!("expected learn capture"),
        }

        // Binding is recorded in the port's properties.
        let recorded = port
            .base()
            .property(uris::CONTROL_BINDING)
            .expect("binding dict");
        assert_eq!(BindingKey::from_dict(&recorded), Some(BindingKey::MidiCc(7)));

        // Subsequent values apply.
        match bindings.feed(BindingKey::MidiCc(7), 127) {
            BindingOutcome::Applied(applied, value) => {
                assert!(Arc::ptr_eq(&applied, &port));
                assert!((value - 1.0).abs() < f32::EPSILON);
            }
            _ => panic!("expected application"),
        }
    }

    #[test]
    fn unbound_keys_do_nothing() {
        let bindings = ControlBindings::new();
        assert!(matches!(
            bindings.feed(BindingKey::MidiCc(1), 10),
            BindingOutcome::Unbound
        ));
    }
}
