use std::sync::Arc;

use tracing::{debug, warn};

use patchbay_interface::{uris, FrameTime, Path, Properties, Status, Value};

use crate::bindings::BindingKey;
use crate::compiler::{self, CompiledPatch};
use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::create::{CreateNode, CreatePatch, CreatePort};
use crate::events::set_port_value::SetPortValue;
use crate::events::{Event, EventBase, Request};
use crate::maid::Retired;
use crate::node::Node;
use crate::patch::{GraphChild, Patch};
use crate::port::{Port, PortType};
use crate::store::GraphObject;

/// A property write with engine-level side effects staged for execute().
enum SpecialOp {
    Enable(Arc<Patch>, bool),
    Polyphony {
        patch: Arc<Patch>,
        poly: usize,
        ports: Vec<Arc<Port>>,
        nodes: Vec<Arc<Node>>,
    },
    Polyphonic {
        ports: Vec<Arc<Port>>,
        nodes: Vec<Arc<Node>>,
    },
    Broadcast(Arc<Port>, bool),
}

/// Sets properties on an object, honouring the keys the engine
/// interprets (enabled, polyphony, polyphonic, value, broadcast,
/// controlBinding).
///
/// With `replace` and `create` set this is a Put: keys are replaced
/// wholesale, and a missing object is created from its `TYPE` property.
/// Compound updates stop at the first failing key and the response names
/// the failing predicate.
pub struct SetMetadata {
    base: EventBase,
    subject: Path,
    remove: Properties,
    properties: Properties,
    replace: bool,
    create: bool,
    create_event: Option<Box<dyn Event>>,
    ops: Vec<SpecialOp>,
    value_events: Vec<SetPortValue>,
    compiled: Option<Arc<CompiledPatch>>,
    error_key: Option<String>,
}

impl SetMetadata {
    /// Create-or-update with full property replacement.
    pub fn put(
        request: Option<Request>,
        time: FrameTime,
        subject: Path,
        properties: Properties,
    ) -> Self {
        Self::new(request, time, subject, Properties::new(), properties, true, true)
    }

    /// Incremental update: remove keys, then add.
    pub fn delta(
        request: Option<Request>,
        time: FrameTime,
        subject: Path,
        remove: Properties,
        add: Properties,
    ) -> Self {
        Self::new(request, time, subject, remove, add, false, false)
    }

    pub fn set_property(
        request: Option<Request>,
        time: FrameTime,
        subject: Path,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        let mut add = Properties::new();
        add.insert(key, value);
        Self::new(request, time, subject, Properties::new(), add, false, false)
    }

    fn new(
        request: Option<Request>,
        time: FrameTime,
        subject: Path,
        remove: Properties,
        properties: Properties,
        replace: bool,
        create: bool,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            subject,
            remove,
            properties,
            replace,
            create,
            create_event: None,
            ops: Vec::new(),
            value_events: Vec::new(),
            compiled: None,
            error_key: None,
        }
    }

    fn fail(&mut self, key: &str, status: Status) {
        self.error_key = Some(key.to_string());
        self.base.set_error(status);
    }

    /// Synthesizes the create event for a Put on a missing path.
    fn synthesize_create(&mut self, engine: &Engine) {
        let class = self
            .properties
            .get(uris::TYPE)
            .and_then(Value::as_uri)
            .unwrap_or("");
        let request = self.base.request.clone();
        let time = self.base.time;
        let mut event: Box<dyn Event> = match class {
            uris::CLASS_PATCH => Box::new(CreatePatch::new(
                request,
                time,
                self.subject.clone(),
                1,
                self.properties.clone(),
            )),
            uris::CLASS_NODE => {
                let Some(plugin) = self
                    .properties
                    .get(uris::INSTANCE_OF)
                    .and_then(Value::as_uri)
                    .map(str::to_string)
                else {
                    self.fail(uris::INSTANCE_OF, Status::BadObjectType);
                    return;
                };
                Box::new(CreateNode::new(
                    request,
                    time,
                    self.subject.clone(),
                    plugin,
                    false,
                    self.properties.clone(),
                ))
            }
            uris::CLASS_PORT => Box::new(CreatePort::new(
                request,
                time,
                self.subject.clone(),
                PortType::Unknown,
                false,
                self.properties.clone(),
            )),
            _ => {
                self.fail(uris::TYPE, Status::BadObjectType);
                return;
            }
        };
        event.pre_process(engine);
        self.create_event = Some(event);
    }

    fn prepare_polyphony(&mut self, engine: &Engine, patch: Arc<Patch>, poly: usize) {
        let mut ports = Vec::new();
        let mut nodes = Vec::new();
        for child in patch.children() {
            for port in child.ports() {
                if port.polyphonic() {
                    port.prepare_poly(engine.buffer_factory(), poly);
                    ports.push(port);
                }
            }
            if let GraphChild::Node(node) = child {
                if node.polyphonic() {
                    node.prepare_poly(poly, engine.sample_rate());
                    nodes.push(node);
                }
            }
        }
        self.ops.push(SpecialOp::Polyphony {
            patch,
            poly,
            ports,
            nodes,
        });
    }

    fn prepare_polyphonic(
        &mut self,
        engine: &Engine,
        object: &GraphObject,
        flag: bool,
    ) -> Result<(), Status> {
        let parent_poly = object
            .path()
            .parent()
            .and_then(|p| engine.store().find_patch(&p))
            .map(|p| p.internal_poly())
            .unwrap_or(1);
        let mut ports = Vec::new();
        let mut nodes = Vec::new();
        match object {
            GraphObject::Node(node) => {
                node.set_polyphonic(flag);
                node.prepare_poly(parent_poly, engine.sample_rate());
                for port in node.ports() {
                    port.prepare_poly(engine.buffer_factory(), parent_poly);
                    ports.push(port);
                }
                nodes.push(Arc::clone(node));
            }
            GraphObject::Port(port) => {
                port.set_polyphonic(flag);
                port.prepare_poly(engine.buffer_factory(), parent_poly);
                ports.push(Arc::clone(port));
            }
            GraphObject::Patch(_) => {}
        }
        self.ops.push(SpecialOp::Polyphonic { ports, nodes });
        Ok(())
    }
}

impl Event for SetMetadata {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        let object = engine.store().find(&self.subject);
        let Some(object) = object else {
            if self.create {
                self.synthesize_create(engine);
            } else {
                self.base.set_error(Status::NotFound);
            }
            return;
        };

        if self.replace {
            object.base().erase_keys_of(&self.properties);
        }
        for (key, _) in self.remove.iter() {
            object.base().remove_property(key);
        }

        let properties = self.properties.clone();
        for (key, value) in properties.iter() {
            object.base().set_property(key.clone(), value.clone());

            match key.as_str() {
                uris::ENABLED => {
                    let (Some(patch), Some(enable)) = (object.as_patch(), value.as_bool())
                    else {
                        self.fail(key, Status::BadValueType);
                        break;
                    };
                    if enable && patch.compiled().is_none() {
                        match compiler::compile(patch) {
                            Ok(compiled) => self.compiled = Some(compiled),
                            Err(_) => {
                                self.fail(key, Status::Internal);
                                break;
                            }
                        }
                    }
                    self.ops.push(SpecialOp::Enable(Arc::clone(patch), enable));
                }
                uris::POLYPHONY => {
                    let Some(patch) = object.as_patch().cloned() else {
                        continue;
                    };
                    match value.as_int() {
                        Some(poly) if poly >= 1 => {
                            self.prepare_polyphony(engine, patch, poly as usize)
                        }
                        Some(_) => {
                            self.fail(key, Status::InvalidPoly);
                            break;
                        }
                        None => {
                            self.fail(key, Status::BadValueType);
                            break;
                        }
                    }
                }
                uris::POLYPHONIC => {
                    let Some(flag) = value.as_bool() else {
                        self.fail(key, Status::BadValueType);
                        break;
                    };
                    if let Err(status) = self.prepare_polyphonic(engine, &object, flag) {
                        self.fail(key, status);
                        break;
                    }
                }
                uris::BROADCAST => {
                    let (Some(port), Some(flag)) = (object.as_port(), value.as_bool()) else {
                        self.fail(key, Status::BadValueType);
                        break;
                    };
                    self.ops
                        .push(SpecialOp::Broadcast(Arc::clone(port), flag));
                }
                uris::VALUE => {
                    if let Some(port) = object.as_port() {
                        let mut event = SetPortValue::immediate(
                            None,
                            self.base.time,
                            Arc::clone(port),
                            value.clone(),
                        );
                        event.pre_process(engine);
                        if !event.base().ok() {
                            let status = event.base().status;
                            self.fail(key, status);
                            break;
                        }
                        self.value_events.push(event);
                    } else {
                        warn!(subject = %self.subject, "value set on a non-port");
                    }
                }
                uris::CONTROL_BINDING => {
                    let Some(port) = object.as_port() else {
                        warn!(subject = %self.subject, "binding set on a non-port");
                        continue;
                    };
                    match BindingKey::from_dict(value) {
                        Some(binding) => {
                            engine.control_bindings().bind(binding, Arc::clone(port))
                        }
                        None => {
                            self.fail(key, Status::BadValueType);
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        debug!(subject = %self.subject, keys = self.properties.len(), "set metadata");
    }

    fn execute(&mut self, engine: &Engine, ctx: &ProcessContext) {
        if let Some(create) = &mut self.create_event {
            create.execute(engine, ctx);
            return;
        }
        if !self.base.ok() {
            return;
        }
        for event in &mut self.value_events {
            event.execute(engine, ctx);
        }
        for op in &self.ops {
            match op {
                SpecialOp::Enable(patch, enable) => {
                    if *enable {
                        if patch.compiled().is_none() {
                            if let Some(compiled) = self.compiled.take() {
                                patch.set_compiled(Some(compiled));
                            }
                        }
                        patch.enable();
                    } else {
                        patch.disable();
                    }
                }
                SpecialOp::Polyphony {
                    patch,
                    poly,
                    ports,
                    nodes,
                } => {
                    patch.set_internal_poly(*poly);
                    for port in ports {
                        for retired in port.apply_staged() {
                            engine.maid().push(Retired::Buffers(retired));
                        }
                    }
                    for node in nodes {
                        node.apply_poly(|instance| {
                            engine.maid().push(Retired::Instance(instance))
                        });
                    }
                }
                SpecialOp::Polyphonic { ports, nodes } => {
                    for port in ports {
                        for retired in port.apply_staged() {
                            engine.maid().push(Retired::Buffers(retired));
                        }
                    }
                    for node in nodes {
                        node.apply_poly(|instance| {
                            engine.maid().push(Retired::Instance(instance))
                        });
                    }
                }
                SpecialOp::Broadcast(port, flag) => port.set_broadcast(*flag),
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        if let Some(create) = &mut self.create_event {
            create.post_process(engine);
            return;
        }
        match &self.error_key {
            Some(key) => self.base.respond(key),
            None => self.base.respond(self.subject.as_str()),
        }
        if self.base.ok() {
            engine.broadcaster().send_delta(
                self.subject.as_str(),
                &self.remove,
                &self.properties,
            );
        }
        for event in &mut self.value_events {
            event.post_process(engine);
        }
    }
}
