use std::sync::Arc;

use tracing::debug;

use patchbay_interface::{uris, FrameTime, Path, Properties, Status, Value};

use crate::compiler::{self, CompiledPatch};
use crate::context::ProcessContext;
use crate::driver::DriverPort;
use crate::engine::Engine;
use crate::events::{parent_patch, Event, EventBase, Request};
use crate::maid::Retired;
use crate::node::{Node, NodeError};
use crate::patch::{GraphChild, Patch};
use crate::port::{Direction, Port, PortType};
use crate::store::GraphObject;

/// Creates an empty patch under an existing parent patch.
pub struct CreatePatch {
    base: EventBase,
    path: Path,
    poly: usize,
    properties: Properties,
    parent: Option<Arc<Patch>>,
    patch: Option<Arc<Patch>>,
    compiled: Option<Arc<CompiledPatch>>,
}

impl CreatePatch {
    pub fn new(
        request: Option<Request>,
        time: FrameTime,
        path: Path,
        poly: usize,
        properties: Properties,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            path,
            poly,
            properties,
            parent: None,
            patch: None,
            compiled: None,
        }
    }
}

impl Event for CreatePatch {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if engine.store().contains(&self.path) {
            self.base.set_error(Status::AlreadyExists);
            return;
        }
        let parent = match parent_patch(engine, &self.path) {
            Ok(parent) => parent,
            Err(status) => {
                self.base.set_error(status);
                return;
            }
        };
        let poly = self
            .properties
            .get(uris::POLYPHONY)
            .and_then(Value::as_int)
            .map(|p| p as isize)
            .unwrap_or(self.poly as isize);
        if poly < 1 {
            self.base.set_error(Status::InvalidPoly);
            return;
        }

        let patch = Patch::new(self.path.clone(), poly as usize);
        patch.base().merge_properties(&self.properties);
        if self
            .properties
            .get(uris::ENABLED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            // The new patch is invisible to the audio thread until the
            // parent's compiled list is swapped in, so it can be armed
            // here.
            patch.enable();
            if let Ok(compiled) = compiler::compile(&patch) {
                patch.set_compiled(Some(compiled));
            }
        }

        engine.store().insert(GraphObject::Patch(Arc::clone(&patch)));
        parent.add_child(GraphChild::Patch(Arc::clone(&patch)));

        if parent.enabled() {
            match compiler::compile(&parent) {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(_) => {
                    self.base.set_error(Status::Internal);
                    return;
                }
            }
        }
        self.patch = Some(patch);
        self.parent = Some(parent);
        debug!(path = %self.path, "created patch");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        if let (Some(parent), Some(compiled)) = (&self.parent, self.compiled.take()) {
            if let Some(old) = parent.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.path.as_str());
        if let Some(patch) = &self.patch {
            engine
                .broadcaster()
                .send_put(self.path.as_str(), &patch.describe());
        }
    }
}

/// Instantiates a plugin as a node in a patch.
pub struct CreateNode {
    base: EventBase,
    path: Path,
    plugin_uri: String,
    polyphonic: bool,
    properties: Properties,
    parent: Option<Arc<Patch>>,
    node: Option<Arc<Node>>,
    compiled: Option<Arc<CompiledPatch>>,
}

impl CreateNode {
    pub fn new(
        request: Option<Request>,
        time: FrameTime,
        path: Path,
        plugin_uri: impl Into<String>,
        polyphonic: bool,
        properties: Properties,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            path,
            plugin_uri: plugin_uri.into(),
            polyphonic,
            properties,
            parent: None,
            node: None,
            compiled: None,
        }
    }
}

impl Event for CreateNode {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if engine.store().contains(&self.path) {
            self.base.set_error(Status::AlreadyExists);
            return;
        }
        let parent = match parent_patch(engine, &self.path) {
            Ok(parent) => parent,
            Err(status) => {
                self.base.set_error(status);
                return;
            }
        };
        // Unknown plugin types are a hard error.
        let Some(plugin) = engine.plugin_library().plugin(&self.plugin_uri) else {
            self.base.set_error(Status::NotFound);
            return;
        };
        let polyphonic = self
            .properties
            .get(uris::POLYPHONIC)
            .and_then(Value::as_bool)
            .unwrap_or(self.polyphonic);

        let node = match Node::new(
            self.path.clone(),
            plugin,
            polyphonic,
            parent.internal_poly(),
            engine.sample_rate(),
            engine.buffer_factory(),
        ) {
            Ok(node) => node,
            Err(NodeError::TooManyPorts(_)) => {
                self.base.set_error(Status::NoSpace);
                return;
            }
            Err(NodeError::BadPortSymbol(_)) => {
                self.base.set_error(Status::BadObjectType);
                return;
            }
        };
        node.base().merge_properties(&self.properties);

        engine.store().insert(GraphObject::Node(Arc::clone(&node)));
        for port in node.ports() {
            engine.store().insert(GraphObject::Port(port));
        }
        parent.add_child(GraphChild::Node(Arc::clone(&node)));
        if engine.activated() {
            node.activate();
        }

        if parent.enabled() {
            match compiler::compile(&parent) {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(_) => {
                    self.base.set_error(Status::Internal);
                    return;
                }
            }
        }
        self.node = Some(node);
        self.parent = Some(parent);
        debug!(path = %self.path, plugin = %self.plugin_uri, "created node");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        if let (Some(parent), Some(compiled)) = (&self.parent, self.compiled.take()) {
            if let Some(old) = parent.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.path.as_str());
        if let Some(node) = &self.node {
            let broadcaster = engine.broadcaster();
            broadcaster.bundle_begin();
            broadcaster.send_put(self.path.as_str(), &node.describe());
            for port in node.ports() {
                broadcaster.send_put(port.path().as_str(), &port.describe());
            }
            broadcaster.bundle_end();
        }
    }
}

/// Adds an external port to a patch; on the root patch this also
/// registers a driver port.
pub struct CreatePort {
    base: EventBase,
    path: Path,
    port_type: PortType,
    is_output: bool,
    properties: Properties,
    parent: Option<Arc<Patch>>,
    port: Option<Arc<Port>>,
    compiled: Option<Arc<CompiledPatch>>,
    driver_port: Option<DriverPort>,
}

impl CreatePort {
    pub fn new(
        request: Option<Request>,
        time: FrameTime,
        path: Path,
        port_type: PortType,
        is_output: bool,
        properties: Properties,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            path,
            port_type,
            is_output,
            properties,
            parent: None,
            port: None,
            compiled: None,
            driver_port: None,
        }
    }
}

impl Event for CreatePort {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if engine.store().contains(&self.path) {
            self.base.set_error(Status::AlreadyExists);
            return;
        }
        let parent = match parent_patch(engine, &self.path) {
            Ok(parent) => parent,
            Err(status) => {
                self.base.set_error(status);
                return;
            }
        };
        let port_type = self
            .properties
            .get(uris::PORT_TYPE)
            .and_then(Value::as_uri)
            .map(PortType::from_uri)
            .unwrap_or(self.port_type);
        if matches!(port_type, PortType::Unknown) {
            self.base.set_error(Status::BadObjectType);
            return;
        }
        let is_output = self
            .properties
            .get(uris::IS_OUTPUT)
            .and_then(Value::as_bool)
            .unwrap_or(self.is_output);
        let polyphonic = self
            .properties
            .get(uris::POLYPHONIC)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let default = self
            .properties
            .get(uris::VALUE)
            .and_then(Value::as_float)
            .unwrap_or(0.0);

        let direction = if is_output {
            Direction::Output
        } else {
            Direction::Input
        };
        let port = Port::new(
            self.path.clone(),
            parent.num_ports() as u32,
            direction,
            port_type,
            polyphonic,
            parent.internal_poly(),
            default,
            engine.buffer_factory(),
        );
        port.base().merge_properties(&self.properties);

        engine.store().insert(GraphObject::Port(Arc::clone(&port)));
        parent.add_port(Arc::clone(&port));

        if parent.path().is_root() && engine.activated() {
            self.driver_port = Some(DriverPort::new(Arc::clone(&port)));
        }
        if parent.enabled() {
            match compiler::compile(&parent) {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(_) => {
                    self.base.set_error(Status::Internal);
                    return;
                }
            }
        }
        self.port = Some(port);
        self.parent = Some(parent);
        debug!(path = %self.path, "created port");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        if let Some(driver_port) = self.driver_port.take() {
            if let Some(driver) = engine.driver() {
                driver.add_port(driver_port);
            }
        }
        if let (Some(parent), Some(compiled)) = (&self.parent, self.compiled.take()) {
            if let Some(old) = parent.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.path.as_str());
        if let Some(port) = &self.port {
            engine
                .broadcaster()
                .send_put(self.path.as_str(), &port.describe());
        }
    }
}
