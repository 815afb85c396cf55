use patchbay_interface::{uris, FrameTime, Path, Properties, Status, Value};

use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::{Event, EventBase, Request};

/// Returns one object's description to the requesting client.
pub struct Get {
    base: EventBase,
    path: Path,
    description: Option<Properties>,
}

impl Get {
    pub fn new(request: Option<Request>, time: FrameTime, path: Path) -> Self {
        Self {
            base: EventBase::new(request, time),
            path,
            description: None,
        }
    }
}

impl Event for Get {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        match engine.store().find(&self.path) {
            Some(object) => self.description = Some(object.describe()),
            None => self.base.set_error(Status::NotFound),
        }
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond(self.path.as_str());
        if let (Some(request), Some(description)) =
            (&self.base.request, &self.description)
        {
            if let Some(client) = request.client() {
                client.put(self.path.as_str(), description);
            }
        }
    }
}

/// Returns a single property value to the requesting client.
pub struct RequestMetadata {
    base: EventBase,
    path: Path,
    key: String,
    value: Option<Value>,
}

impl RequestMetadata {
    pub fn new(
        request: Option<Request>,
        time: FrameTime,
        path: Path,
        key: impl Into<String>,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            path,
            key: key.into(),
            value: None,
        }
    }
}

impl Event for RequestMetadata {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        let Some(object) = engine.store().find(&self.path) else {
            self.base.set_error(Status::NotFound);
            return;
        };
        match object.describe().get(&self.key).cloned() {
            Some(value) => self.value = Some(value),
            None => self.base.set_error(Status::NotFound),
        }
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond(self.path.as_str());
        if let (Some(request), Some(value)) = (&self.base.request, &self.value) {
            if let Some(client) = request.client() {
                client.property_change(self.path.as_str(), &self.key, value);
            }
        }
    }
}

/// Returns the plugin library listing to the requesting client.
pub struct RequestPlugins {
    base: EventBase,
    plugins: Vec<(String, Properties)>,
}

impl RequestPlugins {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
            plugins: Vec::new(),
        }
    }
}

impl Event for RequestPlugins {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        for plugin in engine.plugin_library().plugins() {
            let mut properties = Properties::new();
            properties.insert(uris::TYPE, Value::Uri(uris::CLASS_PLUGIN.to_string()));
            properties.insert("urn:patchbay:name", Value::String(plugin.name().to_string()));
            self.plugins.push((plugin.uri().to_string(), properties));
        }
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond("");
        if let Some(client) = self.base.request.as_ref().and_then(Request::client) {
            client.bundle_begin();
            for (uri, properties) in &self.plugins {
                client.put(uri, properties);
            }
            client.bundle_end();
        }
    }
}

/// Returns a description of every object in the store.
pub struct RequestAllObjects {
    base: EventBase,
    objects: Vec<(String, Properties)>,
}

impl RequestAllObjects {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
            objects: Vec::new(),
        }
    }
}

impl Event for RequestAllObjects {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        for object in engine.store().snapshot() {
            self.objects
                .push((object.path().as_str().to_string(), object.describe()));
        }
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond("");
        if let Some(client) = self.base.request.as_ref().and_then(Request::client) {
            client.bundle_begin();
            for (subject, properties) in &self.objects {
                client.put(subject, properties);
            }
            client.bundle_end();
        }
    }
}

/// Liveness probe; succeeds by reaching post-processing.
pub struct Ping {
    base: EventBase,
}

impl Ping {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            base: EventBase::new(request, time),
        }
    }
}

impl Event for Ping {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, _engine: &Engine) {}

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond("");
    }
}
