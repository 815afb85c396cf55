use std::sync::Arc;

use tracing::info;

use patchbay_interface::{ClientInterface, FrameTime, Properties, Status};

use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::{Event, EventBase, Request};

/// Installs a client into the broadcaster and primes it with the current
/// graph so it can populate its mirror state.
pub struct RegisterClient {
    base: EventBase,
    client: Arc<dyn ClientInterface>,
    snapshot: Vec<(String, Properties)>,
}

impl RegisterClient {
    pub fn new(
        request: Option<Request>,
        time: FrameTime,
        client: Arc<dyn ClientInterface>,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            client,
            snapshot: Vec::new(),
        }
    }
}

impl Event for RegisterClient {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        engine.broadcaster().register(Arc::clone(&self.client));
        for object in engine.store().snapshot() {
            self.snapshot
                .push((object.path().as_str().to_string(), object.describe()));
        }
        info!(uri = self.client.uri(), "registered client");
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond(self.client.uri());
        self.client.bundle_begin();
        for (subject, properties) in &self.snapshot {
            self.client.put(subject, properties);
        }
        self.client.bundle_end();
    }
}

/// Removes a client from the broadcaster.
pub struct UnregisterClient {
    base: EventBase,
    uri: String,
}

impl UnregisterClient {
    pub fn new(request: Option<Request>, time: FrameTime, uri: impl Into<String>) -> Self {
        Self {
            base: EventBase::new(request, time),
            uri: uri.into(),
        }
    }
}

impl Event for UnregisterClient {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if engine.broadcaster().unregister(&self.uri).is_none() {
            self.base.set_error(Status::NotFound);
        }
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, _engine: &Engine) {
        self.base.respond(&self.uri);
    }
}
