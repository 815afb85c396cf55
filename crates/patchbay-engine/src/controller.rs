use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use patchbay_interface::{
    ClientInterface, EngineInterface, Path, Properties, Value,
};

use crate::engine::Engine;
use crate::events::{
    Activate, AllNotesOff, ClearPatch, Connect, Deactivate, Delete, Disconnect, DisconnectAll,
    Event, Get, Learn, LoadPlugins, Move, Ping, Quit, RegisterClient, Request,
    RequestAllObjects, RequestMetadata, RequestPlugins, SetMetadata, SetPortValue,
    UnregisterClient,
};

/// The engine's request surface, consumed by protocol bindings.
///
/// Every call builds an event stamped with the current frame time and
/// enqueues it; responses are delivered asynchronously to the registered
/// client under the request id the call consumed.
pub struct EngineController {
    engine: Arc<Engine>,
    next_id: AtomicI32,
    respondee: RwLock<Option<Arc<dyn ClientInterface>>>,
    responses_enabled: AtomicBool,
}

impl EngineController {
    pub fn new(engine: Arc<Engine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            next_id: AtomicI32::new(1),
            respondee: RwLock::new(None),
            responses_enabled: AtomicBool::new(true),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn request(&self) -> Option<Request> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = if self.responses_enabled.load(Ordering::Relaxed) {
            self.respondee.read().clone()
        } else {
            None
        };
        Some(Request::new(id, client))
    }

    fn now(&self) -> patchbay_interface::FrameTime {
        self.engine.frame_time()
    }

    fn send(&self, event: Box<dyn Event>) {
        self.engine.submit(event);
    }
}

impl EngineInterface for EngineController {
    fn put(&self, path: &Path, properties: Properties) {
        self.send(Box::new(SetMetadata::put(
            self.request(),
            self.now(),
            path.clone(),
            properties,
        )));
    }

    fn delta(&self, path: &Path, remove: Properties, add: Properties) {
        self.send(Box::new(SetMetadata::delta(
            self.request(),
            self.now(),
            path.clone(),
            remove,
            add,
        )));
    }

    fn delete(&self, path: &Path) {
        self.send(Box::new(Delete::new(
            self.request(),
            self.now(),
            path.clone(),
        )));
    }

    fn move_object(&self, old_path: &Path, new_path: &Path) {
        self.send(Box::new(Move::new(
            self.request(),
            self.now(),
            old_path.clone(),
            new_path.clone(),
        )));
    }

    fn connect(&self, src_port: &Path, dst_port: &Path) {
        self.send(Box::new(Connect::new(
            self.request(),
            self.now(),
            src_port.clone(),
            dst_port.clone(),
        )));
    }

    fn disconnect(&self, src_port: &Path, dst_port: &Path) {
        self.send(Box::new(Disconnect::new(
            self.request(),
            self.now(),
            src_port.clone(),
            dst_port.clone(),
        )));
    }

    fn disconnect_all(&self, parent_patch: &Path, path: &Path) {
        self.send(Box::new(DisconnectAll::new(
            self.request(),
            self.now(),
            parent_patch.clone(),
            path.clone(),
        )));
    }

    fn set_property(&self, path: &Path, key: &str, value: Value) {
        if key == patchbay_interface::uris::VALUE {
            self.send(Box::new(SetPortValue::queued(
                self.request(),
                self.now(),
                path.clone(),
                value,
            )));
        } else {
            self.send(Box::new(SetMetadata::set_property(
                self.request(),
                self.now(),
                path.clone(),
                key,
                value,
            )));
        }
    }

    fn clear_patch(&self, path: &Path) {
        self.send(Box::new(ClearPatch::new(
            self.request(),
            self.now(),
            path.clone(),
        )));
    }

    fn learn(&self, path: &Path) {
        self.send(Box::new(Learn::new(
            self.request(),
            self.now(),
            path.clone(),
        )));
    }

    fn get(&self, path: &Path) {
        self.send(Box::new(Get::new(self.request(), self.now(), path.clone())));
    }

    fn request_property(&self, path: &Path, key: &str) {
        self.send(Box::new(RequestMetadata::new(
            self.request(),
            self.now(),
            path.clone(),
            key,
        )));
    }

    fn request_plugins(&self) {
        self.send(Box::new(RequestPlugins::new(self.request(), self.now())));
    }

    fn request_all_objects(&self) {
        self.send(Box::new(RequestAllObjects::new(self.request(), self.now())));
    }

    fn ping(&self) {
        self.send(Box::new(Ping::new(self.request(), self.now())));
    }

    fn register_client(&self, client: Arc<dyn ClientInterface>) {
        *self.respondee.write() = Some(Arc::clone(&client));
        self.send(Box::new(RegisterClient::new(
            self.request(),
            self.now(),
            client,
        )));
    }

    fn unregister_client(&self, uri: &str) {
        let mut respondee = self.respondee.write();
        if respondee.as_ref().map(|c| c.uri() == uri).unwrap_or(false) {
            *respondee = None;
        }
        drop(respondee);
        self.send(Box::new(UnregisterClient::new(
            self.request(),
            self.now(),
            uri,
        )));
    }

    fn set_next_response_id(&self, id: i32) {
        self.next_id.store(id, Ordering::Relaxed);
    }

    fn disable_responses(&self) {
        self.responses_enabled.store(false, Ordering::Relaxed);
    }

    fn load_plugins(&self) {
        self.send(Box::new(LoadPlugins::new(self.request(), self.now())));
    }

    fn activate(&self) {
        self.send(Box::new(Activate::new(self.request(), self.now())));
    }

    fn deactivate(&self) {
        self.send(Box::new(Deactivate::new(self.request(), self.now())));
    }

    fn quit(&self) {
        self.send(Box::new(Quit::new(self.request(), self.now())));
    }
}

/// Convenience for sending all-notes-off to a patch; not part of the
/// wire-facing trait.
impl EngineController {
    pub fn all_notes_off(&self, patch: &Path) {
        self.send(Box::new(AllNotesOff::new(
            self.request(),
            self.now(),
            patch.clone(),
        )));
    }
}
