//! The event taxonomy.
//!
//! Every external mutation or query passes through three phases:
//! `pre_process` on the pre-process worker (may allocate and touch the
//! store), `execute` on the audio thread (pointer swaps only), and
//! `post_process` on the post-process worker (responses, notifications,
//! reclamation). Errors detected in pre-processing turn execute() into a
//! no-op; the failure still reaches the client in post-processing.

use std::sync::Arc;

use patchbay_interface::{ClientInterface, FrameTime, Status};

use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::source::Semaphore;

pub mod clients;
pub mod connect;
pub mod create;
pub mod delete;
pub mod disconnect;
pub mod engine_ops;
pub mod move_object;
pub mod queries;
pub mod set_metadata;
pub mod set_port_value;

pub use clients::{RegisterClient, UnregisterClient};
pub use connect::Connect;
pub use create::{CreateNode, CreatePatch, CreatePort};
pub use delete::{ClearPatch, Delete};
pub use disconnect::{Disconnect, DisconnectAll};
pub use engine_ops::{Activate, AllNotesOff, Deactivate, Learn, LoadPlugins, Quit};
pub use move_object::Move;
pub use queries::{Get, Ping, RequestAllObjects, RequestMetadata, RequestPlugins};
pub use set_metadata::SetMetadata;
pub use set_port_value::SetPortValue;

/// Where an event's response goes.
#[derive(Clone)]
pub struct Request {
    id: i32,
    client: Option<Arc<dyn ClientInterface>>,
}

impl Request {
    pub fn new(id: i32, client: Option<Arc<dyn ClientInterface>>) -> Self {
        Self { id, client }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn client(&self) -> Option<&Arc<dyn ClientInterface>> {
        self.client.as_ref()
    }

    pub fn respond(&self, status: Status, subject: &str) {
        if let Some(client) = &self.client {
            client.response(self.id, status, subject);
        }
    }
}

/// State common to every event.
pub struct EventBase {
    pub request: Option<Request>,
    /// Enqueue time in driver frames; execution is deferred past blocks
    /// that end before it.
    pub time: FrameTime,
    pub status: Status,
    /// Present on blocking events; posted after execute() so the
    /// pre-process worker can continue.
    pub blocking: Option<Arc<Semaphore>>,
}

impl EventBase {
    pub fn new(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            request,
            time,
            status: Status::Success,
            blocking: None,
        }
    }

    /// A base whose event gates the pre-process worker until executed.
    pub fn blocking(request: Option<Request>, time: FrameTime) -> Self {
        Self {
            blocking: Some(Arc::new(Semaphore::new())),
            ..Self::new(request, time)
        }
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn set_error(&mut self, status: Status) {
        if self.ok() {
            self.status = status;
        }
    }

    pub fn respond(&self, subject: &str) {
        if let Some(request) = &self.request {
            request.respond(self.status, subject);
        }
    }
}

/// Resolves the patch that must contain a new child at `path`.
pub(crate) fn parent_patch(
    engine: &Engine,
    path: &patchbay_interface::Path,
) -> Result<Arc<crate::patch::Patch>, Status> {
    let parent = path.parent().ok_or(Status::InvalidParentPath)?;
    match engine.store().find(&parent) {
        Some(crate::store::GraphObject::Patch(patch)) => Ok(patch),
        Some(_) => Err(Status::InvalidParentPath),
        None => Err(Status::ParentNotFound),
    }
}

/// Three-phase event contract.
pub trait Event: Send {
    fn base(&self) -> &EventBase;

    fn base_mut(&mut self) -> &mut EventBase;

    /// Non-realtime preparation: lookups, allocation, store edits,
    /// compiling replacement process lists.
    fn pre_process(&mut self, engine: &Engine);

    /// Realtime application: publish prepared pointers. Must not
    /// allocate, block, or touch the store.
    fn execute(&mut self, engine: &Engine, ctx: &ProcessContext);

    /// Response, notification, and reclamation.
    fn post_process(&mut self, engine: &Engine);
}
