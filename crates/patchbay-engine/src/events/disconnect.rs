use std::sync::Arc;

use tracing::debug;

use patchbay_interface::{FrameTime, Path, Status};

use crate::compiler::{self, CompiledPatch};
use crate::connection::Connection;
use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::connect::owning_patch;
use crate::events::{Event, EventBase, Request};
use crate::maid::Retired;
use crate::patch::Patch;
use crate::port::PortBinding;

/// Shared teardown of one connection; used by Disconnect, DisconnectAll,
/// and Delete.
pub(crate) struct DisconnectImpl {
    connection: Arc<Connection>,
}

impl DisconnectImpl {
    /// Pre-process half: removes the connection from the patch, updates
    /// the input's connection count, and stages its next buffer source.
    pub(crate) fn prepare(
        engine: &Engine,
        patch: &Patch,
        connection: Arc<Connection>,
    ) -> DisconnectImpl {
        connection.set_pending_disconnection(true);
        patch.remove_connection(&connection.src().path(), &connection.dst().path());

        let dst = connection.dst();
        let remaining = dst.decrement_num_connections();
        match remaining {
            0 => {
                // Back to the port's own buffers, refreshed with the last
                // set value so control inputs hold steady.
                let own = (0..dst.voices())
                    .map(|_| {
                        let buffer = engine.buffer_factory().get(dst.port_type());
                        buffer.write().set_float(dst.last_value(), 0);
                        buffer
                    })
                    .collect();
                dst.stage_own(own);
                dst.stage_binding(PortBinding::Own);
            }
            1 => {
                // One connection left: alias it directly unless it needs
                // conversion buffers, which the port already owns then.
                let last = patch
                    .connections()
                    .into_iter()
                    .find(|c| Arc::ptr_eq(c.dst(), dst));
                if let Some(last) = last {
                    if last.policy().needs_conversion() {
                        if !dst.binding_is_local() {
                            let local = (0..dst.voices())
                                .map(|_| engine.buffer_factory().get(dst.port_type()))
                                .collect();
                            dst.stage_binding(PortBinding::Local(Arc::new(local)));
                        }
                    } else {
                        dst.stage_binding(PortBinding::Alias(Arc::clone(last.src())));
                    }
                }
            }
            _ => {}
        }
        DisconnectImpl { connection }
    }

    /// Execute half: publishes the staged buffers.
    pub(crate) fn execute(&self, engine: &Engine) {
        for retired in self.connection.dst().apply_staged() {
            engine.maid().push(Retired::Buffers(retired));
        }
    }

    pub(crate) fn src_path(&self) -> Path {
        self.connection.src().path()
    }

    pub(crate) fn dst_path(&self) -> Path {
        self.connection.dst().path()
    }
}

/// Removes a single connection.
pub struct Disconnect {
    base: EventBase,
    src_path: Path,
    dst_path: Path,
    patch: Option<Arc<Patch>>,
    disconnect: Option<DisconnectImpl>,
    compiled: Option<Arc<CompiledPatch>>,
}

impl Disconnect {
    pub fn new(request: Option<Request>, time: FrameTime, src_path: Path, dst_path: Path) -> Self {
        Self {
            base: EventBase::new(request, time),
            src_path,
            dst_path,
            patch: None,
            disconnect: None,
            compiled: None,
        }
    }
}

impl Event for Disconnect {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if engine.store().find_port(&self.src_path).is_none()
            || engine.store().find_port(&self.dst_path).is_none()
        {
            self.base.set_error(Status::NotFound);
            return;
        }
        let patch = match owning_patch(engine, &self.src_path, &self.dst_path) {
            Ok(patch) => patch,
            Err(Status::ParentsNotFound) => {
                self.base.set_error(Status::ParentNotFound);
                return;
            }
            Err(_) => {
                self.base.set_error(Status::ParentDiffers);
                return;
            }
        };
        let Some(connection) = patch.connection(&self.src_path, &self.dst_path) else {
            self.base.set_error(Status::NotFound);
            return;
        };

        self.disconnect = Some(DisconnectImpl::prepare(engine, &patch, connection));
        if patch.enabled() {
            match compiler::compile(&patch) {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(_) => {
                    self.base.set_error(Status::Internal);
                    return;
                }
            }
        }
        self.patch = Some(patch);
        debug!(src = %self.src_path, dst = %self.dst_path, "disconnected");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        if let Some(disconnect) = &self.disconnect {
            disconnect.execute(engine);
        }
        if let (Some(patch), Some(compiled)) = (&self.patch, self.compiled.take()) {
            if let Some(old) = patch.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.src_path.as_str());
        if self.base.ok() {
            engine
                .broadcaster()
                .send_disconnected(&self.src_path, &self.dst_path);
        }
    }
}

/// Removes every connection touching an object within a parent patch.
///
/// Per-connection failures are logged and skipped; the event succeeds
/// with whatever could be removed.
pub struct DisconnectAll {
    base: EventBase,
    parent_path: Path,
    object_path: Path,
    patch: Option<Arc<Patch>>,
    impls: Vec<DisconnectImpl>,
    compiled: Option<Arc<CompiledPatch>>,
    /// Internal use by Delete: skip lookups, reporting, and compilation.
    deleting: bool,
}

impl DisconnectAll {
    pub fn new(
        request: Option<Request>,
        time: FrameTime,
        parent_path: Path,
        object_path: Path,
    ) -> Self {
        Self {
            base: EventBase::new(request, time),
            parent_path,
            object_path,
            patch: None,
            impls: Vec::new(),
            compiled: None,
            deleting: false,
        }
    }

    /// Internal constructor used while another event (Delete) already
    /// holds the parent patch.
    pub(crate) fn internal(patch: Arc<Patch>, object_path: Path) -> Self {
        Self {
            base: EventBase::new(None, 0),
            parent_path: patch.path(),
            object_path,
            patch: Some(patch),
            impls: Vec::new(),
            compiled: None,
            deleting: true,
        }
    }

    pub(crate) fn prepare_connections(&mut self, engine: &Engine) {
        let Some(patch) = &self.patch else {
            return;
        };
        for connection in patch.connections_touching(&self.object_path) {
            if connection.pending_disconnection() {
                continue;
            }
            self.impls
                .push(DisconnectImpl::prepare(engine, patch, connection));
        }
    }

    pub(crate) fn execute_impls(&self, engine: &Engine) {
        for disconnect in &self.impls {
            disconnect.execute(engine);
        }
    }

    pub(crate) fn notify(&self, engine: &Engine) {
        for disconnect in &self.impls {
            engine
                .broadcaster()
                .send_disconnected(&disconnect.src_path(), &disconnect.dst_path());
        }
    }
}

impl Event for DisconnectAll {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if !self.deleting {
            let Some(patch) = engine.store().find_patch(&self.parent_path) else {
                self.base.set_error(Status::ParentNotFound);
                return;
            };
            if engine.store().find(&self.object_path).is_none() {
                self.base.set_error(Status::NotFound);
                return;
            }
            self.patch = Some(patch);
        }
        self.prepare_connections(engine);

        if let Some(patch) = &self.patch {
            if !self.deleting && patch.enabled() {
                match compiler::compile(patch) {
                    Ok(compiled) => self.compiled = Some(compiled),
                    Err(_) => {
                        self.base.set_error(Status::Internal);
                        return;
                    }
                }
            }
        }
        debug!(
            parent = %self.parent_path,
            object = %self.object_path,
            connections = self.impls.len(),
            "disconnected all"
        );
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        self.execute_impls(engine);
        if let (Some(patch), Some(compiled)) = (&self.patch, self.compiled.take()) {
            if let Some(old) = patch.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.object_path.as_str());
        if self.base.ok() {
            let broadcaster = engine.broadcaster();
            broadcaster.bundle_begin();
            self.notify(engine);
            broadcaster.send_disconnected_all(&self.parent_path, &self.object_path);
            broadcaster.bundle_end();
        }
    }
}
