use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use patchbay_interface::{FrameTime, Path, Status};

use crate::compiler::{self, CompiledPatch};
use crate::context::ProcessContext;
use crate::driver::DriverPort;
use crate::engine::Engine;
use crate::events::disconnect::{DisconnectAll, DisconnectImpl};
use crate::events::{Event, EventBase, Request};
use crate::maid::Retired;
use crate::patch::Patch;
use crate::store::GraphObject;

/// Destroys an object and its whole subtree.
///
/// Blocking: edits that follow a delete must observe its effects, so the
/// pre-process worker waits for this event's execute().
pub struct Delete {
    base: EventBase,
    path: Path,
    parent: Option<Arc<Patch>>,
    object: Option<GraphObject>,
    subtree: Option<BTreeMap<String, GraphObject>>,
    disconnect: Option<DisconnectAll>,
    compiled: Option<Arc<CompiledPatch>>,
    removed_driver_port: Option<DriverPort>,
}

impl Delete {
    pub fn new(request: Option<Request>, time: FrameTime, path: Path) -> Self {
        Self {
            base: EventBase::blocking(request, time),
            path,
            parent: None,
            object: None,
            subtree: None,
            disconnect: None,
            compiled: None,
            removed_driver_port: None,
        }
    }
}

impl Event for Delete {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if self.path.is_root() {
            self.base.set_error(Status::BadObjectType);
            return;
        }
        let Some(object) = engine.store().find(&self.path) else {
            self.base.set_error(Status::NotFound);
            return;
        };
        let parent_path = match self.path.parent() {
            Some(parent) => parent,
            None => {
                self.base.set_error(Status::ParentNotFound);
                return;
            }
        };
        let Some(parent) = engine.store().find_patch(&parent_path) else {
            self.base.set_error(Status::ParentNotFound);
            return;
        };

        match &object {
            GraphObject::Node(_) | GraphObject::Patch(_) => {
                parent.remove_child(&self.path);
            }
            GraphObject::Port(port) => {
                // Only patch ports are deletable; a node's ports live and
                // die with the node.
                if parent.remove_port(&self.path).is_none() {
                    self.base.set_error(Status::BadObjectType);
                    return;
                }
                engine.control_bindings().unbind_port(port);
            }
        }

        // Tear down every connection touching the subtree before it goes.
        let mut disconnect = DisconnectAll::internal(Arc::clone(&parent), self.path.clone());
        disconnect.prepare_connections(engine);
        self.disconnect = Some(disconnect);

        let subtree = engine.store().yank(&self.path);
        for entry in subtree.values() {
            if let GraphObject::Port(port) = entry {
                engine.control_bindings().unbind_port(port);
            }
        }
        self.subtree = Some(subtree);

        if parent.enabled() {
            match compiler::compile(&parent) {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(_) => {
                    self.base.set_error(Status::Internal);
                    return;
                }
            }
        }
        self.object = Some(object);
        self.parent = Some(parent);
        debug!(path = %self.path, "deleted");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        if let Some(disconnect) = &self.disconnect {
            disconnect.execute_impls(engine);
        }
        if let (Some(parent), Some(compiled)) = (&self.parent, self.compiled.take()) {
            if let Some(old) = parent.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
        // A deleted root-patch port also leaves the driver.
        if let Some(GraphObject::Port(_)) = &self.object {
            if self.path.parent().map(|p| p.is_root()) == Some(true) {
                if let Some(driver) = engine.driver() {
                    self.removed_driver_port = driver.remove_port(&self.path);
                }
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        if let Some(GraphObject::Node(node)) = &self.object {
            node.deactivate();
        }
        self.base.respond(self.path.as_str());
        if self.base.ok() {
            let broadcaster = engine.broadcaster();
            broadcaster.bundle_begin();
            if let Some(disconnect) = &self.disconnect {
                disconnect.notify(engine);
            }
            broadcaster.send_deleted(&self.path);
            broadcaster.bundle_end();
        }
        if let Some(subtree) = self.subtree.take() {
            engine.maid().push(Retired::Subtree(subtree));
        }
        self.removed_driver_port = None;
    }
}

/// Empties a patch: removes all children and their connections, keeping
/// the patch and its external ports.
pub struct ClearPatch {
    base: EventBase,
    path: Path,
    patch: Option<Arc<Patch>>,
    impls: Vec<DisconnectImpl>,
    removed: Vec<Path>,
    subtrees: Vec<BTreeMap<String, GraphObject>>,
    compiled: Option<Arc<CompiledPatch>>,
}

impl ClearPatch {
    pub fn new(request: Option<Request>, time: FrameTime, path: Path) -> Self {
        Self {
            base: EventBase::blocking(request, time),
            path,
            patch: None,
            impls: Vec::new(),
            removed: Vec::new(),
            subtrees: Vec::new(),
            compiled: None,
        }
    }
}

impl Event for ClearPatch {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        let Some(patch) = engine.store().find_patch(&self.path) else {
            self.base.set_error(Status::NotFound);
            return;
        };

        for connection in patch.connections() {
            if connection.pending_disconnection() {
                continue;
            }
            self.impls
                .push(DisconnectImpl::prepare(engine, &patch, connection));
        }
        for child in patch.children() {
            let child_path = child.path();
            patch.remove_child(&child_path);
            let subtree = engine.store().yank(&child_path);
            for entry in subtree.values() {
                if let GraphObject::Port(port) = entry {
                    engine.control_bindings().unbind_port(port);
                }
            }
            self.subtrees.push(subtree);
            self.removed.push(child_path);
        }

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
        debug!(path = %self.path, children = self.removed.len(), "cleared patch");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        for disconnect in &self.impls {
            disconnect.execute(engine);
        }
        if let (Some(patch), Some(compiled)) = (&self.patch, self.compiled.take()) {
            if let Some(old) = patch.set_compiled(Some(compiled)) {
                engine.maid().push(Retired::Compiled(old));
            }
        }
    }

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.path.as_str());
        if self.base.ok() {
            let broadcaster = engine.broadcaster();
            broadcaster.bundle_begin();
            for path in &self.removed {
                broadcaster.send_deleted(path);
            }
            broadcaster.bundle_end();
        }
        for subtree in self.subtrees.drain(..) {
            for entry in subtree.values() {
                if let GraphObject::Node(node) = entry {
                    node.deactivate();
                }
            }
            engine.maid().push(Retired::Subtree(subtree));
        }
    }
}
