use std::sync::Arc;

use tracing::debug;

use patchbay_interface::{FrameTime, Path, Status};

use crate::compiler::{self, CompiledPatch};
use crate::connection::{can_connect, Connection};
use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::{Event, EventBase, Request};
use crate::maid::Retired;
use crate::patch::Patch;
use crate::port::{Port, PortBinding};
use crate::store::GraphObject;

/// Connects an output port to an input port within one patch.
pub struct Connect {
    base: EventBase,
    src_path: Path,
    dst_path: Path,
    patch: Option<Arc<Patch>>,
    dst_port: Option<Arc<Port>>,
    compiled: Option<Arc<CompiledPatch>>,
}

impl Connect {
    pub fn new(request: Option<Request>, time: FrameTime, src_path: Path, dst_path: Path) -> Self {
        Self {
            base: EventBase::new(request, time),
            src_path,
            dst_path,
            patch: None,
            dst_port: None,
            compiled: None,
        }
    }
}

/// Resolves the patch a connection between these two ports lives in:
/// both owners are siblings under it, or exactly one endpoint belongs to
/// the patch itself (pass-through and boundary connections).
pub(crate) fn owning_patch(
    engine: &Engine,
    src_port: &Path,
    dst_port: &Path,
) -> Result<Arc<Patch>, Status> {
    let src_owner = src_port.parent().ok_or(Status::ParentsNotFound)?;
    let dst_owner = dst_port.parent().ok_or(Status::ParentsNotFound)?;
    let src_object = engine
        .store()
        .find(&src_owner)
        .ok_or(Status::ParentsNotFound)?;
    let dst_object = engine
        .store()
        .find(&dst_owner)
        .ok_or(Status::ParentsNotFound)?;

    if src_owner == dst_owner {
        // Pass-through across a patch, or a (cyclic) self connection on a
        // node; the cycle probe rejects the latter.
        if let GraphObject::Patch(patch) = src_object {
            return Ok(patch);
        }
    } else if let GraphObject::Patch(patch) = &src_object {
        // Patch input feeding a child.
        if dst_owner.parent().as_ref() == Some(&src_owner) {
            return Ok(Arc::clone(patch));
        }
    } else if let GraphObject::Patch(patch) = &dst_object {
        // Child feeding a patch output.
        if src_owner.parent().as_ref() == Some(&dst_owner) {
            return Ok(Arc::clone(patch));
        }
    }

    let src_parent = src_owner.parent();
    let dst_parent = dst_owner.parent();
    match (src_parent, dst_parent) {
        (Some(a), Some(b)) if a == b => engine
            .store()
            .find_patch(&a)
            .ok_or(Status::ParentsNotFound),
        _ => Err(Status::ParentPatchDifferent),
    }
}

impl Event for Connect {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        let (Some(src), Some(dst)) = (
            engine.store().find_port(&self.src_path),
            engine.store().find_port(&self.dst_path),
        ) else {
            self.base.set_error(Status::PortNotFound);
            return;
        };

        let patch = match owning_patch(engine, &self.src_path, &self.dst_path) {
            Ok(patch) => patch,
            Err(status) => {
                self.base.set_error(status);
                return;
            }
        };

        // Direction: the source must produce into the patch and the
        // destination consume from it. Plain node ports are simply
        // Output -> Input; the patch's own (duplex) ports flip roles when
        // seen from inside.
        let src_owned_by_patch = src.path().parent().as_ref() == Some(&patch.path());
        let dst_owned_by_patch = dst.path().parent().as_ref() == Some(&patch.path());
        let src_ok = if src_owned_by_patch {
            src.is_input()
        } else {
            !src.is_input()
        };
        let dst_ok = if dst_owned_by_patch {
            !dst.is_input()
        } else {
            dst.is_input()
        };
        if !src_ok || !dst_ok {
            self.base.set_error(Status::DirectionMismatch);
            return;
        }

        let Some(policy) = can_connect(src.port_type(), dst.port_type()) else {
            self.base.set_error(Status::TypeMismatch);
            return;
        };

        if patch.has_connection(&self.src_path, &self.dst_path) {
            self.base.set_error(Status::AlreadyConnected);
            return;
        }

        if compiler::would_cycle(&patch, &self.src_path, &self.dst_path) {
            self.base.set_error(Status::Internal);
            return;
        }

        let connection = Connection::new(Arc::clone(&src), Arc::clone(&dst), policy);
        patch.add_connection(connection);
        let count = dst.increment_num_connections();

        // Stage the input's new buffer source; published at execute().
        match count {
            1 => {
                if policy.needs_conversion() {
                    let local = (0..dst.voices())
                        .map(|_| engine.buffer_factory().get(dst.port_type()))
                        .collect();
                    dst.stage_binding(PortBinding::Local(Arc::new(local)));
                } else {
                    dst.stage_binding(PortBinding::Alias(Arc::clone(&src)));
                }
            }
            2 if !dst.binding_is_local() => {
                let mix = (0..dst.voices())
                    .map(|_| engine.buffer_factory().get(dst.port_type()))
                    .collect();
                dst.stage_binding(PortBinding::Local(Arc::new(mix)));
            }
            _ => {}
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
        self.dst_port = Some(dst);
        self.patch = Some(patch);
        debug!(src = %self.src_path, dst = %self.dst_path, "connected");
    }

    fn execute(&mut self, engine: &Engine, _ctx: &ProcessContext) {
        if !self.base.ok() {
            return;
        }
        if let Some(dst) = &self.dst_port {
            for retired in dst.apply_staged() {
                engine.maid().push(Retired::Buffers(retired));
            }
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
                .send_connected(&self.src_path, &self.dst_path);
        }
    }
}
