use tracing::debug;

use patchbay_interface::{FrameTime, Path, Status};

use crate::context::ProcessContext;
use crate::engine::Engine;
use crate::events::{Event, EventBase, Request};

/// Renames an object within its parent; the whole subtree follows.
///
/// Cross-parent moves are rejected.
pub struct Move {
    base: EventBase,
    old_path: Path,
    new_path: Path,
}

impl Move {
    pub fn new(request: Option<Request>, time: FrameTime, old_path: Path, new_path: Path) -> Self {
        Self {
            base: EventBase::new(request, time),
            old_path,
            new_path,
        }
    }
}

impl Event for Move {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, engine: &Engine) {
        if !engine.store().contains(&self.old_path) {
            self.base.set_error(Status::NotFound);
            return;
        }
        if engine.store().contains(&self.new_path) {
            self.base.set_error(Status::AlreadyExists);
            return;
        }
        if self.old_path.parent() != self.new_path.parent() {
            self.base.set_error(Status::ParentDiffers);
            return;
        }

        // Paths are not read by the audio thread, so rewriting them in
        // the store is safe here.
        let subtree = engine.store().yank(&self.old_path);
        for object in subtree.values() {
            let path = object.base().path();
            object
                .base()
                .set_path(path.replace_prefix(&self.old_path, &self.new_path));
        }
        engine.store().cram(subtree);
        debug!(from = %self.old_path, to = %self.new_path, "moved");
    }

    fn execute(&mut self, _engine: &Engine, _ctx: &ProcessContext) {}

    fn post_process(&mut self, engine: &Engine) {
        self.base.respond(self.new_path.as_str());
        if self.base.ok() {
            engine
                .broadcaster()
                .send_moved(&self.old_path, &self.new_path);
        }
    }
}
