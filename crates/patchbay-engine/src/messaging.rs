use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::node::Node;

enum MessageTask {
    /// Run the node's message-context callback once.
    Run(Arc<Node>),
    Shutdown,
}

/// Non-audio-rate worker for plugins that request block-decoupled
/// callbacks.
///
/// Scheduling is allowed from any phase; the callback itself runs on a
/// dedicated thread and may allocate and block freely.
pub struct MessageContext {
    tx: Sender<MessageTask>,
    worker: Option<JoinHandle<()>>,
}

impl MessageContext {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("pb-msg".to_string())
            .spawn(move || run_worker(rx))
            .ok();
        if worker.is_none() {
            warn!("failed to spawn message context worker");
        }
        Self { tx, worker }
    }

    /// Queues one message-run pass over the node's plugin voices.
    pub fn schedule(&self, node: Arc<Node>) {
        let _ = self.tx.send(MessageTask::Run(node));
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MessageContext {
    fn drop(&mut self) {
        let _ = self.tx.send(MessageTask::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(rx: Receiver<MessageTask>) {
    while let Ok(task) = rx.recv() {
        match task {
            MessageTask::Run(node) => node.message_run(),
            MessageTask::Shutdown => break,
        }
    }
}
