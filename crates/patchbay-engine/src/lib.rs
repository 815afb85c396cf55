//! Patchbay Engine
//! ===============
//! Core realtime engine for Patchbay. Clients describe patches — graphs of
//! plugin-instance nodes wired by typed connections — and the engine
//! executes them block by block against an audio driver, applying graph
//! edits through a three-phase event pipeline that never blocks the audio
//! thread.

pub mod bindings;
pub mod broadcaster;
pub mod buffer;
pub mod buffer_factory;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod context;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod events;
pub mod maid;
pub mod messaging;
pub mod metrics;
pub mod node;
pub mod patch;
pub mod plugin;
pub mod port;
pub mod source;
pub mod store;

pub use buffer::{AtomValue, Buffer, EventStamp, MAX_EVENT_BYTES};
pub use buffer_factory::{BufferFactory, BufferRef};
pub use builtins::BuiltinLibrary;
pub use compiler::{CompileError, CompiledPatch};
pub use config::EngineConfig;
pub use connection::Connection;
pub use context::ProcessContext;
pub use controller::EngineController;
pub use driver::{Driver, DriverPort, OfflineDriver};
pub use engine::Engine;
pub use node::Node;
pub use patch::Patch;
pub use plugin::{Plugin, PluginInstance, PluginLibrary, PortSpec};
pub use port::{Direction, Port, PortType};
pub use store::{GraphObject, Store};
