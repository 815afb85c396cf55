//! Engine-level scenarios driven through the public event pipeline with
//! the phases pumped manually, so every test is deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use patchbay_engine::{
    BuiltinLibrary, Engine, EngineConfig, EngineController, Plugin, PluginInstance,
    PluginLibrary, PortSpec,
};
use patchbay_engine::plugin::PortBuffers;
use patchbay_engine::port::{Direction, PortType};
use patchbay_interface::{
    uris, ClientInterface, EngineInterface, Path, Properties, Status, Value,
};

const BLOCK: u32 = 16;

// ---------------------------------------------------------------------
// Test doubles

/// Client that records everything the engine tells it.
#[derive(Default)]
struct MirrorClient {
    responses: Mutex<Vec<(i32, Status, String)>>,
    puts: Mutex<HashMap<String, Properties>>,
    deleted: Mutex<Vec<String>>,
    connected: Mutex<Vec<(String, String)>>,
    disconnected: Mutex<Vec<(String, String)>>,
}

impl MirrorClient {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn last_status(&self) -> Option<Status> {
        self.responses.lock().last().map(|(_, status, _)| *status)
    }

    fn statuses(&self) -> Vec<Status> {
        self.responses.lock().iter().map(|(_, s, _)| *s).collect()
    }

    fn put_for(&self, subject: &str) -> Option<Properties> {
        self.puts.lock().get(subject).cloned()
    }
}

impl ClientInterface for MirrorClient {
    fn uri(&self) -> &str {
        "urn:patchbay:test-mirror"
    }

    fn response(&self, id: i32, status: Status, subject: &str) {
        self.responses.lock().push((id, status, subject.to_string()));
    }

    fn put(&self, subject: &str, properties: &Properties) {
        self.puts
            .lock()
            .insert(subject.to_string(), properties.clone());
    }

    fn delta(&self, subject: &str, _remove: &Properties, add: &Properties) {
        let mut puts = self.puts.lock();
        puts.entry(subject.to_string()).or_default().extend(add);
    }

    fn del(&self, path: &Path) {
        self.deleted.lock().push(path.as_str().to_string());
    }

    fn moved(&self, _old_path: &Path, _new_path: &Path) {}

    fn connected(&self, src: &Path, dst: &Path) {
        self.connected
            .lock()
            .push((src.as_str().to_string(), dst.as_str().to_string()));
    }

    fn disconnected(&self, src: &Path, dst: &Path) {
        self.disconnected
            .lock()
            .push((src.as_str().to_string(), dst.as_str().to_string()));
    }

    fn disconnected_all(&self, _parent: &Path, _object: &Path) {}

    fn property_change(&self, _subject: &str, _key: &str, _value: &Value) {}

    fn activity(&self, _path: &Path) {}
}

/// Emits its control input as a constant audio signal.
struct ConstPlugin {
    ports: Vec<PortSpec>,
}

impl ConstPlugin {
    fn new() -> Self {
        Self {
            ports: vec![
                PortSpec::new("level", Direction::Input, PortType::Control),
                PortSpec::new("out", Direction::Output, PortType::Audio),
            ],
        }
    }
}

impl Plugin for ConstPlugin {
    fn uri(&self) -> &str {
        "urn:test:const"
    }

    fn name(&self) -> &str {
        "Constant"
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn instantiate(&self, _sample_rate: u32) -> Box<dyn PluginInstance> {
        Box::new(ConstVoice)
    }
}

struct ConstVoice;

impl PluginInstance for ConstVoice {
    fn run(&mut self, buffers: &mut PortBuffers<'_>, nframes: u32) {
        let level = buffers.get(0).map(|b| b.sample_at(0)).unwrap_or(0.0);
        if let Some(out) = buffers.get_mut(1).and_then(|b| b.as_audio_mut()) {
            for sample in out.iter_mut().take(nframes as usize) {
                *sample = level;
            }
        }
    }
}

/// Consumes events; used for type-mismatch scenarios.
struct SeqPlugin {
    ports: Vec<PortSpec>,
}

impl SeqPlugin {
    fn new() -> Self {
        Self {
            ports: vec![
                PortSpec::new("ev", Direction::Input, PortType::Event),
                PortSpec::new("out", Direction::Output, PortType::Audio),
            ],
        }
    }
}

impl Plugin for SeqPlugin {
    fn uri(&self) -> &str {
        "urn:test:seq"
    }

    fn name(&self) -> &str {
        "Sequencer"
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn instantiate(&self, _sample_rate: u32) -> Box<dyn PluginInstance> {
        Box::new(SeqVoice)
    }
}

struct SeqVoice;

impl PluginInstance for SeqVoice {
    fn run(&mut self, buffers: &mut PortBuffers<'_>, nframes: u32) {
        let pending = buffers.get(0).and_then(|b| b.events()).map(<[_]>::len);
        if let Some(out) = buffers.get_mut(1).and_then(|b| b.as_audio_mut()) {
            let value = pending.unwrap_or(0) as f32;
            for sample in out.iter_mut().take(nframes as usize) {
                *sample = value;
            }
        }
    }
}

/// Builtins plus the test plugins above.
struct TestLibrary {
    builtins: BuiltinLibrary,
    extra: Vec<Arc<dyn Plugin>>,
}

impl TestLibrary {
    fn new() -> Self {
        Self {
            builtins: BuiltinLibrary::new(),
            extra: vec![Arc::new(ConstPlugin::new()), Arc::new(SeqPlugin::new())],
        }
    }
}

impl PluginLibrary for TestLibrary {
    fn load(&self) -> usize {
        self.builtins.load() + self.extra.len()
    }

    fn plugin(&self, uri: &str) -> Option<Arc<dyn Plugin>> {
        self.extra
            .iter()
            .find(|p| p.uri() == uri)
            .cloned()
            .or_else(|| self.builtins.plugin(uri))
    }

    fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut all = self.builtins.plugins();
        all.extend(self.extra.iter().cloned());
        all
    }
}

// ---------------------------------------------------------------------
// Harness

struct Harness {
    engine: Arc<Engine>,
    controller: Arc<EngineController>,
    client: Arc<MirrorClient>,
}

impl Harness {
    fn new() -> Self {
        let config = EngineConfig {
            sample_rate: 48_000,
            block_length: BLOCK,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, Arc::new(TestLibrary::new()));
        let controller = EngineController::new(Arc::clone(&engine));
        let client = MirrorClient::new();
        controller.register_client(client.clone());
        let harness = Self {
            engine,
            controller,
            client,
        };
        harness.pump();
        harness
    }

    /// One full pipeline turn: pre-process everything pending, run one
    /// block, post-process.
    fn pump(&self) {
        self.engine.source().pump_pre(&self.engine, false);
        self.engine.run(BLOCK);
        self.engine.source().pump_post(&self.engine);
        self.engine.maid().drain(self.engine.buffer_factory());
    }

    fn put_patch(&self, path: &str, poly: i32) {
        self.controller.put(
            &path.parse().expect("path"),
            Properties::new()
                .with(uris::TYPE, Value::Uri(uris::CLASS_PATCH.into()))
                .with(uris::POLYPHONY, Value::Int(poly))
                .with(uris::ENABLED, Value::Bool(true)),
        );
    }

    fn put_node(&self, path: &str, plugin: &str) {
        self.controller.put(
            &path.parse().expect("path"),
            Properties::new()
                .with(uris::TYPE, Value::Uri(uris::CLASS_NODE.into()))
                .with(uris::INSTANCE_OF, Value::Uri(plugin.into())),
        );
    }

    fn put_poly_node(&self, path: &str, plugin: &str) {
        self.controller.put(
            &path.parse().expect("path"),
            Properties::new()
                .with(uris::TYPE, Value::Uri(uris::CLASS_NODE.into()))
                .with(uris::INSTANCE_OF, Value::Uri(plugin.into()))
                .with(uris::POLYPHONIC, Value::Bool(true)),
        );
    }

    fn connect(&self, src: &str, dst: &str) {
        self.controller
            .connect(&src.parse().expect("path"), &dst.parse().expect("path"));
    }

    fn set_value(&self, path: &str, value: f32) {
        self.controller.set_property(
            &path.parse().expect("path"),
            uris::VALUE,
            Value::Float(value),
        );
    }

    fn port_audio(&self, path: &str) -> Vec<f32> {
        let port = self
            .engine
            .store()
            .find_port(&path.parse().expect("path"))
            .expect("port");
        let buffer = port.voice_buffer(0);
        let guard = buffer.read();
        guard.as_audio().expect("audio buffer").to_vec()
    }

    fn port(&self, path: &str) -> Arc<patchbay_engine::Port> {
        self.engine
            .store()
            .find_port(&path.parse().expect("path"))
            .expect("port")
    }
}

// ---------------------------------------------------------------------
// Scenarios

#[test]
fn s1_create_patch_and_node() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/n", "urn:patchbay:amp");
    h.pump();
    assert!(h.client.statuses().iter().all(Status::is_success));

    h.controller.get(&"/p/n".parse().expect("path"));
    h.pump();
    let description = h.client.put_for("/p/n").expect("node description");
    assert_eq!(
        description.get(uris::INSTANCE_OF),
        Some(&Value::Uri("urn:patchbay:amp".into()))
    );
    assert_eq!(description.get(uris::POLYPHONIC), Some(&Value::Bool(false)));
}

#[test]
fn s2_connect_type_mismatch() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/osc", "urn:test:const");
    h.put_node("/p/seq", "urn:test:seq");
    h.pump();

    h.connect("/p/osc/out", "/p/seq/ev");
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::TypeMismatch));

    let patch = h
        .engine
        .store()
        .find_patch(&"/p".parse().expect("path"))
        .expect("patch");
    assert_eq!(patch.num_connections(), 0);
    assert!(h.client.connected.lock().is_empty());
}

#[test]
fn s3_fan_in_allocates_mix_buffer_and_sums() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/a", "urn:test:const");
    h.put_node("/p/b", "urn:test:const");
    h.put_node("/p/sum", "urn:patchbay:amp");
    h.pump();
    h.set_value("/p/a/level", 0.25);
    h.set_value("/p/b/level", 0.5);
    h.pump();

    h.connect("/p/a/out", "/p/sum/in");
    h.connect("/p/b/out", "/p/sum/in");
    h.pump();
    assert!(h.client.statuses().iter().all(Status::is_success));

    let sum_in = h.port("/p/sum/in");
    assert_eq!(sum_in.num_connections(), 2);
    assert!(sum_in.binding_is_local());

    h.pump();
    let mixed = h.port_audio("/p/sum/in");
    for sample in mixed {
        assert!((sample - 0.75).abs() < 1e-6);
    }
    // The amp passes the mix through at unit gain.
    let out = h.port_audio("/p/sum/out");
    for sample in out {
        assert!((sample - 0.75).abs() < 1e-6);
    }
}

#[test]
fn s4_delete_cascades_to_connections() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/a", "urn:test:const");
    h.put_node("/p/b", "urn:test:const");
    h.put_node("/p/sum", "urn:patchbay:amp");
    h.pump();
    h.connect("/p/a/out", "/p/sum/in");
    h.connect("/p/b/out", "/p/sum/in");
    h.pump();

    h.controller.delete(&"/p/a".parse().expect("path"));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));
    assert!(h
        .client
        .deleted
        .lock()
        .contains(&"/p/a".to_string()));

    let sum_in = h.port("/p/sum/in");
    assert_eq!(sum_in.num_connections(), 1);
    assert!(sum_in.is_aliased());
    let b_out = h.port("/p/b/out");
    assert!(sum_in.voice_buffer(0).ptr_eq(&b_out.voice_buffer(0)));

    assert!(h
        .engine
        .store()
        .find(&"/p/a/out".parse().expect("path"))
        .is_none());
}

#[test]
fn s5_polyphony_change_resizes_voiced_ports() {
    let h = Harness::new();
    h.put_patch("/p", 2);
    h.put_poly_node("/p/v", "urn:patchbay:amp");
    h.pump();

    let port = h.port("/p/v/out");
    assert_eq!(port.voices(), 2);

    h.controller.set_property(
        &"/p".parse().expect("path"),
        uris::POLYPHONY,
        Value::Int(4),
    );
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));
    assert_eq!(port.voices(), 4);
    for voice in 0..4 {
        let buffer = port.voice_buffer(voice);
        assert!(buffer.read().as_audio().is_some());
    }
}

#[test]
fn s6_move_renames_subtree() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/a", "urn:patchbay:amp");
    h.pump();

    h.controller
        .move_object(&"/p/a".parse().expect("path"), &"/p/b".parse().expect("path"));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));

    h.controller.get(&"/p/a".parse().expect("path"));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::NotFound));

    h.controller.get(&"/p/b".parse().expect("path"));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));
    assert!(h.client.put_for("/p/b").is_some());
    assert!(h
        .engine
        .store()
        .find(&"/p/b/gain".parse().expect("path"))
        .is_some());
}

// ---------------------------------------------------------------------
// Boundary behaviours

#[test]
fn b1_duplicate_create_fails_and_store_is_unchanged() {
    use patchbay_engine::events::{CreatePatch, Request};

    let h = Harness::new();
    h.put_patch("/p", 1);
    h.pump();
    let before = h.engine.store().len();

    let request = Request::new(
        1000,
        Some(h.client.clone() as Arc<dyn ClientInterface>),
    );
    h.engine.submit(Box::new(CreatePatch::new(
        Some(request),
        h.engine.frame_time(),
        "/p".parse().expect("path"),
        1,
        Properties::new(),
    )));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::AlreadyExists));
    assert_eq!(h.engine.store().len(), before);
}

#[test]
fn b2_cyclic_connect_is_rejected() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/x", "urn:patchbay:amp");
    h.put_node("/p/y", "urn:patchbay:amp");
    h.pump();
    h.connect("/p/x/out", "/p/y/in");
    h.pump();

    let patch = h
        .engine
        .store()
        .find_patch(&"/p".parse().expect("path"))
        .expect("patch");
    let compiled_len = patch.compiled().expect("compiled").len();

    h.connect("/p/y/out", "/p/x/in");
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Internal));
    assert_eq!(patch.num_connections(), 1);
    assert_eq!(patch.compiled().expect("compiled").len(), compiled_len);
}

#[test]
fn b3_value_at_block_boundary_lands_in_next_block() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/c", "urn:test:const");
    h.pump();

    // Stamp the event exactly at the end of the upcoming block.
    let time = h.engine.frame_time() + u64::from(BLOCK);
    let port = h.port("/p/c/level");
    h.engine.submit(Box::new(
        patchbay_engine::events::SetPortValue::immediate(
            None,
            time,
            Arc::clone(&port),
            Value::Float(0.9),
        ),
    ));
    h.engine.source().pump_pre(&h.engine, false);

    h.engine.run(BLOCK);
    assert!((port.last_value() - 0.0).abs() < f32::EPSILON);

    h.engine.run(BLOCK);
    h.engine.source().pump_post(&h.engine);
    assert!((port.last_value() - 0.9).abs() < f32::EPSILON);
}

#[test]
fn b4_poly_change_keeps_audio_rendering() {
    let h = Harness::new();
    h.put_patch("/p", 2);
    h.put_node("/p/c", "urn:test:const");
    h.put_poly_node("/p/v", "urn:patchbay:amp");
    h.pump();
    h.set_value("/p/c/level", 0.5);
    h.connect("/p/c/out", "/p/v/in");
    h.pump();

    h.controller.set_property(
        &"/p".parse().expect("path"),
        uris::POLYPHONY,
        Value::Int(4),
    );
    // First block with the new polyphony renders from the new buffers.
    h.pump();
    h.pump();
    let port = h.port("/p/v/out");
    assert_eq!(port.voices(), 4);
    for voice in 0..4 {
        let buffer = port.voice_buffer(voice);
        let guard = buffer.read();
        for sample in guard.as_audio().expect("audio") {
            assert!((sample - 0.5).abs() < 1e-6);
        }
    }
}

// ---------------------------------------------------------------------
// Round trips

#[test]
fn r1_connect_disconnect_restores_control_input() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/c", "urn:test:const");
    h.put_node("/p/d", "urn:test:const");
    h.pump();
    h.set_value("/p/d/level", 0.3);
    h.pump();

    // Control -> control connection between the two level inputs is not
    // possible (level is an input), so wire audio out into amp in and
    // back out again.
    h.put_node("/p/amp", "urn:patchbay:amp");
    h.pump();
    let gain = h.port("/p/amp/gain");
    let before = gain.voice_buffer(0).read().clone();

    h.connect("/p/c/out", "/p/amp/in");
    h.pump();
    h.controller.disconnect(
        &"/p/c/out".parse().expect("path"),
        &"/p/amp/in".parse().expect("path"),
    );
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));

    let amp_in = h.port("/p/amp/in");
    assert_eq!(amp_in.num_connections(), 0);
    assert!(!amp_in.is_aliased());
    // The untouched control port is byte-equal to its prior state.
    assert_eq!(gain.voice_buffer(0).read().clone(), before);
}

#[test]
fn r2_put_then_get_returns_superset() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.pump();
    let mut props = Properties::new();
    props.insert("urn:example:label", Value::String("warm pad".into()));
    h.controller.put(&"/p".parse().expect("path"), props.clone());
    h.pump();

    h.controller.get(&"/p".parse().expect("path"));
    h.pump();
    let description = h.client.put_for("/p").expect("description");
    assert!(description.contains_all(&props));
}

#[test]
fn r3_move_there_and_back_restores_paths() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/a", "urn:patchbay:amp");
    h.pump();
    let before: Vec<String> = h
        .engine
        .store()
        .snapshot()
        .iter()
        .map(|o| o.path().as_str().to_string())
        .collect();

    h.controller
        .move_object(&"/p/a".parse().expect("path"), &"/p/b".parse().expect("path"));
    h.pump();
    h.controller
        .move_object(&"/p/b".parse().expect("path"), &"/p/a".parse().expect("path"));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));

    let after: Vec<String> = h
        .engine
        .store()
        .snapshot()
        .iter()
        .map(|o| o.path().as_str().to_string())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn r4_set_port_value_is_idempotent() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/c", "urn:test:const");
    h.pump();

    h.set_value("/p/c/level", 0.6);
    h.pump();
    let once = h.port_audio("/p/c/out");

    h.set_value("/p/c/level", 0.6);
    h.pump();
    let twice = h.port_audio("/p/c/out");
    assert_eq!(once, twice);
}

// ---------------------------------------------------------------------
// Pipeline-level checks

#[test]
fn disconnect_all_sweeps_every_edge() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/a", "urn:test:const");
    h.put_node("/p/sum", "urn:patchbay:amp");
    h.put_node("/p/post", "urn:patchbay:amp");
    h.pump();
    h.connect("/p/a/out", "/p/sum/in");
    h.connect("/p/sum/out", "/p/post/in");
    h.pump();

    h.controller.disconnect_all(
        &"/p".parse().expect("path"),
        &"/p/sum".parse().expect("path"),
    );
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));

    let patch = h
        .engine
        .store()
        .find_patch(&"/p".parse().expect("path"))
        .expect("patch");
    assert_eq!(patch.num_connections(), 0);
    assert_eq!(h.client.disconnected.lock().len(), 2);
}

#[test]
fn responses_carry_increasing_ids() {
    let h = Harness::new();
    h.controller.ping();
    h.controller.ping();
    h.pump();
    let responses = h.client.responses.lock();
    let ids: Vec<i32> = responses.iter().map(|(id, _, _)| *id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn learn_binds_the_next_controller_value() {
    use patchbay_engine::bindings::BindingKey;

    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/c", "urn:test:const");
    h.pump();

    h.controller.learn(&"/p/c/level".parse().expect("path"));
    h.pump();
    assert_eq!(h.client.last_status(), Some(Status::Success));

    // First value is captured as the binding, second one applies.
    h.engine.control_input(BindingKey::MidiCc(7), 127);
    h.engine.control_input(BindingKey::MidiCc(7), 64);
    h.pump();

    let port = h.port("/p/c/level");
    assert!((port.last_value() - 64.0 / 127.0).abs() < 1e-6);
    let binding = port
        .base()
        .property(uris::CONTROL_BINDING)
        .expect("binding recorded");
    assert_eq!(BindingKey::from_dict(&binding), Some(BindingKey::MidiCc(7)));
}

#[test]
fn all_notes_off_reaches_event_inputs() {
    let h = Harness::new();
    h.put_patch("/p", 1);
    h.put_node("/p/seq", "urn:test:seq");
    h.pump();

    h.controller.all_notes_off(&"/p".parse().expect("path"));
    h.pump();
    // The seq test plugin reports the number of pending events.
    for sample in h.port_audio("/p/seq/out") {
        assert!((sample - 1.0).abs() < 1e-6);
    }

    // Event buffers are one-shot; the next block is quiet again.
    h.pump();
    for sample in h.port_audio("/p/seq/out") {
        assert!(sample.abs() < 1e-6);
    }
}

#[test]
fn message_context_runs_off_the_audio_thread() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct MsgPlugin {
        ports: Vec<PortSpec>,
        runs: Arc<AtomicUsize>,
    }

    impl Plugin for MsgPlugin {
        fn uri(&self) -> &str {
            "urn:test:msg"
        }

        fn name(&self) -> &str {
            "Message"
        }

        fn ports(&self) -> &[PortSpec] {
            &self.ports
        }

        fn instantiate(&self, _sample_rate: u32) -> Box<dyn PluginInstance> {
            Box::new(MsgVoice {
                runs: Arc::clone(&self.runs),
            })
        }

        fn wants_message_context(&self) -> bool {
            true
        }
    }

    struct MsgVoice {
        runs: Arc<AtomicUsize>,
    }

    impl PluginInstance for MsgVoice {
        fn run(&mut self, _buffers: &mut PortBuffers<'_>, _nframes: u32) {}

        fn message_run(&mut self) {
            self.runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct OneLib {
        plugin: Arc<MsgPlugin>,
    }

    impl PluginLibrary for OneLib {
        fn load(&self) -> usize {
            1
        }

        fn plugin(&self, uri: &str) -> Option<Arc<dyn Plugin>> {
            (uri == self.plugin.uri()).then(|| self.plugin.clone() as Arc<dyn Plugin>)
        }

        fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
            vec![self.plugin.clone() as Arc<dyn Plugin>]
        }
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let library = OneLib {
        plugin: Arc::new(MsgPlugin {
            ports: vec![PortSpec::new("level", Direction::Input, PortType::Control)],
            runs: Arc::clone(&runs),
        }),
    };

    let config = EngineConfig {
        sample_rate: 48_000,
        block_length: BLOCK,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, Arc::new(library));
    let controller = EngineController::new(Arc::clone(&engine));
    controller.put(
        &"/m".parse().expect("path"),
        Properties::new()
            .with(uris::TYPE, Value::Uri(uris::CLASS_NODE.into()))
            .with(uris::INSTANCE_OF, Value::Uri("urn:test:msg".into())),
    );
    engine.source().pump_pre(&engine, false);
    engine.run(BLOCK);
    engine.source().pump_post(&engine);

    controller.set_property(
        &"/m/level".parse().expect("path"),
        uris::VALUE,
        Value::Float(0.5),
    );
    engine.source().pump_pre(&engine, false);
    engine.run(BLOCK);
    engine.source().pump_post(&engine);

    // The callback lands on the message worker shortly after.
    let deadline = Instant::now() + Duration::from_secs(2);
    while runs.load(Ordering::Relaxed) == 0 {
        assert!(Instant::now() < deadline, "message context never ran");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn threaded_pipeline_answers_requests() {
    use patchbay_engine::OfflineDriver;
    use std::time::{Duration, Instant};

    let config = EngineConfig {
        sample_rate: 48_000,
        block_length: BLOCK,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, Arc::new(TestLibrary::new()));
    let driver = OfflineDriver::new(48_000, BLOCK);
    engine.set_driver(driver.clone());
    engine.activate().expect("activate");

    let controller = EngineController::new(Arc::clone(&engine));
    let client = MirrorClient::new();
    controller.register_client(client.clone());
    controller.put(
        &"/p".parse().expect("path"),
        Properties::new()
            .with(uris::TYPE, Value::Uri(uris::CLASS_PATCH.into()))
            .with(uris::ENABLED, Value::Bool(true)),
    );
    controller.ping();

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.responses.lock().len() < 3 {
        driver.run_blocks(1);
        assert!(Instant::now() < deadline, "pipeline stalled");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(client.statuses().iter().all(Status::is_success));
    engine.shutdown();
}
