//! Pipeline Integration Tests
//!
//! Drives the engine end to end against real capability trees.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capstan::registry::{section_marker, CapabilityRegistry, RegistrationLog, LOG_FILE};
use capstan::{BuiltinActivation, CapabilityModule, CapabilityRecord, Config, Engine};
use serial_test::serial;
use tempfile::TempDir;

fn config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.engine.root = temp.path().join("features");
    config.registry.dir = temp.path().join("registry");
    config.registry.consumer_root = temp.path().to_path_buf();
    config.monitor.poll_interval_ms = 25;
    config.monitor.error_backoff_ms = 25;
    config.monitor.stop_timeout_ms = 2_000;
    config
}

fn write(root: &Path, dir: &str, file: &str, content: &str) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), content).unwrap();
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

// ============================================================================
// Discovery Pass
// ============================================================================

#[test]
fn test_every_manifest_format() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("features");

    write(
        &root,
        "embedded",
        "capability.rs",
        r##"pub const CAPABILITY: &str = r#"{"name": "embedded", "description": "E", "agents_can_use": []}"#;"##,
    );
    write(&root, "toml", "capability.toml", "name = \"toml\"\ndescription = \"T\"\nagents_can_use = []\n");
    write(&root, "yaml", "capability.yml", "name: yaml\ndescription: Y\nagents_can_use: []\n");
    write(&root, "json", "capability.json", r#"{"name": "json", "description": "J", "agents_can_use": []}"#);
    std::fs::create_dir_all(root.join("bare")).unwrap();

    let engine = Engine::new(config(&temp), Arc::new(BuiltinActivation::new())).unwrap();
    let outcomes = engine.bootstrap().unwrap();

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.values().all(|ok| *ok), "{outcomes:?}");

    let bare = engine.catalog().remove("bare").unwrap();
    assert_eq!(bare.description, "Auto-discovered capability: bare");
}

#[test]
fn test_registration_log_records_each_pass() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    write(&config.engine.root, "alpha", "capability.yaml", "name: alpha\ndescription: A\nagents_can_use: []\n");
    write(&config.engine.root, "beta", "capability.yaml", "name: beta\nagents_can_use: []\n");
    let registry_dir = config.registry.dir.clone();

    let engine = Engine::new(config, Arc::new(BuiltinActivation::new())).unwrap();
    engine.bootstrap().unwrap();
    engine.bootstrap().unwrap();

    let log = RegistrationLog::open(registry_dir.join(LOG_FILE));
    assert_eq!(log.passes().len(), 2);
    let last = log.last().unwrap();
    assert_eq!(last.total_capabilities, 1);
    assert_eq!(last.successful, 1);
    assert_eq!(last.details.get("alpha"), Some(&true));

    let catalog = CapabilityRegistry::read_catalog(&registry_dir).unwrap();
    assert_eq!(catalog.keys().collect::<Vec<_>>(), vec!["alpha"]);
}

#[test]
fn test_consumer_document_injection() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.registry.inject_consumer_docs = true;

    write(temp.path(), "agents", "planner.md", "# Planner\n");
    write(
        &config.engine.root,
        "routing",
        "capability.yaml",
        "name: routing\ndescription: Routes work\nagents_can_use: [planner]\n",
    );
    write(
        &config.engine.root,
        "orphan",
        "capability.yaml",
        "name: orphan\ndescription: Nobody reads this\nagents_can_use: [ghost]\n",
    );

    let engine = Engine::new(config, Arc::new(BuiltinActivation::new())).unwrap();
    let outcomes = engine.bootstrap().unwrap();

    assert_eq!(outcomes.get("routing"), Some(&true));
    assert_eq!(outcomes.get("orphan"), Some(&false));

    let doc = std::fs::read_to_string(temp.path().join("agents/planner.md")).unwrap();
    assert!(doc.starts_with("# Planner\n"));
    assert!(doc.contains(&section_marker("routing")));
    assert!(doc.contains("Routes work"));
}

// ============================================================================
// Activation
// ============================================================================

struct Tracked(Arc<AtomicUsize>);

impl CapabilityModule for Tracked {
    fn shutdown(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_builtin_module_lifecycle() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    write(&config.engine.root, "worker", "capability.yaml", "name: worker\ndescription: W\nagents_can_use: []\n");
    write(&config.engine.root, "worker", "worker.rs", "pub fn run() {}");

    let shutdowns = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&shutdowns);
    let strategy = BuiltinActivation::new().with_module("worker", move || Tracked(Arc::clone(&counter)));

    let engine = Engine::new(config, Arc::new(strategy)).unwrap();
    engine.bootstrap().unwrap();
    assert!(engine.loader().with_loaded(|loaded| loaded["worker"].has_module()));

    engine.loader().unload_capability("worker").unwrap();
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Hot Reload
// ============================================================================

#[test]
fn test_hot_reload_through_engine() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.monitor.enabled = true;
    let root = config.engine.root.clone();
    std::fs::create_dir_all(&root).unwrap();

    let engine = Engine::new(config, Arc::new(BuiltinActivation::new())).unwrap();
    let unloaded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&unloaded);
    engine.on_unload(move |_: &str, _: &CapabilityRecord| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    engine.bootstrap().unwrap();
    assert!(engine.is_monitoring());

    write(&root, "late", "capability.json", r#"{"name": "late", "description": "L", "agents_can_use": []}"#);
    assert!(wait_for(|| engine.catalog().contains_key("late")));

    std::fs::remove_dir_all(root.join("late")).unwrap();
    assert!(wait_for(|| !engine.loader().is_loaded("late")));
    assert!(!engine.catalog().contains_key("late"));
    assert_eq!(unloaded.load(Ordering::SeqCst), 1);

    assert!(engine.stop());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
#[serial]
fn test_config_load_prefers_local_file() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join(".capstan.toml"),
        "[engine]\nroot = \"local-features\"\n\n[monitor]\nenabled = true\n",
    )
    .unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();
    let config = Config::load();
    std::env::set_current_dir(previous).unwrap();

    let config = config.unwrap();
    assert_eq!(config.engine.root, Path::new("local-features"));
    assert!(config.monitor.enabled);
    assert_eq!(config.monitor.poll_interval_ms, 5_000);
}
