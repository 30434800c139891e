use super::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn file_service(dir: &TempDir) -> PolicyRegistryService<JsonFileStore> {
    PolicyRegistryService::new(JsonFileStore::new(dir.path().join("models/policy_registry.json")), 0.10)
}

#[test]
fn test_first_load_bootstraps_default() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir);

    let registry = service.load().unwrap();
    assert_eq!(registry.current, PolicyState::initial(0.10));
    assert_eq!(registry.current.created_at, "INIT");
    assert_eq!(registry.current.notes, "auto-created");
    assert!(registry.history.is_empty());

    // bootstrap is persisted, not just returned
    assert!(dir.path().join("models/policy_registry.json").exists());
}

#[test]
fn test_update_appends_history() {
    let service = PolicyRegistryService::new(MemoryStore::new(), 0.10);

    let s1 = service.update(0.05, PolicyMode::Experiment, "rollout GO -> 0.05").unwrap();
    let s2 = service.update(0.05, PolicyMode::Experiment, "hold. not_significant").unwrap();
    let s3 = service.update(0.10, PolicyMode::Experiment, "rollback. effect_non_positive").unwrap();

    assert_eq!(s1.policy_version, "P1");
    assert_eq!(s2.policy_version, "P2");
    assert_eq!(s3.policy_version, "P3");

    let registry = service.load().unwrap();
    assert_eq!(registry.current, s3);
    let versions: Vec<&str> = registry
        .history
        .iter()
        .map(|s| s.policy_version.as_str())
        .collect();
    assert_eq!(versions, vec!["P0", "P1", "P2"]);
}

#[test]
fn test_n_updates_give_history_of_n_without_duplicating_current() {
    let service = PolicyRegistryService::new(MemoryStore::new(), 0.10);
    let n = 12;
    for i in 0..n {
        service
            .update(0.02, PolicyMode::Experiment, format!("cycle {}", i))
            .unwrap();
    }

    let registry = service.load().unwrap();
    assert_eq!(registry.history.len(), n);
    assert!(!registry
        .history
        .iter()
        .any(|s| s.policy_version == registry.current.policy_version));

    let numbers: Vec<u64> = registry
        .history
        .iter()
        .chain(std::iter::once(&registry.current))
        .map(|s| s.version_number().unwrap())
        .collect();
    assert!(numbers.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_registry_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let service = file_service(&dir);
        service.update(0.05, PolicyMode::Experiment, "go").unwrap();
        service.update(0.02, PolicyMode::BaselineOnly, "go").unwrap();
    }

    let reopened = file_service(&dir);
    let registry = reopened.load().unwrap();
    assert_eq!(registry.current.policy_version, "P2");
    assert_eq!(registry.current.control_rate, 0.02);
    assert_eq!(registry.current.mode, PolicyMode::BaselineOnly);
    assert_eq!(registry.history.len(), 2);
}

#[test]
fn test_registry_json_uses_wire_names() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir);
    service.update(0.05, PolicyMode::Experiment, "go").unwrap();

    let text = std::fs::read_to_string(dir.path().join("models/policy_registry.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["current"]["policy_version"], "P1");
    assert_eq!(json["current"]["mode"], "EXPERIMENT");
    assert_eq!(json["history"][0]["policy_version"], "P0");
}

#[test]
fn test_corrupt_registry_is_hard_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy_registry.json");
    std::fs::write(&path, "{ not json").unwrap();

    let service = PolicyRegistryService::new(JsonFileStore::new(&path), 0.10);
    assert!(matches!(service.load(), Err(RegistryError::Corrupt { .. })));
    assert!(service
        .update(0.05, PolicyMode::Experiment, "go")
        .is_err());

    // the corrupt document is left for an operator, not overwritten
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn test_invalid_rate_is_rejected_without_write() {
    let service = PolicyRegistryService::new(MemoryStore::new(), 0.10);
    assert!(matches!(
        service.update(1.5, PolicyMode::Experiment, "bad"),
        Err(RegistryError::InvalidRate(_))
    ));
    assert!(service.load().unwrap().history.is_empty());
}

#[test]
fn test_transact_none_leaves_registry_untouched() {
    let service = PolicyRegistryService::new(MemoryStore::new(), 0.0);
    let tx = service.transact(|_| None).unwrap();
    assert_eq!(tx.previous.policy_version, "P0");
    assert!(tx.created.is_none());
    assert!(service.load().unwrap().history.is_empty());
}

#[test]
fn test_concurrent_transactions_never_share_a_version() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(file_service(&dir));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        let tx = service
                            .transact(|current| {
                                Some(PolicyUpdate {
                                    control_rate: current.control_rate,
                                    mode: current.mode,
                                    notes: format!("thread {} cycle {}", t, i),
                                })
                            })
                            .unwrap();
                        let created = tx.created.unwrap();
                        // each writer saw the state it superseded
                        assert_eq!(
                            created.version_number().unwrap(),
                            tx.previous.version_number().unwrap() + 1
                        );
                        created.policy_version
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut versions = HashSet::new();
    for handle in handles {
        for version in handle.join().unwrap() {
            assert!(versions.insert(version), "duplicate version");
        }
    }

    let registry = service.load().unwrap();
    assert_eq!(versions.len(), 40);
    assert_eq!(registry.history.len(), 40);
    assert_eq!(registry.current.policy_version, "P40");
}

#[test]
fn test_separate_services_on_one_file_serialize_transitions() {
    let dir = TempDir::new().unwrap();
    let holder = file_service(&dir);
    holder.load().unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let mut pending = None;
    let tx = holder
        .transact(|current| {
            // a second service on the same file writes while this cycle is open
            let path = dir.path().join("models/policy_registry.json");
            let other = thread::spawn(move || {
                let service = PolicyRegistryService::new(JsonFileStore::new(path), 0.10);
                started_tx.send(()).unwrap();
                service.update(0.05, PolicyMode::Experiment, "second GO").unwrap()
            });
            started_rx.recv().unwrap();
            thread::sleep(Duration::from_millis(100));
            assert!(!other.is_finished(), "second writer ran inside an open transaction");

            pending = Some(other);
            Some(PolicyUpdate {
                control_rate: current.control_rate,
                mode: current.mode,
                notes: "first HOLD".into(),
            })
        })
        .unwrap();
    assert_eq!(tx.created.unwrap().policy_version, "P1");

    let second = pending.unwrap().join().unwrap();
    assert_eq!(second.policy_version, "P2");

    let registry = holder.load().unwrap();
    assert_eq!(registry.current.notes, "second GO");
    let notes: Vec<&str> = registry.history.iter().map(|s| s.notes.as_str()).collect();
    assert_eq!(notes, vec!["auto-created", "first HOLD"]);
}

#[test]
fn test_concurrent_services_on_one_file_never_lose_updates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("models/policy_registry.json");

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let path = path.clone();
            thread::spawn(move || {
                // one service per thread, like one per CLI process
                let service = PolicyRegistryService::new(JsonFileStore::new(path), 0.10);
                (0..5)
                    .map(|i| {
                        service
                            .update(0.10, PolicyMode::Experiment, format!("service {} cycle {}", t, i))
                            .unwrap()
                            .policy_version
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut versions = HashSet::new();
    for handle in handles {
        for version in handle.join().unwrap() {
            assert!(versions.insert(version), "duplicate version");
        }
    }

    let registry = file_service(&dir).load().unwrap();
    assert_eq!(registry.history.len(), 20);
    assert_eq!(registry.current.policy_version, "P20");
}

#[test]
fn test_bootstrap_never_clobbers_existing_registry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy_registry.json");
    let mut store = JsonFileStore::new(&path);

    let mut first = PolicyRegistry::bootstrap(0.10);
    first.supersede(
        PolicyUpdate {
            control_rate: 0.05,
            mode: PolicyMode::Experiment,
            notes: "rollout GO -> 0.05".into(),
        },
        "2024-03-01T00:00:00Z".into(),
    );
    store.write(&first).unwrap();

    assert!(!store.create(&PolicyRegistry::bootstrap(0.10)).unwrap());
    assert_eq!(store.read().unwrap().unwrap().current.policy_version, "P1");
}

#[test]
fn test_lock_file_sits_next_to_registry() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir);
    service.update(0.05, PolicyMode::Experiment, "go").unwrap();
    assert!(dir.path().join("models/policy_registry.json.lock").exists());
}
