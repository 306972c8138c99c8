//! Integration tests for the full journal pipeline.
//!
//! Tests: Writer → StorageProvider → Reader / Subscription → Engine replay
//!
//! Every scenario runs against both reference backends:
//! - in-memory (catch-up capable)
//! - file (live-only subscriptions, survives a provider restart)

#[cfg(test)]
mod tests {
    use std::sync::{Arc, mpsc};
    use std::time::{Duration, Instant};

    use serde_json::{Value as JsonValue, json};
    use tempfile::TempDir;

    use memstate_core::Partition;
    use memstate_journal::{JournalError, JournalRecord, RecordHandler, StorageProvider};

    use crate::engine::Engine;
    use crate::storage::{FileStorageProvider, InMemoryStorageProvider};
    use crate::test_support::{AddString, StringList, config};

    /// A provider plus the means to "restart" it against the same data.
    struct Backend {
        name: &'static str,
        provider: Arc<dyn StorageProvider>,
        reopen: Box<dyn Fn() -> Arc<dyn StorageProvider>>,
        _dir: Option<TempDir>,
    }

    fn in_memory() -> Backend {
        let provider = InMemoryStorageProvider::new();
        let shared = provider.clone();
        Backend {
            name: "in_memory",
            provider: Arc::new(provider),
            reopen: Box::new(move || Arc::new(shared.clone())),
            _dir: None,
        }
    }

    fn file() -> Backend {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let provider = FileStorageProvider::new(root.clone());
        Backend {
            name: "file",
            provider: Arc::new(provider),
            reopen: Box::new(move || Arc::new(FileStorageProvider::new(root.clone()))),
            _dir: Some(dir),
        }
    }

    fn backends() -> Vec<Backend> {
        memstate_observability::init_for_tests();
        vec![in_memory(), file()]
    }

    fn partition() -> Partition {
        config().partition().unwrap()
    }

    fn append_all(provider: &dyn StorageProvider, commands: impl IntoIterator<Item = JsonValue>) {
        provider.initialize().unwrap();
        let mut writer = provider.create_journal_writer(&partition()).unwrap();
        for command in commands {
            writer.append(command).unwrap();
        }
        writer.close().unwrap();
    }

    fn read_all(provider: &dyn StorageProvider) -> Vec<JournalRecord> {
        provider
            .create_journal_reader(&partition())
            .unwrap()
            .records_from(0)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn channel_handler() -> (RecordHandler, mpsc::Receiver<JournalRecord>) {
        let (tx, rx) = mpsc::channel();
        let handler: RecordHandler = Box::new(move |r: JournalRecord| -> anyhow::Result<()> {
            tx.send(r)?;
            Ok(())
        });
        (handler, rx)
    }

    #[test]
    fn single_append_reads_back_one_record() {
        for backend in backends() {
            append_all(&*backend.provider, [json!("hello")]);

            let records = read_all(&*backend.provider);
            assert_eq!(records.len(), 1, "{}", backend.name);
            assert_eq!(records[0].position(), 0);
            assert_eq!(records[0].command(), &json!("hello"));
            assert_eq!(records[0].partition(), &partition());
        }
    }

    #[test]
    fn ten_thousand_appends_read_back_in_order() {
        for backend in backends() {
            append_all(&*backend.provider, (0..10_000).map(|i| json!(i.to_string())));

            let records = read_all(&*backend.provider);
            assert_eq!(records.len(), 10_000, "{}", backend.name);
            for (i, record) in records.iter().enumerate() {
                assert_eq!(record.position(), i as u64);
                assert_eq!(record.command(), &json!(i.to_string()));
            }
        }
    }

    #[test]
    fn repeated_reads_are_identical() {
        for backend in backends() {
            append_all(&*backend.provider, (0..20).map(|i| json!(i)));

            let first: Vec<_> = read_all(&*backend.provider)
                .into_iter()
                .map(|r| (r.record_id(), r.position(), r.into_command()))
                .collect();
            let second: Vec<_> = read_all(&*backend.provider)
                .into_iter()
                .map(|r| (r.record_id(), r.position(), r.into_command()))
                .collect();
            assert_eq!(first, second, "{}", backend.name);
        }
    }

    #[test]
    fn catch_up_subscription_on_existing_history() {
        for backend in backends() {
            append_all(&*backend.provider, (0..50).map(|i| json!(i)));

            let source = backend
                .provider
                .create_journal_subscription_source(&partition())
                .unwrap();
            let (handler, rx) = channel_handler();

            if !backend.provider.supports_catchup_subscriptions() {
                assert!(
                    matches!(
                        source.subscribe(0, handler),
                        Err(JournalError::UnsupportedSubscription { requested: 0, tip: 50, .. })
                    ),
                    "{}",
                    backend.name
                );
                continue;
            }

            let _sub = source.subscribe(0, handler).unwrap();
            let positions: Vec<u64> = (0..50)
                .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap().position())
                .collect();
            assert_eq!(positions, (0..50).collect::<Vec<_>>(), "{}", backend.name);
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        }
    }

    #[test]
    fn live_subscription_sees_new_appends() {
        for backend in backends() {
            backend.provider.initialize().unwrap();
            let source = backend
                .provider
                .create_journal_subscription_source(&partition())
                .unwrap();
            let (handler, rx) = channel_handler();
            let _sub = source.subscribe(0, handler).unwrap();

            let started = Instant::now();
            append_all(&*backend.provider, (0..5).map(|i| json!(i)));

            let positions: Vec<u64> = (0..5)
                .map(|_| rx.recv_timeout(Duration::from_millis(1250)).unwrap().position())
                .collect();
            assert!(started.elapsed() < Duration::from_millis(1250), "{}", backend.name);
            assert_eq!(positions, vec![0, 1, 2, 3, 4], "{}", backend.name);
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        }
    }

    #[test]
    fn engine_state_survives_restart() {
        for backend in backends() {
            {
                let engine: Engine<StringList> = Engine::start(&config(), backend.provider.clone()).unwrap();
                let counts: Vec<usize> = (0..100)
                    .map(|i| engine.execute(AddString::new(format!("item-{i}"))).unwrap())
                    .collect();
                assert_eq!(counts, (1..=100).collect::<Vec<_>>(), "{}", backend.name);
                engine.dispose().unwrap();
            }

            let engine: Engine<StringList> = Engine::start(&config(), (backend.reopen)()).unwrap();
            assert_eq!(engine.query(|m: &StringList| m.items.len()).unwrap(), 100, "{}", backend.name);
            assert_eq!(engine.next_position(), 100);
            assert_eq!(
                engine.query(|m: &StringList| m.items.last().cloned()).unwrap(),
                Some("item-99".to_string())
            );
        }
    }

    #[test]
    fn engine_from_file_config() {
        let dir = tempfile::tempdir().unwrap();
        let json = format!(
            r#"{{"stream_name":"orders","storage":{{"kind":"file","directory":{}}}}}"#,
            serde_json::to_string(dir.path()).unwrap()
        );
        let config = crate::config::EngineConfig::from_json_str(&json).unwrap();

        {
            let engine: Engine<StringList> = Engine::from_config(&config).unwrap();
            engine.execute(AddString::new("persisted")).unwrap();
        }

        assert!(dir.path().join("orders.0.journal").exists());
        let engine: Engine<StringList> = Engine::from_config(&config).unwrap();
        assert_eq!(
            engine.query(|m: &StringList| m.items.clone()).unwrap(),
            vec!["persisted".to_string()]
        );
    }

    #[test]
    fn second_engine_on_same_file_config_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::EngineConfig {
            storage: crate::config::StorageConfig::File {
                directory: dir.path().to_path_buf(),
            },
            ..config()
        };

        let first: Engine<StringList> = Engine::from_config(&config).unwrap();
        assert!(matches!(
            Engine::<StringList>::from_config(&config),
            Err(crate::engine::EngineError::DuplicateWriter(_))
        ));
        assert_eq!(first.execute(AddString::new("a")).unwrap(), 1);
        first.dispose().unwrap();

        let second: Engine<StringList> = Engine::from_config(&config).unwrap();
        assert_eq!(second.execute(AddString::new("b")).unwrap(), 2);
    }

    #[test]
    fn garbled_journal_file_fails_engine_start() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileStorageProvider::new(dir.path());
        append_all(&provider, [json!({"value": "ok"})]);

        let path = provider.journal_path(&partition());
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json}\n");
        std::fs::write(&path, contents).unwrap();

        let err = Engine::<StringList>::start(&config(), Arc::new(FileStorageProvider::new(dir.path())))
            .err()
            .unwrap();
        assert!(matches!(err, crate::engine::EngineError::ReplayCorruption { position: 1, .. }));
    }
}
