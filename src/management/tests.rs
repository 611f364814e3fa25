//! Management Module Tests
//!
//! ## Test Scopes
//! - **Lifecycle**: Forward-only progression through `update_index`, per action.
//! - **Acknowledgment**: Timeouts surface with the index, key and current status.
//! - **Queries**: Aggregate status, query eligibility and `await_status`.
//! - **Handlers**: The admin endpoints called directly.

#[cfg(test)]
mod tests {
    use crate::ack::messenger::{InProcessMessenger, Reachability};
    use crate::ack::view::SchemaView;
    use crate::config::{LifecycleConfig, StrategyKind};
    use crate::error::LifecycleError;
    use crate::executor::backend::{InMemoryIndexBackend, IndexBackends};
    use crate::executor::coordinator::ScanResources;
    use crate::executor::elements::{Element, InMemoryGraph};
    use crate::executor::partitioner::RangePartitioner;
    use crate::management::handlers::{
        handle_await_status, handle_build_index, handle_evict_instance, handle_index_status,
        handle_update_index, status_code,
    };
    use crate::management::manager::{IndexManager, UpdateOutcome, cleanup_backend};
    use crate::management::protocol::{
        AwaitQuery, BuildIndexRequest, EvictRequest, IndexQuery, UpdateIndexRequest,
    };
    use crate::membership::registry::InstanceRegistry;
    use crate::membership::types::InstanceId;
    use crate::schema::state_machine::{RequiredWork, Transition};
    use crate::schema::store::{InMemorySchemaStore, SchemaStatusStore};
    use crate::schema::types::{
        ConstituentKey, ElementCategory, IndexDefinition, IndexRef, IndexStatus, SchemaAction,
    };
    use crate::schema::writer::TransitionPlan;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::{Extension, Json};
    use std::sync::Arc;
    use std::time::Duration;

    struct Cluster {
        manager: Arc<IndexManager>,
        messenger: Arc<InProcessMessenger>,
        backend: Arc<InMemoryIndexBackend>,
        mixed: Arc<InMemoryIndexBackend>,
    }

    fn cluster(instances: &[&str], strategy: StrategyKind) -> Cluster {
        let config = LifecycleConfig {
            ack_timeout_ms: 150,
            ack_poll_interval_ms: 10,
            partition_timeout_ms: 5_000,
            num_partitions: 4,
            worker_count: 2,
            strategy,
            ..Default::default()
        };

        let store: Arc<dyn SchemaStatusStore> = Arc::new(InMemorySchemaStore::new());
        let registry = InstanceRegistry::new(config.heartbeat_stale_after());
        let messenger = InProcessMessenger::new();
        for name in instances {
            let id = InstanceId::named(*name);
            registry.register_instance(id.clone(), None);
            messenger.attach(Arc::new(SchemaView::new(id, store.clone())));
        }

        let graph: InMemoryGraph = (0..10)
            .map(|id| {
                let vertex = Element::vertex(id, "person");
                if id < 4 {
                    vertex.with("name", format!("n{}", id))
                } else {
                    vertex
                }
            })
            .collect();

        let backend = InMemoryIndexBackend::new();
        let mixed = InMemoryIndexBackend::new();
        let backends = IndexBackends::new(backend.clone());
        backends.register_mixed("search", mixed.clone());

        let manager = IndexManager::from_config(
            &config,
            store,
            registry,
            messenger.clone(),
            ScanResources {
                partitioner: Arc::new(RangePartitioner::with_bound(config.num_partitions, 64)),
                source: Arc::new(graph),
                backends,
            },
        );

        Cluster {
            manager,
            messenger,
            backend,
            mixed,
        }
    }

    fn names() -> IndexRef {
        IndexRef::global("names")
    }

    fn install_names(manager: &IndexManager) {
        manager
            .build_index(IndexDefinition::composite(
                names(),
                ElementCategory::Vertex,
                &["name"],
            ))
            .unwrap();
    }

    async fn apply(manager: &IndexManager, action: SchemaAction) -> UpdateOutcome {
        manager.update_index(&names(), action).await.unwrap()
    }

    // ============================================================
    // LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_register_requires_every_instance() {
        let c = cluster(&["a", "b", "c"], StrategyKind::SingleProcess);
        install_names(&c.manager);

        let outcome = apply(&c.manager, SchemaAction::RegisterIndex).await;

        match outcome {
            UpdateOutcome::Acknowledged { status, reports } => {
                assert_eq!(status, IndexStatus::Registered);
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].acked().len(), 3);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!c.manager.is_query_eligible(&names()).unwrap());
    }

    #[tokio::test]
    async fn test_enable_before_register_is_rejected() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);
        install_names(&c.manager);

        for action in [
            SchemaAction::EnableIndex,
            SchemaAction::Reindex,
            SchemaAction::DisableIndex,
        ] {
            let result = c.manager.update_index(&names(), action).await;
            assert!(
                matches!(result, Err(LifecycleError::NotRegistered { status: IndexStatus::Installed, .. })),
                "{} should need registration",
                action
            );
        }
        assert_eq!(
            c.manager.aggregate_status(&names()).unwrap(),
            IndexStatus::Installed
        );
    }

    #[tokio::test]
    async fn test_ack_timeout_names_index_key_and_status() {
        // ARRANGE
        let c = cluster(&["a", "b"], StrategyKind::SingleProcess);
        install_names(&c.manager);
        c.messenger
            .set_reachability(&InstanceId::named("b"), Reachability::Unreachable);

        // ACT
        let result = c
            .manager
            .update_index(&names(), SchemaAction::RegisterIndex)
            .await;

        // ASSERT: nothing written, the error says what to do
        match result {
            Err(LifecycleError::AcknowledgmentTimeout {
                index,
                key,
                status,
                unreachable,
                ..
            }) => {
                assert_eq!(index, names());
                assert_eq!(key, ConstituentKey::new("name"));
                assert_eq!(status, IndexStatus::Installed);
                assert_eq!(unreachable, vec![InstanceId::named("b")]);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(
            c.manager.aggregate_status(&names()).unwrap(),
            IndexStatus::Installed
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle_composite() {
        let c = cluster(&["a", "b"], StrategyKind::Distributed);
        install_names(&c.manager);

        apply(&c.manager, SchemaAction::RegisterIndex).await;
        let UpdateOutcome::Job(reindex) = apply(&c.manager, SchemaAction::Reindex).await else {
            panic!("reindex should launch a job");
        };
        assert_eq!(reindex.wait().await.unwrap().elements_processed, 4);
        assert!(matches!(
            apply(&c.manager, SchemaAction::EnableIndex).await,
            UpdateOutcome::Enabled
        ));
        assert!(c.manager.is_query_eligible(&names()).unwrap());

        let disabled = apply(&c.manager, SchemaAction::DisableIndex).await;
        assert!(matches!(
            disabled,
            UpdateOutcome::Acknowledged {
                status: IndexStatus::Disabled,
                ..
            }
        ));
        assert!(!c.manager.is_query_eligible(&names()).unwrap());

        let UpdateOutcome::Job(removal) = apply(&c.manager, SchemaAction::RemoveIndex).await else {
            panic!("composite removal should launch a job");
        };
        removal.wait().await.unwrap();

        assert_eq!(c.backend.entry_count(), 0);
        assert_eq!(
            c.manager.aggregate_status(&names()).unwrap(),
            IndexStatus::Removed
        );
    }

    #[tokio::test]
    async fn test_mixed_removal_needs_manual_cleanup() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);
        let search = IndexRef::global("search");
        c.manager
            .build_index(IndexDefinition::mixed(
                search.clone(),
                "search",
                ElementCategory::Vertex,
                &["name"],
            ))
            .unwrap();

        c.manager
            .update_index(&search, SchemaAction::RegisterIndex)
            .await
            .unwrap();
        let UpdateOutcome::Job(reindex) = c
            .manager
            .update_index(&search, SchemaAction::Reindex)
            .await
            .unwrap()
        else {
            panic!("reindex should launch a job");
        };
        reindex.wait().await.unwrap();
        c.manager
            .update_index(&search, SchemaAction::DisableIndex)
            .await
            .unwrap();

        let outcome = c
            .manager
            .update_index(&search, SchemaAction::RemoveIndex)
            .await
            .unwrap();

        match outcome {
            UpdateOutcome::Removed { cleanup } => {
                assert_eq!(cleanup.index, search);
                assert_eq!(cleanup.backend, "search");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(c.mixed.entry_count(), 4);
        assert_eq!(c.mixed.delete_calls(), 0);
        assert_eq!(
            c.manager.aggregate_status(&search).unwrap(),
            IndexStatus::Removed
        );
    }

    #[test]
    fn test_composite_never_reports_manual_cleanup() {
        // ARRANGE
        let cleanup_plan = |definition: IndexDefinition| TransitionPlan {
            definition,
            action: SchemaAction::RemoveIndex,
            work: RequiredWork::ManualBackendCleanup,
            transitions: vec![Transition {
                from: IndexStatus::Disabled,
                to: IndexStatus::Removed,
                work: RequiredWork::ManualBackendCleanup,
            }],
        };
        let composite = IndexDefinition::composite(names(), ElementCategory::Vertex, &["name"]);
        let mixed = IndexDefinition::mixed(
            IndexRef::global("search"),
            "search",
            ElementCategory::Vertex,
            &["name"],
        );

        // ACT
        let refused = cleanup_backend(&cleanup_plan(composite));
        let backend = cleanup_backend(&cleanup_plan(mixed));

        // ASSERT
        match refused {
            Err(LifecycleError::InvalidTransition {
                index,
                key,
                status,
                action,
            }) => {
                assert_eq!(index, names());
                assert_eq!(key, ConstituentKey::new("name"));
                assert_eq!(status, IndexStatus::Disabled);
                assert_eq!(action, SchemaAction::RemoveIndex);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(backend.unwrap(), "search");
    }

    // ============================================================
    // QUERY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_multi_key_index_eligible_only_when_all_enabled() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);
        let index = IndexRef::global("by_name_age");
        c.manager
            .build_index(IndexDefinition::composite(
                index.clone(),
                ElementCategory::Vertex,
                &["name", "age"],
            ))
            .unwrap();
        c.manager
            .update_index(&index, SchemaAction::RegisterIndex)
            .await
            .unwrap();

        // One key moved ahead out of band
        let store = c.manager.store();
        let age = ConstituentKey::new("age");
        let version = store.get(&index, &age).unwrap().version;
        store
            .set(&index, &age, version, IndexStatus::Enabled)
            .unwrap();

        assert_eq!(
            c.manager.aggregate_status(&index).unwrap(),
            IndexStatus::Registered
        );
        assert!(!c.manager.is_query_eligible(&index).unwrap());

        c.manager
            .update_index(&index, SchemaAction::EnableIndex)
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn test_await_status_reached_and_timed_out() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);
        install_names(&c.manager);

        let waiting = c
            .manager
            .await_status(
                &names(),
                &[IndexStatus::Registered, IndexStatus::Enabled],
                Duration::from_millis(5),
                Duration::from_millis(30),
            )
            .await
            .unwrap();
        assert!(!waiting.reached);
        assert_eq!(waiting.statuses[&ConstituentKey::new("name")], IndexStatus::Installed);

        let manager = c.manager.clone();
        let register = tokio::spawn(async move {
            manager
                .update_index(&names(), SchemaAction::RegisterIndex)
                .await
        });

        let reached = c
            .manager
            .await_status(
                &names(),
                &[IndexStatus::Registered],
                Duration::from_millis(5),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(reached.reached);
        register.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);

        let result = c
            .manager
            .update_index(&names(), SchemaAction::RegisterIndex)
            .await;

        assert!(matches!(result, Err(LifecycleError::UnknownIndex(_))));
        assert!(c.manager.index_status(&names()).is_err());
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_handlers_drive_lifecycle() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);
        let manager = Extension(c.manager.clone());

        let built = handle_build_index(
            manager.clone(),
            Json(BuildIndexRequest {
                definition: IndexDefinition::composite(names(), ElementCategory::Vertex, &["name"]),
            }),
        )
        .await
        .unwrap();
        assert_eq!(built.0, StatusCode::CREATED);

        for action in [SchemaAction::RegisterIndex, SchemaAction::Reindex] {
            let (code, Json(response)) = handle_update_index(
                manager.clone(),
                Path("names".to_string()),
                Json(UpdateIndexRequest {
                    action,
                    relation_type: None,
                    wait: true,
                }),
            )
            .await
            .unwrap();
            assert_eq!(code, StatusCode::OK);
            assert_eq!(response.status, Some(IndexStatus::Registered));
        }
        assert_eq!(c.backend.entry_count(), 4);

        let (_, Json(view)) = handle_index_status(
            manager.clone(),
            Path("names".to_string()),
            Query(IndexQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(view.aggregate, IndexStatus::Registered);
        assert!(!view.query_eligible);

        let (code, Json(report)) = handle_await_status(
            manager.clone(),
            Path("names".to_string()),
            Query(AwaitQuery {
                relation_type: None,
                targets: "registered,enabled".to_string(),
                poll_ms: Some(5),
                timeout_ms: Some(50),
            }),
        )
        .await
        .unwrap();
        assert_eq!(code, StatusCode::OK);
        assert!(report.reached);
    }

    #[tokio::test]
    async fn test_handlers_map_errors() {
        let c = cluster(&["a"], StrategyKind::SingleProcess);
        let manager = Extension(c.manager.clone());
        install_names(&c.manager);

        let (code, Json(error)) = handle_update_index(
            manager.clone(),
            Path("names".to_string()),
            Json(UpdateIndexRequest {
                action: SchemaAction::EnableIndex,
                relation_type: None,
                wait: false,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(error.error.contains("REGISTER_INDEX"));

        let (code, _) = handle_evict_instance(
            manager.clone(),
            Path("ghost".to_string()),
            Json(EvictRequest {
                reason: "test".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::NOT_FOUND);

        assert_eq!(
            status_code(&LifecycleError::UnknownBackend("x".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
