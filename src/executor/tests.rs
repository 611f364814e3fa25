//! Executor Module Tests
//!
//! This module contains unit and integration tests for the scan job engine.
//!
//! ## Test Scopes
//! - **Collaborators**: Entry derivation, lazy range scans and the in-memory backend.
//! - **Queue**: Claiming, lease expiry, retry accounting and stale reports.
//! - **Tracker**: Progress counters, cancellation, acknowledgment and retention.
//! - **Jobs**: Reindex, retries, failure and removal under both execution strategies.

#[cfg(test)]
mod tests {
    use crate::error::LifecycleError;
    use crate::executor::backend::{
        InMemoryIndexBackend, IndexBackend, IndexBackends, derive_entries,
    };
    use crate::executor::coordinator::{JobCoordinator, ScanResources};
    use crate::executor::elements::{Element, ElementSource, InMemoryGraph};
    use crate::executor::partitioner::{RangePartitioner, StoragePartitioner};
    use crate::executor::queue::{CompletionOutcome, PartitionQueue};
    use crate::executor::strategy::{DistributedExecutor, JobExecutor, LocalExecutor};
    use crate::executor::tracker::JobStatusTracker;
    use crate::executor::types::{JobAction, JobId, JobStatus, KeyRange, ScanJob};
    use crate::executor::worker::PartitionWorker;
    use crate::schema::store::{InMemorySchemaStore, SchemaStatusStore};
    use crate::schema::types::{
        ConstituentKey, ElementCategory, ElementSpace, IndexDefinition, IndexRef, IndexStatus,
    };
    use crate::schema::writer::StatusWriter;
    use std::sync::Arc;
    use std::time::Duration;

    fn names_index() -> IndexDefinition {
        IndexDefinition::composite(IndexRef::global("names"), ElementCategory::Vertex, &["name"])
    }

    fn search_index() -> IndexDefinition {
        IndexDefinition::mixed(
            IndexRef::global("search"),
            "search",
            ElementCategory::Vertex,
            &["name"],
        )
    }

    /// Ten vertices, four of them named, plus a named edge outside the vertex space.
    fn people() -> InMemoryGraph {
        let mut elements: Vec<Element> = (0..10)
            .map(|id| {
                let person = Element::vertex(id, "person").with("age", 20 + id);
                if id % 2 == 0 && id < 8 {
                    person.with("name", format!("person-{}", id))
                } else {
                    person
                }
            })
            .collect();
        elements.push(Element::edge(10, "knows").with("name", "edge"));
        elements.into_iter().collect()
    }

    fn set_status(store: &InMemorySchemaStore, index: &IndexRef, status: IndexStatus) {
        for (key, current) in store.statuses(index).unwrap() {
            store.set(index, &key, current.version, status).unwrap();
        }
    }

    struct Fixture {
        store: Arc<InMemorySchemaStore>,
        backend: Arc<InMemoryIndexBackend>,
        mixed: Arc<InMemoryIndexBackend>,
        jobs: Arc<JobCoordinator>,
    }

    fn fixture(executor: Arc<dyn JobExecutor>, retry_limit: u32) -> Fixture {
        let store = Arc::new(InMemorySchemaStore::new());
        store.define(names_index()).unwrap();
        store.define(search_index()).unwrap();

        let backend = InMemoryIndexBackend::new();
        let mixed = InMemoryIndexBackend::new();
        let backends = IndexBackends::new(backend.clone());
        backends.register_mixed("search", mixed.clone());

        let dyn_store: Arc<dyn SchemaStatusStore> = store.clone();
        let writer = Arc::new(StatusWriter::new(dyn_store, 5));
        let resources = ScanResources {
            partitioner: Arc::new(RangePartitioner::with_bound(4, 16)),
            source: Arc::new(people()),
            backends,
        };

        let jobs = JobCoordinator::new(
            writer,
            resources,
            executor,
            JobStatusTracker::new(Duration::from_secs(60)),
            retry_limit,
            Duration::from_secs(5),
        );

        Fixture {
            store,
            backend,
            mixed,
            jobs,
        }
    }

    fn strategies() -> Vec<Arc<dyn JobExecutor>> {
        let local: Arc<dyn JobExecutor> = LocalExecutor::new();
        let distributed: Arc<dyn JobExecutor> = DistributedExecutor::new(3);
        vec![local, distributed]
    }

    // ============================================================
    // TEST 1: Entry derivation and element scans
    // ============================================================

    #[test]
    fn test_composite_entry_needs_every_key() {
        let index = IndexDefinition::composite(
            IndexRef::global("by_name_age"),
            ElementCategory::Vertex,
            &["name", "age"],
        );

        let full = Element::vertex(1, "person").with("name", "ada").with("age", 36);
        let partial = Element::vertex(2, "person").with("name", "bob");

        let entries = derive_entries(&index, &full);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "by_name_age/name=\"ada\"/age=36");
        assert_eq!(entries[0].1["age"], 36);
        assert!(derive_entries(&index, &partial).is_empty());
    }

    #[test]
    fn test_mixed_entries_per_present_key() {
        let index = IndexDefinition::mixed(
            IndexRef::global("text"),
            "search",
            ElementCategory::Vertex,
            &["name", "bio"],
        );

        let element = Element::vertex(1, "person").with("bio", "likes graphs");

        let entries = derive_entries(&index, &element);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "text/bio");
    }

    #[test]
    fn test_scan_filters_space_and_range() {
        let graph = people();
        let range = KeyRange {
            partition: 0,
            start: 4,
            end: Some(16),
        };

        let vertices: Vec<u64> = graph
            .scan(&ElementSpace::Vertices, &range)
            .unwrap()
            .map(|e| e.id)
            .collect();
        let knows: Vec<u64> = graph
            .scan(&ElementSpace::EdgesLabeled("knows".into()), &range)
            .unwrap()
            .map(|e| e.id)
            .collect();
        let other: Vec<u64> = graph
            .scan(&ElementSpace::EdgesLabeled("likes".into()), &range)
            .unwrap()
            .map(|e| e.id)
            .collect();

        assert_eq!(vertices, vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(knows, vec![10]);
        assert!(other.is_empty());
    }

    #[test]
    fn test_scan_spans_multiple_batches() {
        let graph: InMemoryGraph = (0..1_000)
            .map(|id| {
                if id % 3 == 0 {
                    Element::edge(id, "knows")
                } else {
                    Element::vertex(id, "person")
                }
            })
            .collect();
        let range = KeyRange {
            partition: 0,
            start: 0,
            end: Some(1_000),
        };

        let count = graph.scan(&ElementSpace::Vertices, &range).unwrap().count();
        let restarted = graph.scan(&ElementSpace::Vertices, &range).unwrap().count();

        assert_eq!(count, 666);
        assert_eq!(restarted, count);
    }

    #[test]
    fn test_full_plan_scans_top_of_id_space() {
        // ARRANGE
        let graph: InMemoryGraph = [0, u64::MAX - 1, u64::MAX]
            .into_iter()
            .map(|id| Element::vertex(id, "person"))
            .collect();
        let partitioner = RangePartitioner::new(4);

        // ACT
        let mut ids: Vec<u64> = partitioner
            .partition_plan(&ElementSpace::Vertices)
            .iter()
            .flat_map(|range| {
                graph
                    .scan(&ElementSpace::Vertices, range)
                    .unwrap()
                    .map(|e| e.id)
                    .collect::<Vec<_>>()
            })
            .collect();
        ids.sort_unstable();

        // ASSERT
        assert_eq!(ids, vec![0, u64::MAX - 1, u64::MAX]);
    }

    #[test]
    fn test_worker_reindex_is_idempotent() {
        // ARRANGE
        let backend = InMemoryIndexBackend::new();
        let worker = PartitionWorker::new(Arc::new(people()), backend.clone());
        let job = ScanJob {
            job_id: JobId::new(),
            definition: names_index(),
            action: JobAction::Reindex,
        };
        let range = KeyRange {
            partition: 0,
            start: 0,
            end: Some(16),
        };

        // ACT
        let first = worker.process(&job, &range).unwrap();
        let after_first = backend.entries_for(&names_index().index);
        let second = worker.process(&job, &range).unwrap();

        // ASSERT
        assert_eq!(first, 4);
        assert_eq!(second, 4);
        assert_eq!(backend.entries_for(&names_index().index), after_first);
        assert_eq!(backend.entry_count(), 4);
        assert_eq!(backend.upsert_calls(), 8);
    }

    #[test]
    fn test_backend_delete_if_present() {
        let backend = InMemoryIndexBackend::new();
        let index = IndexRef::global("names");
        backend
            .upsert(&index, 1, "names/name=\"a\"", &serde_json::json!({"name": "a"}))
            .unwrap();

        assert!(backend.delete(&index, 1, "names/name=\"a\"").unwrap());
        assert!(!backend.delete(&index, 1, "names/name=\"a\"").unwrap());
        assert_eq!(backend.entry_count(), 0);
    }

    #[test]
    fn test_unknown_mixed_backend() {
        let backends = IndexBackends::new(InMemoryIndexBackend::new());

        let result = backends.resolve(&search_index().kind);

        assert!(matches!(result, Err(LifecycleError::UnknownBackend(name)) if name == "search"));
    }

    // ============================================================
    // TEST 2: PartitionQueue
    // ============================================================

    fn plan(n: u32) -> Vec<KeyRange> {
        (0..n)
            .map(|partition| KeyRange {
                partition,
                start: partition as u64 * 10,
                end: Some(partition as u64 * 10 + 10),
            })
            .collect()
    }

    #[test]
    fn test_queue_claims_each_partition_once() {
        let queue = PartitionQueue::new(&plan(3), 2, Duration::from_secs(30));

        let a = queue.claim_next(0).unwrap();
        let b = queue.claim_next(1).unwrap();
        let c = queue.claim_next(2).unwrap();

        assert_eq!((a.partition, b.partition, c.partition), (0, 1, 2));
        assert!(queue.claim_next(3).is_none());
        assert!(!queue.is_finished());

        for (worker, range) in [a, b, c].iter().enumerate() {
            assert_eq!(
                queue.complete(range.partition, worker, Ok(5)),
                CompletionOutcome::Done
            );
        }
        assert!(queue.is_finished());
        assert_eq!(queue.total_processed(), 15);
    }

    #[test]
    fn test_queue_retries_then_exhausts() {
        let queue = PartitionQueue::new(&plan(1), 2, Duration::from_secs(30));

        queue.claim_next(0).unwrap();
        let first = queue.complete(0, 0, Err("boom".into()));
        assert_eq!(first, CompletionOutcome::Retry { attempts: 1 });

        queue.claim_next(0).unwrap();
        let second = queue.complete(0, 0, Err("boom again".into()));

        assert_eq!(
            second,
            CompletionOutcome::Exhausted {
                attempts: 2,
                error: "boom again".into()
            }
        );
        assert!(queue.has_failed());
        assert!(queue.is_finished());
        assert_eq!(queue.first_failure(), Some((0, 2, "boom again".into())));
    }

    #[tokio::test]
    async fn test_queue_reclaims_expired_lease() {
        // ARRANGE: worker 0 claims and then stops renewing
        let queue = PartitionQueue::new(&plan(1), 3, Duration::ZERO);
        queue.claim_next(0).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // ACT
        let reclaimed = queue.claim_next(1);

        // ASSERT
        assert_eq!(reclaimed.map(|r| r.partition), Some(0));
        assert_eq!(queue.entry(0).unwrap().attempts, 2);
        assert!(queue.renew_lease(0, 0).is_err());
        assert_eq!(queue.complete(0, 0, Ok(1)), CompletionOutcome::Stale);
        assert_eq!(queue.complete(0, 1, Ok(1)), CompletionOutcome::Done);
    }

    // ============================================================
    // TEST 3: JobStatusTracker
    // ============================================================

    #[tokio::test]
    async fn test_tracker_progress_counts_partitions_once() {
        let tracker = JobStatusTracker::new(Duration::from_secs(60));
        let handle = tracker.create(IndexRef::global("names"), JobAction::Reindex, "test", 2);

        tracker.mark_running(handle.id());
        tracker.record_partition(handle.id(), 0, 3);
        tracker.record_partition(handle.id(), 0, 3);
        let running = handle.poll().unwrap();

        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.partitions_done, 1);
        assert_eq!(running.elements_processed, 3);

        tracker.record_partition(handle.id(), 1, 1);
        assert!(tracker.succeed(handle.id()));
        let done = handle.wait().await.unwrap();

        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.elements_processed, 4);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_tracker_wait_resolves_when_job_fails() {
        let tracker = JobStatusTracker::new(Duration::from_secs(60));
        let handle = tracker.create(IndexRef::global("names"), JobAction::Reindex, "test", 1);

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.fail(handle.id(), "disk on fire");

        let result = waiter.await.unwrap();
        assert!(matches!(
            result,
            Err(LifecycleError::JobFailed { detail, .. }) if detail == "disk on fire"
        ));
        assert!(!tracker.succeed(handle.id()));
    }

    #[test]
    fn test_tracker_acknowledge_and_sweep() {
        let tracker = JobStatusTracker::new(Duration::ZERO);
        let running = tracker.create(IndexRef::global("a"), JobAction::Reindex, "test", 1);
        let finished = tracker.create(IndexRef::global("b"), JobAction::Reindex, "test", 1);
        tracker.succeed(finished.id());

        assert_eq!(
            tracker.acknowledge(running.id()),
            Err(LifecycleError::JobNotFinished(running.id().clone()))
        );
        assert_eq!(tracker.sweep_expired(), 1);
        assert!(tracker.poll(running.id()).is_ok());
        assert_eq!(
            tracker.poll(finished.id()),
            Err(LifecycleError::UnknownJob(finished.id().clone()))
        );

        tracker.fail(running.id(), "gave up");
        assert!(tracker.acknowledge(running.id()).is_ok());
        assert!(tracker.list().is_empty());
    }

    // ============================================================
    // TEST 4: Jobs under both strategies
    // ============================================================

    #[tokio::test]
    async fn test_reindex_populates_backend() {
        for executor in strategies() {
            let fx = fixture(executor, 2);
            set_status(&fx.store, &names_index().index, IndexStatus::Registered);

            let handle = fx
                .jobs
                .launch(&names_index().index, JobAction::Reindex)
                .unwrap();
            let record = handle.wait().await.unwrap();

            assert_eq!(record.elements_processed, 4, "strategy {}", record.strategy);
            assert_eq!(record.partitions_done, 4);
            assert_eq!(fx.backend.entry_count(), 4);
            assert_eq!(fx.mixed.entry_count(), 0);
            let status = fx
                .store
                .get(&names_index().index, &ConstituentKey::new("name"))
                .unwrap();
            assert_eq!(status.status, IndexStatus::Registered);
        }
    }

    #[tokio::test]
    async fn test_reindex_before_registration_is_rejected() {
        let fx = fixture(LocalExecutor::new(), 2);

        let result = fx.jobs.launch(&names_index().index, JobAction::Reindex);

        assert!(matches!(result, Err(LifecycleError::NotRegistered { .. })));
        assert!(fx.jobs.tracker().list().is_empty());
    }

    #[tokio::test]
    async fn test_failed_partition_is_retried_to_success() {
        for executor in strategies() {
            // ARRANGE: element 2 fails once
            let fx = fixture(executor, 2);
            set_status(&fx.store, &names_index().index, IndexStatus::Enabled);
            fx.backend.fail_element(2, 1);

            // ACT
            let record = fx
                .jobs
                .launch(&names_index().index, JobAction::Reindex)
                .unwrap()
                .wait()
                .await
                .unwrap();

            // ASSERT: no duplicate or missing entries
            assert_eq!(record.elements_processed, 4);
            assert_eq!(fx.backend.entry_count(), 4);
        }
    }

    #[tokio::test]
    async fn test_exhausted_partition_fails_job_and_keeps_status() {
        for executor in strategies() {
            let fx = fixture(executor, 1);
            let index = names_index().index;
            set_status(&fx.store, &index, IndexStatus::Registered);
            fx.backend.fail_element(2, 10);

            let result = fx
                .jobs
                .launch(&index, JobAction::Reindex)
                .unwrap()
                .wait()
                .await;

            assert!(matches!(
                result,
                Err(LifecycleError::JobFailed { ref detail, .. }) if detail.contains("partition 0")
            ));
            let status = fx.store.get(&index, &ConstituentKey::new("name")).unwrap();
            assert_eq!(status.status, IndexStatus::Registered);

            // Retrying after the fault clears reaches the same state as a clean run
            fx.backend.fail_element(2, 0);
            fx.jobs
                .launch(&index, JobAction::Reindex)
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(fx.backend.entry_count(), 4);
        }
    }

    #[tokio::test]
    async fn test_removal_job_deletes_entries_and_removes_index() {
        for executor in strategies() {
            let fx = fixture(executor, 2);
            let index = names_index().index;
            set_status(&fx.store, &index, IndexStatus::Enabled);
            fx.jobs
                .launch(&index, JobAction::Reindex)
                .unwrap()
                .wait()
                .await
                .unwrap();
            set_status(&fx.store, &index, IndexStatus::Disabled);

            let record = fx
                .jobs
                .launch(&index, JobAction::RemoveIndex)
                .unwrap()
                .wait()
                .await
                .unwrap();

            assert_eq!(record.elements_processed, 4);
            assert_eq!(fx.backend.entry_count(), 0);
            let status = fx.store.get(&index, &ConstituentKey::new("name")).unwrap();
            assert_eq!(status.status, IndexStatus::Removed);
            assert!(matches!(
                fx.jobs.launch(&index, JobAction::RemoveIndex),
                Err(LifecycleError::TerminalState { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_mixed_index_removal_is_not_a_job() {
        let fx = fixture(LocalExecutor::new(), 2);
        set_status(&fx.store, &search_index().index, IndexStatus::Disabled);

        let result = fx.jobs.launch(&search_index().index, JobAction::RemoveIndex);

        assert!(matches!(result, Err(LifecycleError::InvalidTransition { .. })));
        assert_eq!(fx.mixed.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_job_stops_at_partition_boundary() {
        // ARRANGE
        let fx = fixture(LocalExecutor::new(), 2);
        set_status(&fx.store, &names_index().index, IndexStatus::Registered);
        let handle = fx
            .jobs
            .launch(&names_index().index, JobAction::Reindex)
            .unwrap();

        // ACT: the driver has not been scheduled yet on this runtime
        assert!(handle.cancel().unwrap());
        let result = handle.wait().await;

        // ASSERT
        assert_eq!(result, Err(LifecycleError::JobCancelled(handle.id().clone())));
        let record = handle.poll().unwrap();
        assert!(record.cancelled);
        assert_eq!(fx.backend.upsert_calls(), 0);
        assert!(!handle.cancel().unwrap());
    }
}
