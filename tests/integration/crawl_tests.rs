//! Integration tests for the crawler
//!
//! These tests drive complete crawls over small backlogs with closure
//! processors and check what ends up in storage, in the backlog and in the
//! returned error.

use harvester::backlog::{Backlog, BacklogError, SelectionStrategy};
use harvester::config::parse_config;
use harvester::crawler::{crawl, Crawler, FixableError, Output, ProcessError, Step};
use harvester::policy::ErrorPolicy;
use harvester::progress::Progress;
use harvester::storage::{InMemoryStorage, SqliteStorage, Storage};
use harvester::HarvestError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

type MemoryStorage = Arc<Mutex<InMemoryStorage<u32, u32>>>;

fn memory_storage() -> MemoryStorage {
    Arc::new(Mutex::new(InMemoryStorage::new()))
}

fn backlog_with(keys: impl IntoIterator<Item = u32>) -> Arc<Backlog<u32>> {
    let backlog = Arc::new(Backlog::default());
    backlog.add_multiple(keys);
    backlog
}

fn stored_keys(storage: &MemoryStorage) -> Vec<u32> {
    let mut keys = storage.lock().unwrap().keys().unwrap();
    keys.sort_unstable();
    keys
}

async fn echo(key: u32) -> Result<Output<u32>, ProcessError> {
    Ok(Output::One(key))
}

async fn always_fail(_key: u32) -> Result<Output<u32>, ProcessError> {
    Err(ProcessError::Failed(anyhow::anyhow!("upstream unavailable")))
}

#[derive(Default)]
struct RecordingProgress {
    total: AtomicUsize,
    done: AtomicUsize,
}

impl Progress for RecordingProgress {
    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn advance(&self, delta: usize) {
        self.done.fetch_add(delta, Ordering::SeqCst);
    }
}

#[test]
fn test_backlog_properties() {
    let backlog: Backlog<u32> = Backlog::new(SelectionStrategy::Fifo, 2);

    backlog.add(1);
    backlog.add(1);
    backlog.add_multiple([2, 3, 1]);
    assert_eq!(backlog.total(), 3);
    assert_eq!(backlog.len(), 3);

    assert_eq!(backlog.next().unwrap(), 1);
    assert_eq!(backlog.next().unwrap(), 2);
    assert_eq!(backlog.next().unwrap(), 3);
    assert!(matches!(backlog.next(), Err(BacklogError::Empty)));

    // consumed keys can still be re-added
    backlog.re_add(1).unwrap();
    backlog.re_add(1).unwrap();
    assert!(matches!(
        backlog.re_add(1),
        Err(BacklogError::ReAddLimitReached { limit: 2, .. })
    ));
    assert_eq!(backlog.len(), 2);

    let random: Backlog<u32> = Backlog::new(SelectionStrategy::Random, 2);
    assert!(matches!(random.next(), Err(BacklogError::Empty)));
}

#[tokio::test]
async fn test_full_crawl_stores_every_key() {
    let backlog = backlog_with(1..=20);
    let storage = memory_storage();

    Crawler::builder(echo, Arc::clone(&backlog))
        .storage(Arc::clone(&storage))
        .concurrency(4)
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(stored_keys(&storage), (1..=20).collect::<Vec<_>>());
    assert!(backlog.is_empty());
    assert_eq!(backlog.total(), 20);
}

#[tokio::test]
async fn test_random_strategy_drains_backlog() {
    let backlog = Arc::new(Backlog::new(SelectionStrategy::Random, 2));
    backlog.add_multiple(1..=10u32);
    let storage = memory_storage();

    Crawler::builder(echo, Arc::clone(&backlog))
        .storage(Arc::clone(&storage))
        .concurrency(3)
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(stored_keys(&storage), (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_multiple_records_per_key() {
    let backlog = backlog_with([1, 2]);
    let storage = memory_storage();

    let crawler = Crawler::builder(
        |key: u32| async move { Ok::<_, ProcessError>(Output::Many(vec![key, key * 10])) },
        backlog,
    )
    .storage(Arc::clone(&storage))
    .build();

    assert_eq!(crawler.run_once().await.unwrap(), Step::Stored { records: 2 });
    crawler.run().await.unwrap();

    let storage = storage.lock().unwrap();
    assert_eq!(storage.values(Some(&1)).unwrap(), vec![1, 10]);
    assert_eq!(storage.count(&2).unwrap(), 2);
}

#[tokio::test]
async fn test_fail_after_three_aborts_on_third_failure() {
    let backlog = backlog_with([1, 2, 3]);

    let crawler = Crawler::builder(always_fail, backlog)
        .error_policy(ErrorPolicy::FailAfter)
        .build();

    let err = crawler.run().await.unwrap_err();

    assert!(matches!(err, HarvestError::Aborted { ref key, .. } if key == "3"));
    assert!(matches!(err.process_error(), Some(ProcessError::Failed(_))));
    assert_eq!(crawler.consecutive_failures(), 3);
}

#[tokio::test]
async fn test_ignore_policy_completes_run() {
    let backlog = backlog_with([1, 2, 3]);

    let crawler = Crawler::builder(always_fail, Arc::clone(&backlog))
        .error_policy(ErrorPolicy::Ignore)
        .build();

    crawler.run().await.unwrap();
    assert!(backlog.is_empty());
}

#[tokio::test]
async fn test_fail_policy_aborts_on_first_failure() {
    let backlog = backlog_with([1, 2, 3]);

    let crawler = Crawler::builder(always_fail, Arc::clone(&backlog)).build();

    let err = crawler.run().await.unwrap_err();
    assert!(matches!(err, HarvestError::Aborted { ref key, .. } if key == "1"));
    // nothing is dispatched after the abort
    assert_eq!(backlog.len(), 2);
}

#[tokio::test]
async fn test_abort_waits_for_in_flight_workers() {
    let backlog = backlog_with([1, 2, 3]);
    let storage = memory_storage();

    let crawler = Crawler::builder(
        |key: u32| async move {
            if key == 1 {
                return Err(ProcessError::Failed(anyhow::anyhow!("rejected")));
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(Output::One(key))
        },
        Arc::clone(&backlog),
    )
    .storage(Arc::clone(&storage))
    .concurrency(2)
    .build();

    let err = crawler.run().await.unwrap_err();

    assert!(matches!(err, HarvestError::Aborted { ref key, .. } if key == "1"));
    // key 2 was already running and finished before the error surfaced
    assert_eq!(stored_keys(&storage), vec![2]);
    assert_eq!(backlog.len(), 1);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let backlog = backlog_with([1, 2, 3, 4, 5]);

    let crawler = Crawler::builder(
        |key: u32| async move {
            if key == 3 {
                Ok(Output::One(key))
            } else {
                Err(ProcessError::Failed(anyhow::anyhow!("flaky key {key}")))
            }
        },
        backlog,
    )
    .error_policy(ErrorPolicy::FailAfter)
    .build();

    let mut steps = Vec::new();
    for _ in 0..5 {
        steps.push(crawler.run_once().await.unwrap());
    }

    assert_eq!(
        steps,
        vec![
            Step::Tolerated,
            Step::Tolerated,
            Step::Stored { records: 1 },
            Step::Tolerated,
            Step::Tolerated,
        ]
    );
    assert_eq!(crawler.consecutive_failures(), 2);
    assert_eq!(crawler.run_once().await.unwrap(), Step::Idle);
}

#[tokio::test]
async fn test_fixable_error_runs_handler_and_requeues() {
    let backlog = backlog_with([7]);
    let storage = memory_storage();
    let attempts = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));

    let processor = {
        let attempts = Arc::clone(&attempts);
        move |key: u32| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ProcessError::Fixable(
                        FixableError::new("x").with_data("retry_after", 1),
                    ))
                } else {
                    Ok(Output::One(key))
                }
            }
        }
    };

    let crawler = Crawler::builder(processor, Arc::clone(&backlog))
        .storage(Arc::clone(&storage))
        .handler("x", {
            let handled = Arc::clone(&handled);
            move |error: &FixableError| -> anyhow::Result<()> {
                assert_eq!(error.error_key(), "x");
                assert_eq!(error.get("retry_after"), Some(&serde_json::json!(1)));
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();

    crawler.run().await.unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(backlog.re_add_count(&7), 1);
    assert_eq!(stored_keys(&storage), vec![7]);
}

#[tokio::test]
async fn test_unhandled_fixable_error_is_escalated() {
    let backlog = backlog_with([1]);

    let crawler = Crawler::builder(
        |_key: u32| async move {
            Err::<Output<u32>, _>(ProcessError::Fixable(FixableError::new("captcha")))
        },
        backlog,
    )
    .build();

    let err = crawler.run().await.unwrap_err();
    assert!(matches!(
        err.process_error(),
        Some(ProcessError::Fixable(e)) if e.error_key() == "captcha"
    ));
}

#[tokio::test]
async fn test_panic_is_treated_as_assertion() {
    let backlog = backlog_with([1]);
    let storage = memory_storage();
    let attempts = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));

    let processor = {
        let attempts = Arc::clone(&attempts);
        move |key: u32| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    panic!("needs login");
                }
                Ok::<_, ProcessError>(Output::One(key))
            }
        }
    };

    let crawler = Crawler::builder(processor, backlog)
        .storage(Arc::clone(&storage))
        .handler("needs login", {
            let handled = Arc::clone(&handled);
            move |_error: &FixableError| -> anyhow::Result<()> {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();

    assert_eq!(crawler.run_once().await.unwrap(), Step::Requeued);
    assert_eq!(crawler.run_once().await.unwrap(), Step::Stored { records: 1 });
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(stored_keys(&storage), vec![1]);
}

#[tokio::test]
async fn test_re_add_limit_exhaustion_aborts() {
    let backlog = backlog_with([1]);
    let handled = Arc::new(AtomicUsize::new(0));

    let crawler = Crawler::builder(
        |_key: u32| async move {
            Err::<Output<u32>, _>(ProcessError::Fixable(FixableError::new("retry")))
        },
        Arc::clone(&backlog),
    )
    .handler("retry", {
        let handled = Arc::clone(&handled);
        move |_error: &FixableError| -> anyhow::Result<()> {
            handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .build();

    let err = crawler.run().await.unwrap_err();

    assert!(matches!(
        err.process_error(),
        Some(ProcessError::Backlog(BacklogError::ReAddLimitReached { limit: 2, .. }))
    ));
    assert_eq!(handled.load(Ordering::SeqCst), 3);
    assert_eq!(backlog.re_add_count(&1), 3);
}

#[tokio::test]
async fn test_failing_handler_is_fatal() {
    let backlog = backlog_with([1, 2]);

    let crawler = Crawler::builder(
        |_key: u32| async move {
            Err::<Output<u32>, _>(ProcessError::Fixable(FixableError::new("x")))
        },
        backlog,
    )
    .error_policy(ErrorPolicy::Ignore)
    .handler("x", |_error: &FixableError| -> anyhow::Result<()> {
        Err(anyhow::anyhow!("session could not be refreshed"))
    })
    .build();

    let err = crawler.run().await.unwrap_err();
    assert!(matches!(err, HarvestError::Handler { ref error_key, .. } if error_key == "x"));
}

#[tokio::test]
async fn test_ignore_key_skips_storage_and_policy() {
    let backlog = backlog_with([1, 2]);
    let storage = memory_storage();

    let crawler = Crawler::builder(
        |key: u32| async move {
            if key == 1 {
                Err(ProcessError::Ignore)
            } else {
                Ok(Output::One(key))
            }
        },
        backlog,
    )
    .storage(Arc::clone(&storage))
    .error_policy(ErrorPolicy::FailAfter)
    .build();

    assert_eq!(crawler.run_once().await.unwrap(), Step::Skipped);
    assert_eq!(crawler.consecutive_failures(), 0);

    crawler.run().await.unwrap();
    assert_eq!(stored_keys(&storage), vec![2]);
}

#[tokio::test]
async fn test_side_effect_enqueue_is_processed() {
    let backlog = backlog_with([1]);
    let storage = memory_storage();

    let processor = {
        let backlog = Arc::clone(&backlog);
        move |key: u32| {
            let backlog = Arc::clone(&backlog);
            async move {
                if key == 1 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    backlog.add(2);
                }
                Ok::<_, ProcessError>(Output::One(key))
            }
        }
    };

    Crawler::builder(processor, Arc::clone(&backlog))
        .storage(Arc::clone(&storage))
        .concurrency(2)
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(stored_keys(&storage), vec![1, 2]);
    assert_eq!(backlog.total(), 2);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let backlog = backlog_with(1..=12);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let processor = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        move |key: u32| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ProcessError>(Output::One(key))
            }
        }
    };

    Crawler::builder(processor, backlog)
        .concurrency(3)
        .build()
        .run()
        .await
        .unwrap();

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency was {peak}");
}

#[tokio::test]
async fn test_progress_is_reported_for_every_key() {
    let backlog = backlog_with([1, 2]);
    let progress = Arc::new(RecordingProgress::default());

    let processor = {
        let backlog = Arc::clone(&backlog);
        move |key: u32| {
            let backlog = Arc::clone(&backlog);
            async move {
                if key == 1 {
                    backlog.add(3);
                }
                Ok::<_, ProcessError>(Output::One(key))
            }
        }
    };

    Crawler::builder(processor, backlog)
        .progress(Arc::clone(&progress) as Arc<dyn Progress>)
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(progress.total.load(Ordering::SeqCst), 3);
    assert_eq!(progress.done.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_backlog_is_persisted_on_abort() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backlog.json");
    let backlog = backlog_with([1, 2, 3]);

    let err = Crawler::builder(always_fail, backlog)
        .persist_backlog_to(&path)
        .build()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::Aborted { .. }));

    let restored = Backlog::<u32>::from_path(&path, false).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.total(), 3);
    assert_eq!(restored.next().unwrap(), 2);
    assert_eq!(restored.next().unwrap(), 3);
}

#[tokio::test]
async fn test_run_once_persists_before_failing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backlog.json");
    let backlog = backlog_with([1, 2]);

    let crawler = Crawler::builder(always_fail, backlog)
        .persist_backlog_to(&path)
        .build();

    assert!(crawler.run_once().await.is_err());

    let restored = Backlog::<u32>::from_path(&path, false).unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored.total(), 2);
}

#[tokio::test]
async fn test_backlog_is_persisted_on_success() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backlog.json");
    let backlog = backlog_with([1, 2]);

    Crawler::builder(echo, backlog)
        .persist_backlog_to(&path)
        .build()
        .run()
        .await
        .unwrap();

    let restored = Backlog::<u32>::from_path(&path, false).unwrap();
    assert!(restored.is_empty());
    assert_eq!(restored.total(), 2);
}

#[tokio::test]
async fn test_resume_from_config_after_abort() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("backlog.json");
    let config = parse_config(&format!(
        "[backlog]\npersist-to = {:?}\nresume = true\n\n[crawler]\nconcurrency = 2\n",
        snapshot.display().to_string()
    ))
    .unwrap();

    // the first run stops at key 2
    let backlog = Arc::new(config.backlog.open_backlog::<u32>().unwrap());
    backlog.add_multiple([1, 2, 3, 4]);
    let first = Crawler::builder(
        |key: u32| async move {
            if key == 2 {
                Err(ProcessError::Failed(anyhow::anyhow!("connection reset")))
            } else {
                Ok(Output::One(key))
            }
        },
        backlog,
    )
    .from_config(&config)
    .concurrency(1)
    .build()
    .run()
    .await;
    assert!(first.is_err());

    let backlog = Arc::new(config.backlog.open_backlog::<u32>().unwrap());
    assert_eq!(backlog.len(), 2);

    let storage = memory_storage();
    Crawler::builder(echo, Arc::clone(&backlog))
        .from_config(&config)
        .storage(Arc::clone(&storage))
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(stored_keys(&storage), vec![3, 4]);
}

#[tokio::test]
async fn test_crawl_writes_to_configured_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("records.db");
    let config = parse_config(&format!(
        "[crawler]\nconcurrency = 2\nerror-policy = \"ignore\"\n\n[storage]\ndatabase-path = {:?}\n",
        db_path.display().to_string()
    ))
    .unwrap();

    let backlog = backlog_with([1, 2, 3]);
    crawl(
        |key: u32| async move {
            if key == 2 {
                Err(ProcessError::Failed(anyhow::anyhow!("bad key")))
            } else {
                Ok(Output::Many(vec![key, key * 100]))
            }
        },
        Arc::clone(&backlog),
        &config,
    )
    .await
    .unwrap();
    assert!(backlog.is_empty());

    let storage = SqliteStorage::<u32, u32>::new(&db_path).unwrap();
    let mut keys = storage.keys().unwrap();
    keys.sort_unstable();
    assert_eq!(keys, vec![1, 3]);
    assert_eq!(storage.values(Some(&3)).unwrap(), vec![3, 300]);
}

#[tokio::test]
async fn test_sqlite_storage_with_builder() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("records.db");

    let storage = Arc::new(Mutex::new(SqliteStorage::<u32, u32>::new(&db_path).unwrap()));
    Crawler::builder(echo, backlog_with([10, 20]))
        .storage(Arc::clone(&storage))
        .concurrency(2)
        .build()
        .run()
        .await
        .unwrap();

    let mut keys = storage.lock().unwrap().keys().unwrap();
    keys.sort_unstable();
    assert_eq!(keys, vec![10, 20]);
}
