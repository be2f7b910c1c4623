//! Status history and connection pool behaviour against in-memory DuckDB
#![cfg(feature = "duckdb-backend")]

use pdbx_db_loader::{
    ConnectionManager, DatabaseError, DuckDbFactory, LoaderConfig, RunStatus, StatusError,
    StatusTracker,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn manager_with(config: LoaderConfig) -> ConnectionManager {
    ConnectionManager::new(Arc::new(DuckDbFactory::in_memory().unwrap()), Arc::new(config))
        .unwrap()
}

fn tracker() -> StatusTracker {
    StatusTracker::new(manager_with(LoaderConfig::in_memory()))
}

#[tokio::test]
async fn test_status_is_monotonic() {
    let tracker = tracker();
    tracker.record("run", RunStatus::Submitted, None).await.unwrap();
    tracker.record("run", RunStatus::Running, None).await.unwrap();

    for backwards in [RunStatus::Submitted, RunStatus::Running] {
        let err = tracker.record("run", backwards, None).await.unwrap_err();
        assert!(matches!(err, StatusError::InvalidTransition { .. }), "{}", err);
    }

    tracker
        .record("run", RunStatus::Partial, Some("2 of 3 batches"))
        .await
        .unwrap();
    for after_terminal in [RunStatus::Completed, RunStatus::Failed, RunStatus::Running] {
        assert!(tracker.record("run", after_terminal, None).await.is_err());
    }

    let history = tracker.history("run").await.unwrap();
    let ordinals: Vec<i64> = history.iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert!(history.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    assert_eq!(history[2].detail.as_deref(), Some("2 of 3 batches"));
}

#[tokio::test]
async fn test_runs_have_separate_histories() {
    let tracker = tracker();
    tracker.record("a", RunStatus::Submitted, None).await.unwrap();
    tracker.record("b", RunStatus::Submitted, None).await.unwrap();
    tracker.record("a", RunStatus::Completed, None).await.unwrap();

    assert_eq!(tracker.latest("a").await.unwrap().status, RunStatus::Completed);
    assert_eq!(tracker.latest("b").await.unwrap().status, RunStatus::Submitted);
    assert_eq!(tracker.latest("b").await.unwrap().ordinal, 1);
    assert!(matches!(
        tracker.latest("c").await,
        Err(StatusError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_appends_to_different_runs() {
    let tracker = tracker();
    tracker.bootstrap().await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..4 {
        let tracker = tracker.clone();
        tasks.spawn(async move {
            let run_id = format!("run-{}", n);
            tracker.record(&run_id, RunStatus::Submitted, None).await?;
            tracker.record(&run_id, RunStatus::Running, None).await?;
            tracker.record(&run_id, RunStatus::Completed, None).await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    for n in 0..4 {
        assert_eq!(tracker.history(&format!("run-{}", n)).await.unwrap().len(), 3);
    }
}

#[tokio::test]
async fn test_acquire_times_out_when_pool_is_exhausted() {
    let mut config = LoaderConfig::in_memory();
    config.database.pool_size = 1;
    config.database.acquire_timeout_ms = 100;
    let manager = manager_with(config);

    let held = manager.acquire().await.unwrap();
    let started = Instant::now();
    let Err(err) = manager.acquire().await else {
        panic!("second acquire should time out while the only connection is held");
    };
    assert!(matches!(err, DatabaseError::ConnectionUnavailable(_)), "{}", err);
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert_eq!(manager.status().size, 1);

    manager.release(held);
    let again = manager.acquire().await.unwrap();
    drop(again);
    assert_eq!(manager.status().available, 1);
}
