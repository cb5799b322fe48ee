//! Drives the embedding worker through its message protocol directly.

mod util;

use std::sync::Arc;
use std::time::Duration;

use sift_search::search::embedder::HashModelProvider;
use sift_search::search::vector_cache::EmbeddingVector;
use sift_search::worker::{ChannelEvents, EmbeddingChannel, ErrorCode, RequestId, Response, WorkerState};
use util::TestTracing;

async fn next(events: &mut ChannelEvents) -> (RequestId, Response) {
    let frame = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("worker answered within 5s")
        .expect("worker still running")
        .expect("frame decodes");
    (frame.request_id, frame.payload)
}

fn axis_vectors() -> Vec<EmbeddingVector> {
    vec![
        EmbeddingVector::new(10, vec![1.0, 0.0, 0.0, 0.0]),
        EmbeddingVector::new(20, vec![0.0, 1.0, 0.0, 0.0]),
        EmbeddingVector::new(30, vec![0.0, 0.0, 1.0, 0.0]),
    ]
}

#[tokio::test]
async fn test_full_worker_session() {
    let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));

    let cache_id = channel.cache_vectors(axis_vectors()).unwrap();
    assert_eq!(next(&mut events).await, (cache_id, Response::VectorsCached { count: 3 }));

    // Searching before init is refused, not queued, by the worker.
    let early = channel.next_request_id();
    channel.search(early, "anything", 2).unwrap();
    match next(&mut events).await {
        (id, Response::Error(err)) => {
            assert_eq!(id, early);
            assert_eq!(err.code, ErrorCode::NotReady);
            assert!(err.retryable);
        }
        other => panic!("expected NotReady, got {other:?}"),
    }

    let init_id = channel.init().unwrap();
    assert_eq!(
        next(&mut events).await,
        (
            init_id,
            Response::Ready {
                model_id: "fnv1a-4".into(),
                dimension: 4,
            }
        )
    );

    let search_id = channel.next_request_id();
    channel.search(search_id, "alpha", 2).unwrap();
    match next(&mut events).await {
        (id, Response::SemanticResults { results }) => {
            assert_eq!(id, search_id);
            assert!(results.len() <= 2);
            assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        }
        other => panic!("expected results, got {other:?}"),
    }

    let status_id = channel.status().unwrap();
    match next(&mut events).await {
        (id, Response::Status(status)) => {
            assert_eq!(id, status_id);
            assert_eq!(status.state, WorkerState::Ready);
            assert_eq!(status.model_id.as_deref(), Some("fnv1a-4"));
            assert_eq!(status.cached_vectors, 3);
            assert_eq!(status.dimension, Some(4));
            assert_eq!(status.total_requests, 5);
        }
        other => panic!("expected status, got {other:?}"),
    }

    let shutdown_id = channel.shutdown().unwrap();
    assert_eq!(next(&mut events).await, (shutdown_id, Response::Shutdown));
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_malformed_batch_keeps_previous_cache() {
    let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));

    channel.cache_vectors(axis_vectors()).unwrap();
    next(&mut events).await;

    let bad = channel
        .cache_vectors(vec![
            EmbeddingVector::new(1, vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingVector::new(2, vec![1.0, 0.0]),
        ])
        .unwrap();
    match next(&mut events).await {
        (id, Response::Error(err)) => {
            assert_eq!(id, bad);
            assert_eq!(err.code, ErrorCode::MalformedVectors);
            assert!(!err.retryable);
        }
        other => panic!("expected MalformedVectors, got {other:?}"),
    }

    channel.status().unwrap();
    match next(&mut events).await {
        (_, Response::Status(status)) => assert_eq!(status.cached_vectors, 3),
        other => panic!("expected status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_init_reannounces_ready() {
    let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(8)));

    channel.init().unwrap();
    assert!(matches!(next(&mut events).await.1, Response::Ready { .. }));

    let again = channel.init().unwrap();
    match next(&mut events).await {
        (id, Response::Ready { model_id, dimension }) => {
            assert_eq!(id, again);
            assert_eq!(model_id, "fnv1a-8");
            assert_eq!(dimension, 8);
        }
        other => panic!("expected Ready, got {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_logs_lifecycle() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));
    channel.init().unwrap();
    next(&mut events).await;
    channel.shutdown().unwrap();
    next(&mut events).await;

    tracing.assert_contains("embedding model ready");
    tracing.assert_contains("worker shutdown requested");
}

#[tokio::test]
async fn test_dropping_channel_stops_worker() {
    let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));
    drop(channel);
    let ended = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("worker exits once every sender is gone");
    assert!(ended.is_none());
}
