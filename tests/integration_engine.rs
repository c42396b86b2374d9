mod support;

use embedding_engine::{ErrorKind, HandleId, HandleState, ModelFamily};
use rstest::rstest;
use std::sync::{mpsc, Arc, OnceLock, Weak};
use std::time::Duration;
use support::fixtures::*;
use support::helpers::FakeBackends;

#[rstest]
fn create_and_close_handle_lifecycle(harness: Harness) {
    let engine = &harness.engine;
    let id = engine.create_handle(ModelFamily::TextEmbedding, None).unwrap();
    assert_eq!(engine.handle_state(id).unwrap(), HandleState::Ready);

    let info = engine.handle_info(id).unwrap();
    assert_eq!(info.family, ModelFamily::TextEmbedding);
    assert_eq!(info.code, ModelFamily::TextEmbedding.default_code());
    assert_eq!(info.dimension, Some(384));
    assert_eq!(engine.live_handles().len(), 1);

    engine.close_handle(id).unwrap();
    assert_eq!(engine.handle_state(id).unwrap(), HandleState::Closed);
    assert!(engine.live_handles().is_empty());

    // Idempotent
    engine.close_handle(id).unwrap();
}

#[rstest]
fn use_after_close_is_handle_closed(harness: Harness) {
    let engine = &harness.engine;
    let id = engine.create_handle(ModelFamily::TextEmbedding, None).unwrap();
    engine.close_handle(id).unwrap();

    let err = engine.embed(id, &["hello"], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandleClosed);
    let err = engine.handle_info(id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandleClosed);
}

#[rstest]
fn never_issued_id_is_invalid_argument(harness: Harness) {
    let engine = &harness.engine;
    for raw in [0u64, 1, 42] {
        let id = HandleId::from(raw);
        let err = engine.embed(id, &["hello"], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "id {raw}");
        assert_eq!(engine.close_handle(id).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(engine.handle_state(id).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}

#[rstest]
fn unknown_code_creates_nothing(harness: Harness) {
    let engine = &harness.engine;
    let err = engine
        .create_handle(ModelFamily::TextEmbedding, Some("no-such/model"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelNotFound);
    assert!(engine.live_handles().is_empty());
    assert_eq!(harness.backends.calls(), 0);

    // Failed loads do not consume ids.
    let id = engine.create_handle(ModelFamily::TextEmbedding, None).unwrap();
    assert_eq!(id.get(), 1);
}

#[rstest]
fn alias_resolves_case_insensitively(harness: Harness) {
    let id = harness
        .engine
        .create_handle(ModelFamily::TextEmbedding, Some("bgesmallenv15"))
        .unwrap();
    let info = harness.engine.handle_info(id).unwrap();
    assert_eq!(info.code, "BAAI/bge-small-en-v1.5");
}

#[rstest]
fn ids_are_never_reused(harness: Harness) {
    let engine = &harness.engine;
    let first = engine.create_handle(ModelFamily::Rerank, None).unwrap();
    engine.close_handle(first).unwrap();
    let second = engine.create_handle(ModelFamily::Rerank, None).unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.handle_state(first).unwrap(), HandleState::Closed);
}

#[rstest]
#[case(ModelFamily::TextEmbedding, "rerank")]
#[case(ModelFamily::Rerank, "embed")]
#[case(ModelFamily::SparseTextEmbedding, "embed")]
#[case(ModelFamily::ImageEmbedding, "sparse")]
fn operation_on_wrong_family_is_invalid_argument(
    harness: Harness,
    #[case] family: ModelFamily,
    #[case] op: &str,
) {
    let engine = &harness.engine;
    let id = engine.create_handle(family, None).unwrap();
    let err = match op {
        "rerank" => engine.rerank(id, "q", &["d"], false, None).map(|_| ()),
        "embed" => engine.embed(id, &["x"], None).map(|_| ()),
        _ => engine.embed_sparse(id, &["x"], None).map(|_| ()),
    }
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(harness.backends.calls(), 0);
}

#[rstest]
fn scoped_handle_closes_on_drop(harness: Harness) {
    let engine = &harness.engine;
    let id = {
        let scoped = engine.scoped(ModelFamily::SparseTextEmbedding, None).unwrap();
        assert_eq!(engine.handle_state(scoped.id()).unwrap(), HandleState::Ready);
        scoped.id()
    };
    assert_eq!(engine.handle_state(id).unwrap(), HandleState::Closed);
}

#[rstest]
fn shutdown_closes_every_handle(harness: Harness) {
    let engine = &harness.engine;
    let ids: Vec<HandleId> = ModelFamily::ALL
        .iter()
        .map(|&f| engine.create_handle(f, None).unwrap())
        .collect();
    assert_eq!(engine.live_handles().len(), 4);

    assert_eq!(engine.shutdown(), 4);
    for id in ids {
        assert_eq!(engine.handle_state(id).unwrap(), HandleState::Closed);
    }
    assert_eq!(engine.shutdown(), 0);
}

#[rstest]
fn panicking_model_becomes_inference_error(mirror_dir: std::path::PathBuf) {
    let engine = engine_with(mirror_cache(&mirror_dir), FakeBackends::panicking());
    let id = engine.create_handle(ModelFamily::TextEmbedding, None).unwrap();

    let err = engine.embed(id, &["hello"], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InferenceError);
    assert!(err.to_string().contains("fake backend exploded"));

    // The handle survives and can still be closed.
    assert_eq!(engine.handle_state(id).unwrap(), HandleState::Ready);
    engine.close_handle(id).unwrap();
}

#[rstest]
fn closing_tears_the_model_down_outside_the_table_lock(mirror_dir: std::path::PathBuf) {
    let engine_ref: Arc<OnceLock<Weak<embedding_engine::Engine>>> = Arc::default();
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let hook_ref = engine_ref.clone();
    let backends = FakeBackends::default().with_drop_hook(move || {
        let Some(engine) = hook_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        // Another thread must be able to read the table while the model drops.
        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = done_tx.send(engine.live_handles().len());
        });
        let seen = done_rx.recv_timeout(Duration::from_secs(5)).ok();
        let _ = tx.lock().unwrap().send(seen);
    });

    let engine = Arc::new(engine_with(mirror_cache(&mirror_dir), backends));
    engine_ref.set(Arc::downgrade(&engine)).unwrap();
    let id = engine.create_handle(ModelFamily::TextEmbedding, None).unwrap();

    engine.close_handle(id).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Some(0));
}

#[rstest]
fn distinct_handles_serve_threads_concurrently(harness: Harness) {
    let engine = Arc::new(harness.engine);
    let ids: Vec<HandleId> = (0..3)
        .map(|_| engine.create_handle(ModelFamily::TextEmbedding, None).unwrap())
        .collect();

    let results: Vec<Vec<Vec<f32>>> = std::thread::scope(|s| {
        let workers: Vec<_> = ids
            .iter()
            .map(|&id| {
                let engine = Arc::clone(&engine);
                s.spawn(move || engine.embed(id, &["hello world", "the cat sat"], None).unwrap())
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for r in &results[1..] {
        assert_eq!(r, &results[0]);
    }
}

#[rstest]
fn errors_are_counted_in_metrics(harness: Harness) {
    let engine = &harness.engine;
    let _ = engine.create_handle(ModelFamily::Rerank, Some("missing"));
    let id = engine.create_handle(ModelFamily::Rerank, None).unwrap();
    engine.rerank(id, "what is a panda?", &["hi"], false, None).unwrap();

    let text = engine.metrics().render();
    assert!(text.contains("embed_errors_total{kind=\"ModelNotFound\"} 1"));
    assert!(text.contains("embed_inference_items_total{family=\"rerank\"} 1"));
    assert!(text.contains("embed_live_handles 1"));
}
