mod support;

use embedding_engine::cache::MARKER_FILE;
use embedding_engine::registry::{resolve, ModelFamily};
use embedding_engine::{EngineError, ErrorKind};
use rstest::rstest;
use std::fs;
use support::fixtures::*;
use support::helpers::FakeBackends;

#[rstest]
fn first_load_installs_a_complete_artifact(harness: Harness) {
    let spec = resolve(ModelFamily::TextEmbedding, None).unwrap();
    harness
        .engine
        .create_handle(ModelFamily::TextEmbedding, None)
        .unwrap();

    let dir = harness.engine.cache().model_dir(spec);
    assert!(dir.join(MARKER_FILE).is_file());
    assert!(dir.join(spec.model_file).is_file());
    assert!(dir.join("tokenizer.json").is_file());
    // Optional side files absent from the mirror are simply skipped.
    assert!(!dir.join("special_tokens_map.json").exists());

    let cached = harness.engine.cache().cached_models();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].code, spec.code);
    assert!(cached[0].size_bytes > 0);

    // No staging leftovers next to the artifact.
    let family_dir = harness.cache_root().join("text");
    let names: Vec<String> = fs::read_dir(family_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![spec.cache_name()]);
}

#[rstest]
fn offline_engine_uses_existing_cache(harness: Harness) {
    harness
        .engine
        .create_handle(ModelFamily::Rerank, None)
        .unwrap();
    fs::remove_dir_all(&harness.mirror).unwrap();

    let offline = engine_with(mirror_cache(&harness.mirror).offline(true), FakeBackends::default());
    let id = offline.create_handle(ModelFamily::Rerank, None).unwrap();
    let results = offline
        .rerank(id, "what is a panda?", &["panda", "hi"], false, None)
        .unwrap();
    assert_eq!(results[0].index, 0);
}

#[rstest]
fn offline_miss_is_download_failed(mirror_dir: std::path::PathBuf) {
    let engine = engine_with(mirror_cache(&mirror_dir).offline(true), FakeBackends::default());
    let err = engine
        .create_handle(ModelFamily::TextEmbedding, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DownloadFailed);
    assert!(engine.live_handles().is_empty());
}

#[rstest]
fn missing_required_file_fails_without_leaving_a_partial(harness: Harness) {
    let spec = resolve(ModelFamily::SparseTextEmbedding, None).unwrap();
    fs::remove_file(harness.mirror.join(spec.repo).join("tokenizer.json")).unwrap();

    let err = harness
        .engine
        .create_handle(ModelFamily::SparseTextEmbedding, None)
        .unwrap_err();
    match &err {
        EngineError::DownloadFailed { file, attempts, .. } => {
            assert_eq!(file, "tokenizer.json");
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!harness.engine.cache().model_dir(spec).exists());
    assert!(harness.engine.cache().cached_models().is_empty());
    assert_eq!(harness.backends.calls(), 0);
}

#[rstest]
fn partial_directory_is_refetched(harness: Harness) {
    let spec = resolve(ModelFamily::TextEmbedding, None).unwrap();
    let dir = harness.engine.cache().model_dir(spec);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("tokenizer.json"), "{truncated").unwrap();

    let id = harness
        .engine
        .create_handle(ModelFamily::TextEmbedding, None)
        .unwrap();
    assert!(dir.join(MARKER_FILE).is_file());
    assert_eq!(harness.engine.embed(id, &["hello"], None).unwrap().len(), 1);
}

#[rstest]
fn tampered_artifact_is_corrupt(harness: Harness) {
    let spec = resolve(ModelFamily::TextEmbedding, None).unwrap();
    harness
        .engine
        .create_handle(ModelFamily::TextEmbedding, None)
        .unwrap();
    let dir = harness.engine.cache().model_dir(spec);
    fs::write(dir.join(spec.model_file), "shorter").unwrap();

    let err = harness
        .engine
        .create_handle(ModelFamily::TextEmbedding, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptArtifact);
}

#[rstest]
fn external_tensor_data_is_fetched(harness: Harness) {
    let spec = resolve(ModelFamily::Rerank, Some("rozgo/bge-reranker-v2-m3")).unwrap();
    harness
        .engine
        .create_handle(ModelFamily::Rerank, Some(spec.code))
        .unwrap();
    let dir = harness.engine.cache().model_dir(spec);
    assert!(dir.join("model.onnx.data").is_file());
}

#[rstest]
fn evict_removes_artifact(harness: Harness) {
    let spec = resolve(ModelFamily::ImageEmbedding, None).unwrap();
    let cache = harness.engine.cache();
    harness
        .engine
        .create_handle(ModelFamily::ImageEmbedding, None)
        .unwrap();

    assert!(cache.evict(spec).unwrap());
    assert!(!cache.model_dir(spec).exists());
    assert!(cache.cached_models().is_empty());
    assert!(!cache.evict(spec).unwrap());
}
