use super::{ModelFamily, ModelSpec, Pooling};

const fn text(
    code: &'static str,
    alias: &'static str,
    description: &'static str,
    dimension: usize,
    repo: &'static str,
    model_file: &'static str,
    pooling: Pooling,
) -> ModelSpec {
    ModelSpec {
        family: ModelFamily::TextEmbedding,
        code,
        alias,
        description,
        dimension: Some(dimension),
        repo,
        model_file,
        extra_files: &[],
        pooling: Some(pooling),
    }
}

const fn image(
    code: &'static str,
    alias: &'static str,
    description: &'static str,
    dimension: usize,
    model_file: &'static str,
) -> ModelSpec {
    ModelSpec {
        family: ModelFamily::ImageEmbedding,
        code,
        alias,
        description,
        dimension: Some(dimension),
        repo: code,
        model_file,
        extra_files: &[],
        pooling: None,
    }
}

const fn rerank(
    code: &'static str,
    alias: &'static str,
    description: &'static str,
    repo: &'static str,
    model_file: &'static str,
    extra_files: &'static [&'static str],
) -> ModelSpec {
    ModelSpec {
        family: ModelFamily::Rerank,
        code,
        alias,
        description,
        dimension: None,
        repo,
        model_file,
        extra_files,
        pooling: None,
    }
}

pub(super) const TEXT_MODELS: &[ModelSpec] = &[
    text(
        "sentence-transformers/all-MiniLM-L6-v2",
        "AllMiniLML6V2",
        "Sentence Transformer model, MiniLM-L6-v2",
        384,
        "Qdrant/all-MiniLM-L6-v2-onnx",
        "model.onnx",
        Pooling::Mean,
    ),
    text(
        "Xenova/all-MiniLM-L12-v2",
        "AllMiniLML12V2",
        "Sentence Transformer model, MiniLM-L12-v2",
        384,
        "Xenova/all-MiniLM-L12-v2",
        "onnx/model.onnx",
        Pooling::Mean,
    ),
    text(
        "BAAI/bge-base-en-v1.5",
        "BGEBaseENV15",
        "v1.5 release of the base English model",
        768,
        "Xenova/bge-base-en-v1.5",
        "onnx/model.onnx",
        Pooling::Cls,
    ),
    text(
        "BAAI/bge-large-en-v1.5",
        "BGELargeENV15",
        "v1.5 release of the large English model",
        1024,
        "Xenova/bge-large-en-v1.5",
        "onnx/model.onnx",
        Pooling::Cls,
    ),
    text(
        "BAAI/bge-small-en-v1.5",
        "BGESmallENV15",
        "v1.5 release of the fast and default English model",
        384,
        "Xenova/bge-small-en-v1.5",
        "onnx/model.onnx",
        Pooling::Cls,
    ),
    text(
        "BAAI/bge-small-zh-v1.5",
        "BGESmallZHV15",
        "v1.5 release of the small Chinese model",
        512,
        "Xenova/bge-small-zh-v1.5",
        "onnx/model.onnx",
        Pooling::Cls,
    ),
    text(
        "nomic-ai/nomic-embed-text-v1.5",
        "NomicEmbedTextV15",
        "v1.5 release of the 8192 context length English model",
        768,
        "nomic-ai/nomic-embed-text-v1.5",
        "onnx/model.onnx",
        Pooling::Mean,
    ),
    text(
        "Xenova/paraphrase-multilingual-MiniLM-L12-v2",
        "ParaphraseMLMiniLML12V2",
        "Multi-lingual model",
        384,
        "Xenova/paraphrase-multilingual-MiniLM-L12-v2",
        "onnx/model.onnx",
        Pooling::Mean,
    ),
    text(
        "intfloat/multilingual-e5-small",
        "MultilingualE5Small",
        "Small model of multilingual E5 Text Embeddings",
        384,
        "intfloat/multilingual-e5-small",
        "onnx/model.onnx",
        Pooling::Mean,
    ),
    text(
        "intfloat/multilingual-e5-base",
        "MultilingualE5Base",
        "Base model of multilingual E5 Text Embeddings",
        768,
        "intfloat/multilingual-e5-base",
        "onnx/model.onnx",
        Pooling::Mean,
    ),
    text(
        "mixedbread-ai/mxbai-embed-large-v1",
        "MxbaiEmbedLargeV1",
        "Large English embedding model from MixedBreed.ai",
        1024,
        "mixedbread-ai/mxbai-embed-large-v1",
        "onnx/model.onnx",
        Pooling::Cls,
    ),
    text(
        "Alibaba-NLP/gte-base-en-v1.5",
        "GTEBaseENV15",
        "Large multilingual embedding model from Alibaba",
        768,
        "Alibaba-NLP/gte-base-en-v1.5",
        "onnx/model.onnx",
        Pooling::Cls,
    ),
];

pub(super) const SPARSE_MODELS: &[ModelSpec] = &[ModelSpec {
    family: ModelFamily::SparseTextEmbedding,
    code: "Qdrant/Splade_PP_en_v1",
    alias: "SPLADEPPV1",
    description: "Splade sparse vector model for commercial use, v1",
    dimension: Some(30522),
    repo: "Qdrant/Splade_PP_en_v1",
    model_file: "model.onnx",
    extra_files: &[],
    pooling: None,
}];

pub(super) const IMAGE_MODELS: &[ModelSpec] = &[
    image(
        "Qdrant/clip-ViT-B-32-vision",
        "ClipVitB32",
        "CLIP vision encoder based on ViT-B/32",
        512,
        "model.onnx",
    ),
    image(
        "Qdrant/resnet50-onnx",
        "Resnet50",
        "ResNet-50 from `Deep Residual Learning for Image Recognition`",
        2048,
        "model.onnx",
    ),
    image(
        "Qdrant/Unicom-ViT-B-16",
        "UnicomVitB16",
        "Unicom Unicom-ViT-B-16 from open-metric-learning",
        768,
        "model.onnx",
    ),
    image(
        "Qdrant/Unicom-ViT-B-32",
        "UnicomVitB32",
        "Unicom Unicom-ViT-B-32 from open-metric-learning",
        512,
        "model.onnx",
    ),
    image(
        "nomic-ai/nomic-embed-vision-v1.5",
        "NomicEmbedVisionV15",
        "Nomic NomicEmbedVisionV15",
        768,
        "onnx/model.onnx",
    ),
];

pub(super) const RERANK_MODELS: &[ModelSpec] = &[
    rerank(
        "BAAI/bge-reranker-base",
        "BGERerankerBase",
        "reranker model for English and Chinese",
        "BAAI/bge-reranker-base",
        "onnx/model.onnx",
        &[],
    ),
    rerank(
        "rozgo/bge-reranker-v2-m3",
        "BGERerankerV2M3",
        "reranker model for multilingual use",
        "rozgo/bge-reranker-v2-m3",
        "model.onnx",
        &["model.onnx.data"],
    ),
    rerank(
        "jinaai/jina-reranker-v1-turbo-en",
        "JINARerankerV1TurboEn",
        "reranker model for English",
        "jinaai/jina-reranker-v1-turbo-en",
        "onnx/model.onnx",
        &[],
    ),
    rerank(
        "jinaai/jina-reranker-v2-base-multilingual",
        "JINARerankerV2BaseMultilingual",
        "reranker model for multilingual use",
        "jinaai/jina-reranker-v2-base-multilingual",
        "onnx/model.onnx",
        &[],
    ),
];
