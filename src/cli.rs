//! CLI argument parsing and help text

use embedding_engine::batching::batch_size_from_signed;
use embedding_engine::{EngineError, ModelFamily, Result};

pub fn wants_help(args: &[String]) -> bool {
    args.get(1).is_some_and(|a| a == "help")
        || args.iter().skip(1).any(|a| a == "-h" || a == "--help")
}

pub fn wants_version(args: &[String]) -> bool {
    args.get(1).is_some_and(|a| a == "version")
        || args.iter().skip(1).any(|a| a == "-V" || a == "--version")
}

pub fn print_help() {
    println!("embedding-engine");
    println!();
    println!("Local text/image embeddings, sparse embeddings and reranking over ONNX models.");
    println!("Results are printed as JSON on stdout; errors as JSON on stderr.");
    println!();
    println!("Usage:");
    println!("  embedding-engine models <text|sparse|image|rerank>");
    println!("  embedding-engine embed  [--model CODE] [--batch-size N] TEXT...");
    println!("  embedding-engine sparse [--model CODE] [--batch-size N] TEXT...");
    println!("  embedding-engine image  [--model CODE] [--batch-size N] PATH...");
    println!(
        "  embedding-engine rerank [--model CODE] [--batch-size N] --query Q [--return-documents] DOC..."
    );
    println!("  embedding-engine cache list");
    println!("  embedding-engine cache evict <family> <code>");
    println!("  embedding-engine --help");
    println!("  embedding-engine --version");
    println!();
    println!("Global flags:");
    println!("  --metrics                            print Prometheus metrics to stderr on exit");
    println!("  --                                   treat every following argument as an item");
    println!();
    println!("Common env (defaults shown):");
    println!("  EMBED_CACHE_DIR=~/.cache/embedding-engine");
    println!("  EMBED_EXECUTION_BACKEND=cpu|cuda|coreml   (default: cpu)");
    println!("  EMBED_INTRA_THREADS=<num cpus>");
    println!("  EMBED_MAX_LENGTH=512");
    println!("  EMBED_BATCH_SIZE=                    (default: per family, 256/256/32/64)");
    println!("  EMBED_DOWNLOAD_RETRIES=3");
    println!("  EMBED_DOWNLOAD_BACKOFF_MS=500");
    println!("  EMBED_DOWNLOAD_TIMEOUT_SECS=600");
    println!("  EMBED_HF_ENDPOINT=https://huggingface.co");
    println!("  EMBED_HF_TOKEN=                      (or HF_TOKEN)");
    println!("  EMBED_MODEL_MIRROR_DIR=/path/to/mirror   (fetch from a local directory instead)");
    println!("  EMBED_OFFLINE=true|false             (default: false)");
    println!("  EMBED_VERIFY_CHECKSUMS=true|false    (default: false)");
    println!("  RUST_LOG=info");
}

pub fn print_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArgs {
    pub model: Option<String>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Models(ModelFamily),
    Embed {
        model: ModelArgs,
        texts: Vec<String>,
    },
    Sparse {
        model: ModelArgs,
        texts: Vec<String>,
    },
    Image {
        model: ModelArgs,
        paths: Vec<String>,
    },
    Rerank {
        model: ModelArgs,
        query: String,
        return_documents: bool,
        documents: Vec<String>,
    },
    CacheList,
    CacheEvict {
        family: ModelFamily,
        code: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub print_metrics: bool,
}

/// Parse `args` as produced by `std::env::args()`, program name first.
pub fn parse(args: &[String]) -> Result<Invocation> {
    let mut parser = Parser::default();
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        if parser.only_items {
            parser.items.push(arg.clone());
            continue;
        }
        match arg.as_str() {
            "--" => parser.only_items = true,
            "--metrics" => parser.print_metrics = true,
            "--return-documents" => parser.return_documents = true,
            "--model" | "-m" => parser.model = Some(value(arg, rest.next())?),
            "--query" | "-q" => parser.query = Some(value(arg, rest.next())?),
            "--batch-size" | "-b" => {
                let raw = value(arg, rest.next())?;
                let n: i64 = raw.parse().map_err(|_| {
                    EngineError::invalid_argument(format!(
                        "--batch-size expects an integer, got '{raw}'"
                    ))
                })?;
                parser.batch_size = batch_size_from_signed(n)?;
            }
            flag if flag.starts_with("--") => {
                return Err(EngineError::invalid_argument(format!("unknown flag '{flag}'")));
            }
            _ => parser.items.push(arg.clone()),
        }
    }
    parser.finish()
}

#[derive(Default)]
struct Parser {
    items: Vec<String>,
    model: Option<String>,
    query: Option<String>,
    batch_size: Option<usize>,
    return_documents: bool,
    print_metrics: bool,
    only_items: bool,
}

impl Parser {
    fn finish(self) -> Result<Invocation> {
        let mut items = self.items.into_iter();
        let Some(name) = items.next() else {
            return Err(EngineError::invalid_argument("missing command, see --help"));
        };
        let items: Vec<String> = items.collect();
        let model = ModelArgs {
            model: self.model,
            batch_size: self.batch_size,
        };

        let command = match name.as_str() {
            "models" => match items.as_slice() {
                [family] => Command::Models(family.parse()?),
                _ => return Err(EngineError::invalid_argument("usage: models <family>")),
            },
            "embed" => Command::Embed {
                model,
                texts: items,
            },
            "sparse" => Command::Sparse {
                model,
                texts: items,
            },
            "image" => Command::Image {
                model,
                paths: items,
            },
            "rerank" => Command::Rerank {
                model,
                query: self
                    .query
                    .ok_or_else(|| EngineError::invalid_argument("rerank requires --query"))?,
                return_documents: self.return_documents,
                documents: items,
            },
            "cache" => match items.as_slice() {
                [sub] if sub == "list" => Command::CacheList,
                [sub, family, code] if sub == "evict" => Command::CacheEvict {
                    family: family.parse()?,
                    code: code.clone(),
                },
                _ => {
                    return Err(EngineError::invalid_argument(
                        "usage: cache list | cache evict <family> <code>",
                    ))
                }
            },
            other => {
                return Err(EngineError::invalid_argument(format!(
                    "unknown command '{other}', see --help"
                )))
            }
        };

        Ok(Invocation {
            command,
            print_metrics: self.print_metrics,
        })
    }
}

fn value(flag: &str, next: Option<&String>) -> Result<String> {
    next.cloned()
        .ok_or_else(|| EngineError::invalid_argument(format!("{flag} expects a value")))
}
