mod cli;

use anyhow::Context;
use serde_json::{json, Value};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cli::{Command, Invocation};
use embedding_engine::registry;
use embedding_engine::{Engine, EngineConfig, EngineError, ModelFamily};

fn main() -> ExitCode {
    let args = std::env::args().collect::<Vec<_>>();
    if cli::wants_help(&args) {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if cli::wants_version(&args) {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting embedding-engine");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("{}", error_json(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> anyhow::Result<()> {
    let Invocation {
        command,
        print_metrics,
    } = cli::parse(args)?;
    let config = EngineConfig::from_env()?;
    let engine = Engine::new(&config)?;

    let output = execute(&engine, command)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );

    if print_metrics {
        eprint!("{}", engine.metrics().render());
    }
    let closed = engine.shutdown();
    info!(closed, "Done");
    Ok(())
}

fn execute(engine: &Engine, command: Command) -> anyhow::Result<Value> {
    let value = match command {
        Command::Models(family) => serde_json::to_value(engine.list_models(family))?,
        Command::Embed { model, texts } => {
            let handle = engine.scoped(ModelFamily::TextEmbedding, model.model.as_deref())?;
            serde_json::to_value(engine.embed(handle.id(), &texts, model.batch_size)?)?
        }
        Command::Sparse { model, texts } => {
            let handle = engine.scoped(ModelFamily::SparseTextEmbedding, model.model.as_deref())?;
            serde_json::to_value(engine.embed_sparse(handle.id(), &texts, model.batch_size)?)?
        }
        Command::Image { model, paths } => {
            let handle = engine.scoped(ModelFamily::ImageEmbedding, model.model.as_deref())?;
            serde_json::to_value(engine.embed(handle.id(), &paths, model.batch_size)?)?
        }
        Command::Rerank {
            model,
            query,
            return_documents,
            documents,
        } => {
            let handle = engine.scoped(ModelFamily::Rerank, model.model.as_deref())?;
            let results = engine.rerank(
                handle.id(),
                &query,
                &documents,
                return_documents,
                model.batch_size,
            )?;
            serde_json::to_value(results)?
        }
        Command::CacheList => serde_json::to_value(engine.cache().cached_models())?,
        Command::CacheEvict { family, code } => {
            let spec = registry::resolve(family, Some(&code))?;
            let removed = engine.cache().evict(spec)?;
            json!({ "family": family, "code": spec.code, "removed": removed })
        }
    };
    Ok(value)
}

/// Library errors keep their kind and index; anything else is reported as an
/// inference failure with the full context chain.
fn error_json(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<EngineError>() {
        Some(engine_err) => json!(engine_err.report()),
        None => json!({
            "kind": "InferenceError",
            "message": format!("{err:#}"),
        }),
    }
}
