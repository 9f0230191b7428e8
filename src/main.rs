//! # scenario-orchestrator CLI
//!
//! Runs one extracted document through the pipeline and prints the
//! resulting scenario set as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Offline run with the echo worker
//! cargo run -- content.json --offline
//!
//! # Real providers, custom config
//! OPENAI_API_KEY=... cargo run -- content.json --config pipeline.toml
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` selects structured JSON logs (overrides the config)
//! - `RUST_LOG=info` sets the log level filter
//! - `OPENAI_API_KEY`, `AZURE_OPENAI_API_KEY` + `AZURE_OPENAI_ENDPOINT`,
//!   `LOCAL_LLM_URL` configure the providers

use std::path::PathBuf;
use std::sync::Arc;

use scenario_orchestrator::config::{loader, PipelineConfig};
use scenario_orchestrator::{
    init_tracing, metrics, ChatCompletionsWorker, ContentUnit, EchoWorker, ModelWorker,
    Orchestrator, ProcessOptions, Provider, ProviderRouter, Strategy,
};
use tracing::{info, warn};

/// Parsed CLI arguments.
struct Args {
    /// Path to the content unit JSON.
    content: PathBuf,
    /// Optional TOML config.
    config: Option<PathBuf>,
    /// Run one generation call only.
    single_model: bool,
    /// Override the generation model name.
    model: Option<String>,
    /// Force the echo worker.
    offline: bool,
    /// Print the stats snapshot after the run.
    stats: bool,
}

/// Parse command-line arguments manually.
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut content = None;
    let mut config = None;
    let mut single_model = false;
    let mut model = None;
    let mut offline = false;
    let mut stats = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let value = args.get(i).ok_or("--config requires a value")?;
                config = Some(PathBuf::from(value));
            }
            "--model" | "-m" => {
                i += 1;
                let value = args.get(i).ok_or("--model requires a value")?;
                model = Some(value.clone());
            }
            "--single-model" => single_model = true,
            "--offline" => offline = true,
            "--stats" => stats = true,
            "--help" | "-h" => return Err(usage()),
            other if other.starts_with('-') => {
                return Err(format!("unknown argument: {other}\n{}", usage()));
            }
            path => {
                if content.is_some() {
                    return Err(format!("unexpected argument: {path}\n{}", usage()));
                }
                content = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let content = content.ok_or_else(usage)?;
    Ok(Args {
        content,
        config,
        single_model,
        model,
        offline,
        stats,
    })
}

fn usage() -> String {
    [
        "Usage: scenario-orchestrator <CONTENT.json> [OPTIONS]",
        "",
        "Options:",
        "  --config, -c <FILE>   Pipeline config TOML (default: built-in)",
        "  --model, -m <NAME>    Override the generation model",
        "  --single-model        Skip classification and enrichment",
        "  --offline             Use the echo worker instead of real providers",
        "  --stats               Print run statistics to stderr",
        "  --help, -h            Show this help message",
    ]
    .join("\n")
}

/// Register a worker for every provider whose credentials are present.
/// Falls back to the echo worker when none are.
fn build_worker(offline: bool) -> Arc<dyn ModelWorker> {
    if offline {
        return Arc::new(EchoWorker::new());
    }

    let mut router = ProviderRouter::new();
    match ChatCompletionsWorker::openai() {
        Ok(w) => router = router.with(Provider::OpenAi, Arc::new(w)),
        Err(e) => info!(reason = %e, "openai provider disabled"),
    }
    match ChatCompletionsWorker::azure() {
        Ok(w) => router = router.with(Provider::Azure, Arc::new(w)),
        Err(e) => info!(reason = %e, "azure provider disabled"),
    }
    if std::env::var("LOCAL_LLM_URL").is_ok() {
        router = router.with(Provider::Local, Arc::new(ChatCompletionsWorker::local()));
    }

    if [Provider::OpenAi, Provider::Azure, Provider::Local]
        .iter()
        .any(|p| router.serves(*p))
    {
        Arc::new(router)
    } else {
        warn!("no provider credentials found, using the echo worker");
        Arc::new(EchoWorker::new())
    }
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let config = match &args.config {
        Some(path) => match loader::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    if std::env::var("LOG_FORMAT").is_err() {
        std::env::set_var("LOG_FORMAT", config.observability.log_format.as_env());
    }
    let _ = init_tracing();

    if config.observability.metrics_enabled {
        if let Err(e) = metrics::init_metrics() {
            warn!(error = %e, "metrics disabled");
        }
    }

    let unit: ContentUnit = match std::fs::read_to_string(&args.content)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
    {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("cannot read {}: {e}", args.content.display());
            std::process::exit(1);
        }
    };

    let orchestrator = Orchestrator::new(build_worker(args.offline), &config);
    let options = ProcessOptions {
        strategy: if args.single_model {
            Strategy::SingleModel
        } else {
            Strategy::MultiModel
        },
        preferred_model: args.model,
    };

    let set = orchestrator.process_with(&unit, &options).await;
    info!(
        scenarios = set.scenarios.len(),
        degraded = set.metadata.degraded,
        total_time_ms = set.metadata.total_time_ms,
        "done"
    );

    match serde_json::to_string_pretty(&set) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("cannot serialize result: {e}");
            std::process::exit(1);
        }
    }

    if args.stats {
        let snapshot = orchestrator.stats();
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            eprintln!("{json}");
        }
        if config.observability.metrics_enabled {
            eprintln!("{}", metrics::gather_metrics());
        }
    }
}
