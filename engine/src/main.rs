// Foreman task-orchestration engine
// Main entry point for the foreman binary

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use foreman_engine::cli::{Cli, Command};
use foreman_engine::conductor::{AggregateFormat, Environment, ExecuteOptions, Orchestrator};
use foreman_engine::config::Config;
use foreman_engine::inference::{InferenceClient, OllamaClient};
use foreman_engine::server::{self, AppState};
use foreman_engine::telemetry::{init_telemetry, init_telemetry_with_level};

/// Exit codes: 0 clean shutdown, 1 fatal init error, 2 bind error,
/// 130 interrupted by signal.
const EXIT_OK: i32 = 0;
const EXIT_INIT: i32 = 1;
const EXIT_BIND: i32 = 2;
const EXIT_INTERRUPT: i32 = 130;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    // Basic telemetry before config is available
    init_telemetry();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_INIT;
        }
    };

    if let Some(level) = &cli.log {
        config.core.log_level = level.clone();
    }
    init_telemetry_with_level(&config.core.log_level);

    tracing::info!("foreman engine v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Run { task, format } => run_task(config, &task, &format, cli.json).await,
        Command::Personas => personas(config, cli.json),
        Command::Doctor => doctor(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config, foreman_engine::errors::EngineError> {
    match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load_or_create(),
    }
}

fn build_orchestrator(config: Config) -> Result<Arc<Orchestrator>, String> {
    let client = OllamaClient::new(&config.inference)
        .map_err(|e| format!("inference client: {}", e))?;

    let env = Environment::from_config(config, Arc::new(client))
        .map_err(|e| format!("environment: {}", e))?;

    Ok(Arc::new(Orchestrator::new(env)))
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> i32 {
    if let Some(host) = host {
        config.http.host = host;
    }
    if let Some(port) = port {
        config.http.port = port;
    }

    let addr: SocketAddr = match format!("{}:{}", config.http.host, config.http.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid bind address: {}", e);
            return EXIT_INIT;
        }
    };

    let strict = config.inference.strict_startup;

    let orchestrator = match build_orchestrator(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("initialization failed: {}", e);
            return EXIT_INIT;
        }
    };

    if strict && !orchestrator.env().client.check_health().await {
        eprintln!("inference backend unreachable and strict startup is enabled");
        return EXIT_INIT;
    }

    let shutdown = CancellationToken::new();
    let interrupted = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            interrupted.cancel();
        }
    });

    let state = Arc::new(AppState { orchestrator });
    match server::serve(state, addr, shutdown.clone()).await {
        Ok(()) => {
            if shutdown.is_cancelled() {
                EXIT_INTERRUPT
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            eprintln!("bind error on {}: {}", addr, e);
            EXIT_BIND
        }
    }
}

async fn run_task(config: Config, task: &str, format: &str, json: bool) -> i32 {
    let format = match AggregateFormat::parse(format) {
        Ok(format) => format,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_INIT;
        }
    };

    let orchestrator = match build_orchestrator(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("initialization failed: {}", e);
            return EXIT_INIT;
        }
    };

    let options = ExecuteOptions {
        format,
        ..Default::default()
    };

    match orchestrator
        .execute(task, Default::default(), options, CancellationToken::new())
        .await
    {
        Ok(record) => {
            if json {
                match serde_json::to_string_pretty(&record) {
                    Ok(out) => println!("{}", out),
                    Err(e) => {
                        eprintln!("serialization failed: {}", e);
                        return EXIT_INIT;
                    }
                }
            } else {
                println!("status: {}", record.status);
                println!("subtasks: {}", record.results.len());
                println!();
                println!("{}", record.final_output);
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("workflow failed: {}", e);
            EXIT_INIT
        }
    }
}

fn personas(config: Config, json: bool) -> i32 {
    let store = match foreman_engine::persona::PersonaStore::open(
        config.core.data_dir.join("personas.yaml"),
    ) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("persona library unavailable: {}", e);
            return EXIT_INIT;
        }
    };

    let personas = store.list();
    if json {
        match serde_json::to_string_pretty(&personas) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("serialization failed: {}", e);
                return EXIT_INIT;
            }
        }
    } else if personas.is_empty() {
        println!("No personas in the library yet.");
    } else {
        for persona in personas {
            println!(
                "{}  {} {} ({})  score {:.2}  uses {}",
                persona.id,
                persona.dna.seniority,
                persona.dna.role,
                persona.dna.domain,
                persona.score,
                persona.uses,
            );
        }
    }

    EXIT_OK
}

async fn doctor(config: Config) -> i32 {
    println!("data directory: {}", config.core.data_dir.display());
    println!("inference host: {}", config.inference.host);

    let client = match OllamaClient::new(&config.inference) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("inference client: {}", e);
            return EXIT_INIT;
        }
    };

    if client.check_health().await {
        println!("backend: reachable");
        match client.list_models().await {
            Ok(models) => {
                println!("models: {}", models.len());
                for model in models {
                    println!("  {}", model);
                }
            }
            Err(e) => println!("models: unavailable ({})", e),
        }
    } else {
        println!("backend: unreachable");
    }

    EXIT_OK
}
