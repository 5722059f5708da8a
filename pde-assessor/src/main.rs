use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use pde_assessor::batch::{OutputFormat, parse_requests, run_batch};
use pde_assessor::service::create_app;
use pde_assessor::{AssessmentRequest, Assessor, AssessorConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pde-assessor", version, about = "Permitted daily exposure risk reports")]
struct Cli {
    /// Ignore cached evidence answers and ask again
    #[arg(long, global = true)]
    force_refresh: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Assess one drug ingredient and print the report
    Assess {
        #[arg(long)]
        name: String,
        #[arg(long)]
        route: String,
        #[arg(long)]
        apid: Option<String>,
    },
    /// Assess every request in a JSON Lines file
    Batch {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Write one JSON array instead of JSON Lines
        #[arg(long)]
        array: bool,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Serve assessments over HTTP
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pde_assessor=info,pde_flow=info,tower_http=info".into());

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = AssessorConfig::from_env();
    config.force_refresh = cli.force_refresh;

    let assessor = Assessor::with_stage_timeout(config.evidence_sources(), Some(config.stage_timeout));

    match cli.command {
        Command::Assess { name, route, apid } => {
            let mut request = AssessmentRequest::new(name, route);
            request.apid = apid;
            let report = assessor.assess(&request).await;
            println!("{}", serde_json::to_string_pretty(&report).context("failed to serialize report")?);
        }
        Command::Batch {
            input,
            output,
            array,
            concurrency,
        } => {
            let text = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("failed to read {}", input.display()))?;
            let file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("failed to create {}", output.display()))?;
            let format = if array { OutputFormat::Array } else { OutputFormat::JsonLines };

            let summary = run_batch(
                &assessor,
                parse_requests(&text),
                concurrency.unwrap_or(config.batch_concurrency),
                format,
                tokio::io::BufWriter::new(file),
                shutdown_signal(),
            )
            .await?;
            println!("{}", serde_json::to_string(&summary)?);
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("failed to bind port {}", port))?;
            info!("Server running on http://0.0.0.0:{}", port);

            axum::serve(listener, create_app(assessor))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
    }

    Ok(())
}
