//!
//! src/main.rs  Andrew Belles  Oct 4th, 2025
//!
//! Entry point: parses the command line, loads configuration, installs
//! logging and runs one reconciliation or serves the http surface
//!

mod config;
mod errors;
mod logging;
mod types;

mod api;
mod fetch;
mod pagination;
mod catalog;

mod dataset;
mod resolve;
mod reconcile;
mod report;
mod pipeline;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, RunOverrides};
use crate::errors::ReconcileError;
use crate::pipeline::Pipeline;
use crate::report::XlsxReportWriter;
use crate::resolve::DatasetResolver;

/// Cross-reference an artist's catalog with unclaimed musical works
#[derive(Parser, Debug)]
#[command(name = "isrc-reconciler", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile once and write the workbook (default)
    Run(RunArgs),
    /// Serve POST /generate and GET /health
    Serve {
        /// Address to listen on, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<SocketAddr>
    }
}

#[derive(Args, Debug, Default, Clone)]
struct RunArgs {
    /// Artist to look up, overrides ARTIST_NAME
    #[arg(long)]
    artist: Option<String>,
    /// Dataset path or http(s) url, overrides DATASET_PATH
    #[arg(long)]
    dataset: Option<String>,
    /// Output workbook, overrides OUTPUT_EXCEL
    #[arg(long)]
    output: Option<PathBuf>
}

impl From<RunArgs> for RunOverrides {
    fn from(args: RunArgs) -> Self {
        RunOverrides {
            artist_name: args.artist,
            dataset_path: args.dataset,
            output_path: args.output
        }
    }
}

impl Cli {
    fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run(self.run))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match launch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn launch(cli: Cli) -> Result<(), ReconcileError> {
    let cfgs = config::load_config()?;
    let _guard = logging::init_logging(&cfgs.logging)?;

    info!(
        service = "isrc-reconciler",
        version = %env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let result = match cli.into_command() {
        Command::Run(args) => run_once(&cfgs, args.into()).await,
        Command::Serve { bind } => serve(&cfgs, bind).await
    };
    if let Err(e) = &result {
        error!(kind = e.kind(), error = %e, exit_code = e.exit_code(), "run.failed");
    }
    result
}

fn resolver(cfgs: &AppConfig) -> Result<DatasetResolver, ReconcileError> {
    let http = fetch::download_client(&cfgs.http)?;
    Ok(DatasetResolver::new(cfgs.dataset.clone(), http))
}

async fn run_once(cfgs: &AppConfig, overrides: RunOverrides) -> Result<(), ReconcileError> {
    let run = cfgs.run.with_overrides(&overrides);
    let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let resolver = resolver(cfgs)?;

    let mut sink = XlsxReportWriter::new(&run.output_path);
    let summary = Pipeline::new(&spotify, &resolver, cfgs.catalog)
        .run(&run, &mut sink)
        .await?;

    info!(%summary, "run.done");
    println!("Wrote results to {}", sink.path().display());
    Ok(())
}

async fn serve(cfgs: &AppConfig, bind: Option<SocketAddr>) -> Result<(), ReconcileError> {
    let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let state = server::AppState::new(
        cfgs.run.clone(),
        cfgs.catalog,
        Arc::new(spotify),
        resolver(cfgs)?
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown.requested"),
            Err(e) => warn!(error = %e, "shutdown.signal_unavailable")
        }
        trigger.cancel();
    });

    server::serve(state, bind.unwrap_or(cfgs.server.bind), shutdown).await
}

/// Unit Tests
#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_flags_default_to_run() {
        let cli = Cli::try_parse_from([
            "isrc-reconciler", "--artist", "Adele", "--output", "out/adele.xlsx"
        ]).unwrap();

        match cli.into_command() {
            Command::Run(args) => {
                assert_eq!(args.artist.as_deref(), Some("Adele"));
                assert_eq!(args.output, Some(PathBuf::from("out/adele.xlsx")));
                assert_eq!(args.dataset, None);
            }
            other => panic!("expected run, got {other:?}")
        }
    }

    #[test]
    fn no_arguments_is_a_default_run() {
        let cli = Cli::try_parse_from(["isrc-reconciler"]).unwrap();
        match cli.into_command() {
            Command::Run(args) => assert!(args.artist.is_none()),
            other => panic!("expected run, got {other:?}")
        }
    }

    #[test]
    fn serve_accepts_bind_address() {
        let cli = Cli::try_parse_from(["isrc-reconciler", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.into_command() {
            Command::Serve { bind } => assert_eq!(bind, Some("0.0.0.0:9000".parse().unwrap())),
            other => panic!("expected serve, got {other:?}")
        }
    }

    #[test]
    fn run_overrides_carry_cli_values() {
        let overrides: RunOverrides = RunArgs {
            artist: Some("Adele".into()),
            dataset: Some("https://example.org/shares.tsv".into()),
            output: None
        }.into();
        assert_eq!(overrides.artist_name.as_deref(), Some("Adele"));
        assert_eq!(overrides.dataset_path.as_deref(), Some("https://example.org/shares.tsv"));
        assert!(overrides.output_path.is_none());
    }
}
