//! EVPulse database operations
//!
//! Diagnoses MongoDB connectivity, reports connection status and serves the
//! status/diagnostics HTTP endpoints.

use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use evpulse_database::mongodb::{ConnectionManager, DiagnosticReport};
use evpulse_database::{bootstrap, close_db, quick_test, run_diagnostics};
use eyre::Result;
use std::process::ExitCode;
use tracing::info;

mod api;
mod config;

use api::AppState;
use config::Config;

#[derive(Parser)]
#[command(name = "evpulse-db")]
#[command(about = "Diagnose and monitor the EVPulse MongoDB connection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full connectivity diagnostics
    Diagnose {
        /// Connection string. Defaults to MONGODB_URI.
        #[arg(short, long)]
        uri: Option<String>,

        /// Target database. Defaults to MONGODB_DATABASE.
        #[arg(short, long)]
        database: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect and ping once; exits non-zero on failure
    QuickTest {
        /// Connection string. Defaults to MONGODB_URI.
        #[arg(short, long)]
        uri: Option<String>,
    },

    /// Connect, print the connection status as JSON and disconnect
    Status,

    /// Serve the status and diagnostics endpoints
    Serve,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    install_color_eyre();

    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_tracing(&config.environment);

    let cli = Cli::parse();

    match cli.command {
        Commands::Diagnose {
            uri,
            database,
            json,
        } => {
            let database = database.unwrap_or_else(|| config.mongodb.database.clone());
            let report = run_diagnostics(uri.as_deref(), Some(&database)).await?;
            print_report(&report, json)?;
            Ok(exit_code(report.all_passed))
        }

        Commands::QuickTest { uri } => {
            let ok = quick_test(uri.as_deref()).await;
            println!("{}", if ok { "Connection OK" } else { "Connection FAILED" });
            Ok(exit_code(ok))
        }

        Commands::Status => {
            let manager = ConnectionManager::mongo();
            manager.connect(Some(config.mongodb.clone()), false).await?;

            let status = manager.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);

            close_db(&manager).await;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve => {
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(report: &DiagnosticReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn serve(config: Config) -> Result<()> {
    let manager = match bootstrap(config.mongodb.clone()).await {
        Ok(manager) => manager,
        Err(e) if e.is_service_unavailable() => {
            // Serve degraded so the status endpoints can explain what is wrong
            tracing::error!(error = %e, "Database unavailable at start-up");
            ConnectionManager::mongo()
        }
        Err(e) => return Err(e.into()),
    };

    let state = AppState {
        manager: manager.clone(),
        uri: config.mongodb.uri.clone(),
        database: config.mongodb.database.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.server.address()).await?;
    info!("Server starting on {}", listener.local_addr()?);

    axum::serve(listener, api::router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down: closing MongoDB connection");
    close_db(&manager).await;

    info!("EVPulse database service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM signal, shutting down gracefully"),
    }
}
