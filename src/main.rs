use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod completion;
mod config;
mod db;
mod error;
mod export;
mod forecast;
mod models;
mod report;

use config::Config;

#[derive(Parser)]
#[command(name = "equipment-maintenance")]
#[command(about = "Maintenance records and wear forecasts for plant equipment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import carbon-brush measurements from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Forecast carbon-brush replacement for one piece of equipment
    Forecast {
        #[arg(long)]
        tag: String,
    },
    /// Generate a markdown maintenance report
    Report {
        #[arg(long, default_value = "maintenance-report.md")]
        out: PathBuf,
    },
    /// Export carbon-brush history as a CSV sheet
    Export {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write replacement notices for equipment due within the horizon
    Notify {
        #[arg(long, default_value_t = 1.0)]
        horizon_months: f64,
        #[arg(long, default_value = "notices")]
        out_dir: PathBuf,
    },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} measurements from {}.", csv.display());
        }
        Commands::Forecast { tag } => {
            let equipment = db::find_equipment_by_tag(&pool, &tag).await?;
            let history = db::wear_history(&pool, equipment.id).await?;

            match forecast::forecast(&history) {
                Some(f) => println!(
                    "{} ({}): {:.2} mm/month, {:.1} months remaining, replace by {} (confidence {:.0}%)",
                    equipment.tag,
                    equipment.name,
                    f.wear_rate_per_month,
                    f.months_remaining,
                    f.predicted_date.format("%Y-%m-%d"),
                    f.confidence
                ),
                None => println!(
                    "{} ({}): not enough data for a forecast ({} inspections on record).",
                    equipment.tag,
                    equipment.name,
                    history.len()
                ),
            }
        }
        Commands::Report { out } => {
            let equipment = db::list_equipment(&pool).await?;
            let histories = db::all_wear_histories(&pool).await?;
            let sessions = db::list_esp_sessions(&pool).await?;
            let now = Utc::now();

            let dashboard = report::build_dashboard(equipment, &histories, sessions, now);
            std::fs::write(&out, report::build_report(&dashboard, now))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { tag, out } => {
            let equipment = db::find_equipment_by_tag(&pool, &tag).await?;
            let measurements = db::list_carbon_brush(&pool, equipment.id).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(export::export_file_name(&equipment)));

            std::fs::write(&out, export::carbon_brush_csv(&equipment, &measurements)?)?;
            println!("Exported {} measurements to {}.", measurements.len(), out.display());
        }
        Commands::Notify {
            horizon_months,
            out_dir,
        } => {
            let equipment = db::list_equipment(&pool).await?;
            let histories = db::all_wear_histories(&pool).await?;
            let now = Utc::now();
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;

            let mut written = 0usize;
            for item in equipment {
                let Some(history) = histories.get(&item.id) else {
                    continue;
                };
                let measurements = db::list_carbon_brush(&pool, item.id).await?;
                let outlook = report::EquipmentOutlook::from_history(item, history, now);

                if let Some(notice) = report::build_notification(&outlook, &measurements, horizon_months)? {
                    let body = format!("Subject: {}\n\n{}", notice.subject, notice.body);
                    let stem = notice.attachment_name.trim_end_matches(".csv");
                    std::fs::write(out_dir.join(format!("{stem}.txt")), body)?;
                    std::fs::write(out_dir.join(&notice.attachment_name), &notice.attachment)?;
                    written += 1;
                }
            }
            println!("Wrote {written} notices to {}.", out_dir.display());
        }
        Commands::Serve { bind } => {
            let address = bind.unwrap_or_else(|| config.bind_addr.clone());
            let state = api::AppState {
                pool,
                config: Arc::new(config),
            };

            let listener = TcpListener::bind(&address)
                .await
                .with_context(|| format!("failed to bind {address}"))?;
            info!("Server running on {address}");

            axum::serve(listener, api::router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;

            info!("Server shut down");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
