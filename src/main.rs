//! accessflow - database bootstrap for the access request workflow

use accessflow::config::{Command, Config};
use accessflow::store::Store;
use accessflow::{seed, AppState};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "accessflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    let store = Store::connect(&config.database_url, config.max_connections).await?;

    // Run migrations
    store.migrate().await?;
    tracing::info!(database_url = %config.database_url, "migrations applied");

    if config.command() == Command::Seed {
        let state = AppState::new(store.pool().clone());
        match seed::load_sample_data(&state).await? {
            Some(summary) => tracing::info!(
                users = summary.users,
                roles = summary.roles,
                requests = summary.requests,
                "database seeded"
            ),
            None => tracing::info!("database left unchanged"),
        }
    }

    Ok(())
}
