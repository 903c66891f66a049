//! Bark - modular Discord bot
//!
//! Modules bundle chat commands, a dashboard fragment and an HTTP API. They
//! are described by TOML files in the module directories, loaded in
//! dependency order and hot reloaded when their files change.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serenity::Client;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod commands;
mod config;
mod core;
mod modules;
mod routes;

use bot::status::BotStatus;
use bot::Handler;
use commands::CommandRegistry;
use config::Config;
use core::Storage;
use modules::manager::ModuleDirs;
use modules::{ModuleCatalog, ModuleManager, ModuleServices};
use routes::AppState;

const EVENT_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

async fn open_storage(config: &Config) -> Option<Arc<Storage>> {
    match Storage::new(&config.database_path).await {
        Ok(storage) => {
            tracing::info!("💾 Database ready at {}", config.database_path.display());
            Some(Arc::new(storage))
        }
        Err(e) => {
            tracing::warn!("Storage disabled, failed to open database: {}", e);
            None
        }
    }
}

/// Prune old events once a day
fn spawn_event_cleanup(storage: Arc<Storage>, retention_days: u32) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVENT_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match storage.cleanup_old_events(retention_days).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("🧹 Removed {} old events", removed),
                Err(e) => tracing::error!("Event cleanup failed: {}", e),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bark=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let storage = open_storage(&config).await;
    if let Some(storage) = &storage {
        spawn_event_cleanup(storage.clone(), config.event_retention_days);
    }

    let registry = Arc::new(CommandRegistry::new());
    let status = Arc::new(BotStatus::new());
    let services = Arc::new(ModuleServices::new(
        storage.clone(),
        registry.clone(),
        status,
        config.prefix.clone(),
        config.port,
    ));

    let manager = ModuleManager::new(
        ModuleDirs {
            modules: config.modules_dir.clone(),
            system_modules: config.system_modules_dir.clone(),
            config_file: config.module_config_file.clone(),
        },
        ModuleCatalog::builtin(),
        services.clone(),
    );

    bot::builtin::register_core_commands(&registry, Arc::downgrade(&manager))?;
    let loaded = manager.load_all().await;
    tracing::info!("📦 {} module(s) ready", loaded);

    if config.hot_reload {
        manager.start_watching().await?;
    }

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            manager: manager.clone(),
        });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🌐 Dashboard running at http://{}", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Dashboard server stopped: {}", e);
        }
    });

    let mut client = Client::builder(&config.bot_token, bot::intents())
        .event_handler(Handler::new(services.clone()))
        .await?;
    let shard_manager = client.shard_manager.clone();

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                tracing::error!("Discord client stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    }

    services.status.set_disconnected();
    manager.shutdown().await;
    if let Some(storage) = storage {
        storage.close().await;
    }

    Ok(())
}
