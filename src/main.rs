mod alert;
mod command;
mod config;
mod dispatch;
mod error;
mod model;
mod price;
mod registry;
mod storage;
#[cfg(test)]
mod test_support;
mod transport;
mod watcher;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use command::CommandHandler;
use config::AppConfig;
use dispatch::NotificationDispatcher;
use model::InboundMessage;
use price::PriceSource;
use price::cryptocompare::CryptoCompareSource;
use registry::SubscriberRegistry;
use storage::SubscriberStore;
use storage::sqlite::SqliteStorage;
use transport::Transport;
use transport::telegram::TelegramTransport;
use watcher::PriceWatcher;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("price feed error")]
    Price,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "xmr-alert", about = "XMR price alert bot")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Storage ───────────────────────────────────────────────────────────────
    let db_path = format!("{}/xmr-alert.db", config.general.data_dir);
    let storage: Arc<dyn SubscriberStore> = Arc::new(
        SqliteStorage::open(Path::new(&db_path))
            .await
            .change_context(AppError::Storage)?,
    );

    // ── HTTP ──────────────────────────────────────────────────────────────────
    let client = build_http_client(&config).change_context(AppError::Config)?;

    // ── Price ─────────────────────────────────────────────────────────────────
    let source: Arc<dyn PriceSource> = Arc::new(CryptoCompareSource::new(
        client.clone(),
        &config.price.base_url,
        config.price.api_key.clone(),
    ));
    let interval = watcher::fetch_interval(config.price.fetch_interval_secs);
    let mut watcher = PriceWatcher::prime(source, interval)
        .await
        .change_context(AppError::Price)?;

    // ── Transport & dispatch ──────────────────────────────────────────────────
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(
        client,
        &config.telegram.api_url,
        &config.telegram.bot_token,
        Duration::from_secs(config.telegram.poll_timeout_secs),
        config.network.request_timeout(),
    ));

    let cancel = CancellationToken::new();
    let mut task_handles = Vec::new();

    let (dispatcher, dispatch_handle) = NotificationDispatcher::spawn(
        Arc::clone(&transport),
        Duration::from_millis(config.dispatch.retry_delay_ms),
        cancel.clone(),
    );
    task_handles.push(dispatch_handle);

    // ── Subscribers ───────────────────────────────────────────────────────────
    let registry = Arc::new(
        SubscriberRegistry::load(storage, watcher.price_cell(), dispatcher.clone())
            .await
            .change_context(AppError::Storage)?,
    );

    watcher.subscribe(registry.clone());
    let handler = CommandHandler::new(Arc::clone(&registry), watcher.price_cell());
    let watcher = watcher.start();

    // ── Inbound commands ──────────────────────────────────────────────────────
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(256);

    let receive_transport = Arc::clone(&transport);
    let receive_cancel = cancel.clone();
    task_handles.push(tokio::spawn(async move {
        if let Err(e) = receive_transport.receive(inbound_tx, receive_cancel).await {
            tracing::error!(error = ?e, "inbound transport failed");
        }
    }));
    task_handles.push(tokio::spawn(command_loop(inbound_rx, handler, dispatcher)));

    info!(subscribers = registry.len().await, "xmr-alert running");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    let last = watcher.current().await;
    info!(btc = last.btc, usd = last.usd, "ctrl+c received, shutting down");
    watcher.stop();
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), watcher.join()).await;
    for handle in task_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    let (writer, file_error) = log_writer(config.general.log_file.as_deref());
    let ansi = config.general.log_file.is_none();
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(ansi)
                .with_writer(writer)
                .init();
        }
    }

    if let Some(e) = file_error {
        warn!(
            error = %e,
            path = ?config.general.log_file,
            "failed to open log file, logging to stdout only"
        );
    }
}

/// Stdout, teed into `path` when one is configured and can be opened for appending.
fn log_writer(path: Option<&str>) -> (BoxMakeWriter, Option<std::io::Error>) {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return (BoxMakeWriter::new(std::io::stdout), None);
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => (
            BoxMakeWriter::new(std::io::stdout.and(std::sync::Mutex::new(file))),
            None,
        ),
        Err(e) => (BoxMakeWriter::new(std::io::stdout), Some(e)),
    }
}

fn build_http_client(config: &AppConfig) -> Result<reqwest::Client, Report<error::ConfigError>> {
    let mut builder = reqwest::Client::builder().timeout(config.network.request_timeout());

    if let Some(proxy) = &config.network.proxy {
        let proxy = reqwest::Proxy::all(proxy).change_context(error::ConfigError::Validation {
            field: "network.proxy".into(),
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().change_context(error::ConfigError::Validation {
        field: "network".into(),
    })
}

/// Handle each inbound message on its own task and queue the reply.
async fn command_loop(
    mut rx: mpsc::Receiver<InboundMessage>,
    handler: CommandHandler,
    dispatcher: NotificationDispatcher,
) {
    while let Some(message) = rx.recv().await {
        let handler = handler.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Some(reply) = handler.handle(message.chat_id, &message.text).await {
                dispatcher.send(message.chat_id, reply);
            }
        });
    }
}
