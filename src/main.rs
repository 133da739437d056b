use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use invoice_extractor::api::{ApiState, extraction_routes};
use invoice_extractor::attachments::{
    AttachmentResolver, AttachmentStore, DirectoryStore, MailboxStore,
};
use invoice_extractor::broker::{AmqpConnector, DeliveryContext, MessageConsumer, MessageHandler};
use invoice_extractor::config::AppConfig;
use invoice_extractor::llm::create_model;
use invoice_extractor::pipeline::{FallbackExtractor, InvoicePipeline};

#[derive(Parser)]
#[command(name = "invoice-extractor", version, about = "Invoice extraction and hand-off service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP extraction endpoint.
    Serve {
        /// Overrides BIND_ADDR.
        #[arg(long)]
        bind: Option<String>,

        /// Where attachments are read from.
        #[arg(long, value_enum, default_value_t = Source::Directory)]
        source: Source,
    },
    /// Consume extracted invoices from a queue, logging and acknowledging each.
    Consume {
        /// Overrides RABBITMQ_PERSISTENCE_QUEUE.
        #[arg(long)]
        queue: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// `<ATTACH_DIR>/<id>.xml` and `<ATTACH_DIR>/<id>.pdf`
    Directory,
    /// `<ATTACH_DIR>/<id>.eml`
    Mailbox,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Serve { bind, source } => serve(config, bind, source).await,
        Command::Consume { queue } => consume(config, queue).await,
    }
}

async fn serve(config: AppConfig, bind: Option<String>, source: Source) -> anyhow::Result<()> {
    if config.model.api_key.expose_secret().is_empty() {
        warn!("GEMINI_API_KEY is not set; PDF extraction will fail");
    }
    let model = create_model(&config.model)?;

    let store: Arc<dyn AttachmentStore> = match source {
        Source::Directory => Arc::new(DirectoryStore::new(&config.storage.attach_dir)),
        Source::Mailbox => Arc::new(MailboxStore::new(&config.storage.attach_dir)),
    };

    let pipeline = InvoicePipeline::new(
        AttachmentResolver::new(store),
        FallbackExtractor::new(model),
        config.storage.prompt_path.clone(),
        Arc::new(AmqpConnector::new()),
        config.broker.clone(),
        config.topology.clone(),
    );

    let app = extraction_routes(ApiState {
        pipeline: Arc::new(pipeline),
        service_name: config.service.name.clone(),
    });

    let addr = bind.unwrap_or(config.service.bind_addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        %addr,
        service = %config.service.name,
        attachments = %config.storage.attach_dir.display(),
        broker = %config.broker.endpoint(),
        "Extraction service started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Extraction service stopped");
    Ok(())
}

async fn consume(config: AppConfig, queue: Option<String>) -> anyhow::Result<()> {
    let queue = config.topology.invoice_queue(queue);
    let mut consumer = MessageConsumer::new(config.broker, Arc::new(AmqpConnector::new()));
    consumer.connect().await?;

    let result = tokio::select! {
        consumed = consumer.consume(&queue, &InvoiceLogger) => consumed,
        _ = shutdown_signal() => Ok(()),
    };

    if let Err(e) = consumer.close().await {
        warn!(error = %e, "Failed to close consumer connection");
    }
    result.with_context(|| format!("Consuming from {queue} failed"))
}

/// Logs each invoice body and acknowledges it. Bodies that are not JSON are
/// rejected so they get requeued.
struct InvoiceLogger;

#[async_trait]
impl MessageHandler for InvoiceLogger {
    async fn handle(&self, ctx: &DeliveryContext<'_>) -> anyhow::Result<()> {
        let invoice: serde_json::Value =
            serde_json::from_slice(ctx.body()).context("Message body is not JSON")?;

        let invoice_number = invoice
            .get("invoice_number")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");
        let items = invoice
            .get("items")
            .and_then(serde_json::Value::as_array)
            .map_or(0, Vec::len);
        info!(
            delivery_tag = ctx.delivery_tag(),
            redelivered = ctx.redelivered(),
            invoice_number,
            items,
            "Received invoice"
        );

        ctx.ack().await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
