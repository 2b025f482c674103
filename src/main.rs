//! Canopy entry point.
//!
//! One binary, three modes: `webhook-only` runs the credential-less
//! receiver, `worker-only` runs the credentialed worker, `all-in-one` runs
//! both over an in-process queue. Invalid configuration exits with code 1.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canopy::config::{Config, ForgeSettings, Mode, QueueSettings, StorageSettings};
use canopy::github::{ForgeClient, OctocrabForge};
use canopy::queue::{InMemoryQueue, MessageQueue, StreamConfig, StreamQueue, TopicConfig, TopicQueue};
use canopy::server::{AppState, build_router};
use canopy::storage::{ObjectStorage, Storage};
use canopy::webhooks::EventFilter;
use canopy::worker::Processor;

/// Coverage annotations for pull requests.
#[derive(Debug, Parser)]
#[command(name = "canopy", version, about)]
struct Cli {
    /// Which stages this process runs.
    #[arg(long, value_enum, default_value_t = Mode::AllInOne)]
    mode: Mode,

    /// HTTP listen port, overriding the environment.
    #[arg(long)]
    port: Option<u16>,

    /// Skip webhook signature validation (development only). All other
    /// filters still apply.
    #[arg(long)]
    disable_hmac: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = {
        let cli_disable_hmac = cli.disable_hmac;
        let loaded = Config::load(cli.mode, |key| {
            if key == "CANOPY_DISABLE_HMAC" && cli_disable_hmac {
                return Some("true".to_string());
            }
            std::env::var(key).ok()
        });
        match loaded {
            Ok(mut config) => {
                config.apply_overrides(cli.port, cli.disable_hmac);
                config
            }
            Err(error) => {
                tracing::error!(%error, "invalid configuration");
                std::process::exit(1);
            }
        }
    };

    if let Err(error) = run(cli.mode, config).await {
        tracing::error!(error = %format!("{error:#}"), "fatal error");
        std::process::exit(1);
    }
}

async fn run(mode: Mode, config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let queue = build_queue(&config.queue).await?;

    tracing::info!(?mode, port = config.port, "starting canopy");

    match mode {
        Mode::WebhookOnly => {
            serve_receiver(&config, Arc::clone(&queue), shutdown.clone()).await?;
        }
        Mode::WorkerOnly => {
            run_worker(&config, Arc::clone(&queue), shutdown.clone()).await?;
        }
        Mode::AllInOne => {
            let receiver = serve_receiver(&config, Arc::clone(&queue), shutdown.clone());
            let worker = run_worker(&config, Arc::clone(&queue), shutdown.clone());
            tokio::try_join!(receiver, worker)?;
        }
    }

    queue.close().await.ok();
    tracing::info!("shutdown complete");
    Ok(())
}

/// Cancels the root token on ctrl-c, starting the bounded drain.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });
}

async fn build_queue(settings: &QueueSettings) -> anyhow::Result<Arc<dyn MessageQueue>> {
    Ok(match settings {
        QueueSettings::InMemory => Arc::new(InMemoryQueue::new()),
        QueueSettings::Stream { addr } => Arc::new(
            StreamQueue::connect(StreamConfig::new(addr.clone()))
                .await
                .context("connecting to stream queue")?,
        ),
        QueueSettings::Topic {
            project,
            topic,
            subscription,
        } => Arc::new(
            TopicQueue::connect(TopicConfig {
                project: project.clone(),
                topic: topic.clone(),
                subscription: subscription.clone(),
            })
            .await
            .context("connecting to topic queue")?,
        ),
    })
}

fn build_storage(settings: &StorageSettings) -> anyhow::Result<Arc<dyn Storage>> {
    Ok(match settings {
        StorageSettings::Cloud { bucket } => {
            Arc::new(ObjectStorage::cloud(bucket).context("building cloud storage")?)
        }
        StorageSettings::S3Compat {
            endpoint,
            access_key,
            secret_key,
            bucket,
            use_ssl,
        } => Arc::new(
            ObjectStorage::s3_compatible(endpoint, access_key, secret_key, bucket, *use_ssl)
                .context("building s3-compatible storage")?,
        ),
    })
}

fn build_forge(settings: &ForgeSettings) -> anyhow::Result<Arc<dyn ForgeClient>> {
    Ok(Arc::new(
        OctocrabForge::from_app(
            settings.app_id,
            settings.installation_id,
            &settings.private_key,
        )
        .context("building forge client")?,
    ))
}

/// Runs the HTTP receiver until the shutdown token fires, then drains.
async fn serve_receiver(
    config: &Config,
    queue: Arc<dyn MessageQueue>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let receiver = config
        .receiver
        .as_ref()
        .context("receiver configuration missing")?;

    let secret = if config.disable_hmac {
        tracing::warn!("webhook signature validation is DISABLED");
        None
    } else {
        receiver.webhook_secret.clone().map(String::into_bytes)
    };

    let filter = EventFilter::new(
        receiver.allowed_orgs.clone(),
        receiver.allowed_workflows.clone(),
    );
    let state = AppState::new(queue, secret, filter, shutdown.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "receiver listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")?;

    tracing::info!("receiver drained");
    Ok(())
}

/// Consumes work requests until the shutdown token fires.
async fn run_worker(
    config: &Config,
    queue: Arc<dyn MessageQueue>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let storage_settings = config
        .storage
        .as_ref()
        .context("storage configuration missing")?;
    let forge_settings = config
        .forge
        .as_ref()
        .context("forge configuration missing")?;

    let storage = build_storage(storage_settings)?;
    let forge = build_forge(forge_settings)?;
    let processor = Arc::new(Processor::new(forge, Arc::clone(&storage)));

    tracing::info!("worker consuming");
    queue
        .subscribe(processor, shutdown)
        .await
        .context("queue subscription failed")?;

    storage.close().await.ok();
    tracing::info!("worker stopped");
    Ok(())
}
