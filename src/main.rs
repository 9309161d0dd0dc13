use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use replyflow::business::{BusinessContext, ChannelCredentials, StaticDirectory};
use replyflow::channels::HttpTransport;
use replyflow::config::PipelineConfig;
use replyflow::dispatch::Dispatcher;
use replyflow::followup::FollowUpScheduler;
use replyflow::http::routes;
use replyflow::knowledge::KnowledgeService;
use replyflow::leads::NullQualifier;
use replyflow::pipeline::types::Channel;
use replyflow::pipeline::Orchestrator;
use replyflow::store::{Database, LibSqlBackend};

/// One tenant entry in the businesses config file.
#[derive(Debug, Deserialize)]
struct BusinessEntry {
    #[serde(flatten)]
    context: BusinessContext,
    #[serde(default)]
    whatsapp: Option<CredentialsEntry>,
    #[serde(default)]
    instagram: Option<CredentialsEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialsEntry {
    access_token: String,
    sender_id: String,
}

fn load_directory(path: &PathBuf) -> anyhow::Result<StaticDirectory> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<BusinessEntry> = serde_json::from_str(&raw)?;

    let mut directory = StaticDirectory::new();
    for entry in entries {
        let business_id = entry.context.business_id.clone();
        directory = directory.with_business(entry.context);
        if let Some(creds) = entry.whatsapp {
            directory = directory.with_credentials(
                &business_id,
                Channel::Whatsapp,
                ChannelCredentials {
                    access_token: SecretString::from(creds.access_token),
                    sender_id: creds.sender_id,
                },
            );
        }
        if let Some(creds) = entry.instagram {
            directory = directory.with_credentials(
                &business_id,
                Channel::Instagram,
                ChannelCredentials {
                    access_token: SecretString::from(creds.access_token),
                    sender_id: creds.sender_id,
                },
            );
        }
    }
    Ok(directory)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db_path: PathBuf = std::env::var("REPLYFLOW_DB")
        .unwrap_or_else(|_| "replyflow.db".to_string())
        .into();
    let port: u16 = std::env::var("REPLYFLOW_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let followup_interval_secs: u64 = std::env::var("REPLYFLOW_FOLLOWUP_INTERVAL_SECS")
        .unwrap_or_else(|_| "300".to_string())
        .parse()
        .unwrap_or(300);
    let businesses_path: PathBuf = std::env::var("REPLYFLOW_BUSINESSES")
        .unwrap_or_else(|_| "businesses.json".to_string())
        .into();

    let config = PipelineConfig {
        dry_run: std::env::var("REPLYFLOW_DRY_RUN").is_ok(),
        ..PipelineConfig::default()
    };

    let directory = Arc::new(load_directory(&businesses_path).map_err(|e| {
        anyhow::anyhow!("failed to load businesses from {}: {e}", businesses_path.display())
    })?);

    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&db_path).await?);
    let knowledge = Arc::new(KnowledgeService::new(store.clone(), config.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        directory.clone(),
        Arc::new(HttpTransport::new()),
        config.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        directory.clone(),
        knowledge,
        dispatcher.clone(),
        Arc::new(NullQualifier),
        config.clone(),
    ));
    let scheduler = FollowUpScheduler::new(store.clone(), directory.clone(), dispatcher, config);

    // Follow-up loop: fixed interval, independent invocation boundary.
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(followup_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match scheduler.process_due(chrono::Utc::now()).await {
                Ok(report) if report.processed > 0 => {
                    tracing::info!(?report, "Follow-up batch processed");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Follow-up run failed"),
            }
        }
    });

    let app = routes(orchestrator);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "replyflow listening");
    axum::serve(listener, app).await?;

    Ok(())
}
