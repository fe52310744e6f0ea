use std::sync::Arc;

use anyhow::{Context, Result};
use ip_checkin::agent::DynamoAgent;
use ip_checkin::model::CheckinRecord;
use ip_checkin::store::CheckinStore;
use ip_checkin::{Config, start_server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        allow_get = config.allow_get,
        store_timeout_ms = config.store_timeout_ms,
        "configuration loaded"
    );

    let store: Option<Arc<dyn CheckinStore>> = match config.store_settings() {
        Some(settings) => {
            let agent = DynamoAgent::connect(&settings).await;
            if config.create_table {
                agent
                    .ensure_table::<CheckinRecord>()
                    .await
                    .context("failed to create check-in table")?;
            }
            info!(table = %settings.table_name, "using DynamoDB table");
            Some(Arc::new(agent) as Arc<dyn CheckinStore>)
        }
        None => {
            warn!("IP_CHECKIN_TABLE_NAME is not set; check-ins will fail with 500");
            None
        }
    };

    start_server(&config, store).await.context("server failed")?;
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
