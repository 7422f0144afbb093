use anyhow::Result;
use evse_modbus_reflector::Config;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

    evse_modbus_reflector::app::run(config)
        .await
        .map_err(|e| {
            error!("reflector exited with error: {}", e);
            anyhow::anyhow!("reflector error: {}", e)
        })
}
