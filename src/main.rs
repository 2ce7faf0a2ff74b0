use std::sync::Arc;

use roundabout::config::Config;
use roundabout::proxy::Balancer;
use roundabout::server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let balancer = Arc::new(Balancer::from_config(&cfg)?);

    server::listener::run(&cfg.listen_addr(), balancer).await
}
