//! Publisher node: announces itself on connect and publishes an incrementing
//! counter to the data topic every few seconds.

use color_eyre::Result;
use pubsub_node::behavior::CounterPublisher;
use pubsub_node::config::NodeConfig;
use pubsub_node::link::LinkEvent;
use pubsub_node::runtime::RuntimeHandle;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = NodeConfig::load(None)?;
    info!(
        "Starting publisher '{}' against {}:{}",
        config.broker.client_id, config.broker.host, config.broker.port
    );

    let behavior = Box::new(CounterPublisher::new(
        config.topics.data.clone(),
        config.publisher.interval_ms,
    ));
    let runtime = RuntimeHandle::spawn(&config, behavior);

    // The host network stack manages association on its own, so the link is
    // reported up once at startup; it will reconnect autonomously afterwards.
    runtime
        .link_event(LinkEvent::AddressAcquired { addr: None })
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    runtime.shutdown().await?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
    Ok(())
}
