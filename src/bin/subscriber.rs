//! Subscriber node: subscribes to the control topic and switches an LED pin
//! from the messages arriving there.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use pubsub_node::behavior::{GpioSwitch, SwitchSubscriber};
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
        "Starting subscriber '{}' against {}:{}",
        config.broker.client_id, config.broker.host, config.broker.port
    );

    // The pin starts off; it only changes on control messages afterwards.
    let switch = GpioSwitch::new(config.subscriber.led_pin)
        .map_err(|e| eyre!("Failed to open LED pin {}: {}", config.subscriber.led_pin, e))?;
    let behavior = Box::new(SwitchSubscriber::new(
        config.topics.control.clone(),
        Box::new(switch),
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
