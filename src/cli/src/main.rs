#![deny(
  unsafe_code,
  // reason = "Let's just not do it"
)]
#![deny(
  clippy::unwrap_used,
  clippy::expect_used,
  clippy::panic,
  clippy::unreachable,
  // reason = "We have to handle errors properly"
)]

use std::sync::Arc;

use fieldpoll::{config, process, service};
use futures_time::future::FutureExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = config::Manager::new().await?;
  let values = config.values().await;

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
        |_| {
          tracing_subscriber::EnvFilter::default()
            .add_directive(values.log_level.into())
        },
      ),
    )
    .init();

  if values.scan {
    for port in service::serial::scan_ports() {
      println!("{}", serde_json::to_string(&port)?);
    }
    return Ok(());
  }

  let (sink, records) =
    service::sink::BufferedSink::new(values.modbus.persistence_buffer);
  let registry = Arc::new(process::Registry::new(
    values.channels.clone(),
    values.modbus.settings(),
    values.device_class,
    Arc::new(values.modbus.connector()),
    Arc::new(sink),
  ));

  let persistence = tokio::spawn(async move {
    while let Ok(record) = records.recv_async().await {
      match serde_json::to_string(&record) {
        Ok(json) => tracing::info!("Record {}", json),
        Err(error) => {
          tracing::error! {
            %error,
            "Failed serializing record"
          }
        }
      }
    }
  });

  for name in &values.start {
    if let Err(error) = registry.start(name).await {
      tracing::error!("Failed starting {} {}", name, error);
    }
  }
  tracing::info!(
    "Polling {} of {} channels",
    values.start.len(),
    registry.names().count()
  );

  tokio::signal::ctrl_c().await?;
  registry.close_all().await;
  drop(registry);

  let drain = futures_time::time::Duration::from_millis(1000);
  if persistence.timeout(drain).await.is_err() {
    tracing::warn!("Persistence did not drain in time");
  }

  Ok(())
}
