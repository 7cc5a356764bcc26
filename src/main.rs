use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use logexporter::{config, Exporter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::load().context("Failed to load config")?;
    info!(?config, "App config");

    let exporter = Arc::new(Exporter::new(config.namespace.clone()));
    exporter
        .start(&config.listen)
        .await
        .context("Failed to init logexporter")?;

    let instances = config
        .outputs
        .iter()
        .map(|output| exporter.create_instance(&output.labels, &output.view_name))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to register log view")?;

    let signals = Signals::new(&[SIGTERM, SIGINT]).context("Failed to register signals")?;
    let signals_handle = signals.handle();

    let pump = tokio::spawn(pump_stdin(exporter.clone(), instances, config.batch_size));

    let mut signals = signals.fuse();
    if let Some(signal) = signals.next().await {
        info!(signal, "Received signal, stopping");
    }
    signals_handle.close();
    pump.abort();

    exporter
        .stop(config.shutdown_timeout)
        .await
        .context("Failed to stop logexporter")
}

/// Feeds stdin to every instance in batches of `batch_size` lines. The
/// endpoint keeps serving once the input is exhausted.
async fn pump_stdin(exporter: Arc<Exporter>, instances: Vec<usize>, batch_size: usize) {
    let batch_size = batch_size.max(1);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch = Vec::new();
    let mut pending = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                batch.extend_from_slice(line.as_bytes());
                batch.push(b'\n');
                pending += 1;

                if pending >= batch_size {
                    flush(&exporter, &instances, &batch);
                    batch.clear();
                    pending = 0;
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!(%err, "Failed to read input");
                break;
            }
        }
    }

    if pending > 0 {
        flush(&exporter, &instances, &batch);
    }

    info!("Input closed, serving final counts until shutdown");
}

fn flush(exporter: &Exporter, instances: &[usize], batch: &[u8]) {
    for &index in instances {
        if let Err(err) = exporter.flush(index, batch) {
            warn!(%err, kind = err.kind(), index, "Failed to flush batch");
        }
    }
}
