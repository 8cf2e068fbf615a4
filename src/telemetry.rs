use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // try_init: tests and embedders may already have a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: Option<u16>) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(port) = port else { return Ok(()) };
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    tracing::info!(port, "Prometheus exporter listening on /metrics");
    metrics::gauge!("quotepipe_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        tracing::warn!(port, "metrics_port set but built without the metrics-exporter feature");
    }
    Ok(())
}
