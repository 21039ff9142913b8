use anyhow::Context;
use cloudwatch_metricbeat::config::Config;
use cloudwatch_metricbeat::scheduler::Scheduler;
use cloudwatch_metricbeat::sink::JsonLinesSink;
use cloudwatch_metricbeat::source::http::HttpSourceBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn help() {
    const HELP: &str = r#"
        cloudwatch-metricbeat <config.yml|config.json>

        Events are written to stdout as JSON lines, logging is controlled with RUST_LOG.
        Set CA_CERT to a PEM file to trust an extra root certificate for the endpoint.
    "#;
    println!("{HELP}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    // drop exec
    let _ = args.next();
    let Some(config_path) = args.next() else {
        help();
        return Ok(());
    };

    let config = Config::from_path(&config_path)
        .await
        .with_context(|| format!("loading {config_path}"))?;

    let builder = HttpSourceBuilder::new()
        .region(&config.region)
        .endpoint(config.endpoint.as_deref());
    let builder = match std::env::var("CA_CERT") {
        Ok(path) => {
            let ca = tokio::fs::read(&path).await.context("CA_CERT")?;
            builder.add_root_certificate(&ca)?
        }
        Err(_) => builder,
    };
    let source = builder.build()?;
    info!("Polling {}", source.endpoint());

    let sink = JsonLinesSink::new(tokio::io::stdout());
    let scheduler = Scheduler::new(&config, Arc::new(source), Arc::new(sink));

    let stop = CancellationToken::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
        }
        ctrl_c.cancel();
    });

    let reports = scheduler.run(stop).await?;
    for report in reports {
        info!(
            "group {}: {} published, {} skipped",
            report.group,
            report.published,
            report.skipped.len()
        );
    }

    Ok(())
}
