// Benchmark command

use std::sync::Arc;

use anyhow::{Context, Result};
use beanbench::{BenchmarkDriver, RunConfig};
use beanbench_queue::BeanstalkConnector;

use crate::output::{print_summary, OutputFormat};

pub async fn run(config: RunConfig, output: OutputFormat) -> Result<()> {
    tracing::debug!(?config, "Run configured");
    let host = config.host.clone();
    let driver = BenchmarkDriver::new(Arc::new(BeanstalkConnector::new()), config);

    let summary = tokio::select! {
        result = driver.execute() => {
            result.with_context(|| format!("benchmark against {host} failed"))?
        }
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted before the benchmark finished");
        }
    };

    if output.is_text() {
        print_summary(&summary);
    } else {
        output.print_value(&summary)?;
    }

    Ok(())
}
