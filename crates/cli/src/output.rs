// Output formatting for CLI

use std::time::Duration;

use anyhow::Result;
use beanbench::{LatencySummary, RoleReport, RunSummary};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            OutputFormat::Text => {
                // Text format is handled by the caller
            }
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

pub fn print_summary(summary: &RunSummary) {
    let config = &summary.config;
    print_field("Target host", &config.host);
    print_field("Tube", &config.tube);
    print_field("Publishers", &config.publishers.to_string());
    print_field("Readers", &config.readers.to_string());
    print_field("Jobs", &config.job_count.to_string());
    print_field("Payload", &format!("{} bytes", config.payload_size));
    if let Some(drained) = summary.drained {
        print_field("Drained", &drained.drained.to_string());
        if drained.delete_failures > 0 {
            print_field("Drain errors", &drained.delete_failures.to_string());
        }
    }
    if let Some(prefilled) = summary.prefilled {
        print_field("Prefilled", &prefilled.to_string());
    }

    if let Some(report) = &summary.publishers {
        print_role("Publish", report);
    }
    if let Some(report) = &summary.readers {
        print_role("Read", report);
    }
}

fn print_role(verb: &str, report: &RoleReport) {
    println!("---------------");
    print_field("Finished at", &format_duration(report.metrics.elapsed));
    print_field(&format!("{verb} rate"), &format!("{:.2} req/s", report.metrics.rate));
    print_field("Latency", &format_latency(&report.pool.latency));
    if report.pool.ack_failures > 0 {
        print_field("Ack failures", &report.pool.ack_failures.to_string());
    }
    if report.pool.released > 0 {
        print_field("Released", &report.pool.released.to_string());
    }
    if report.pool.reserve_errors > 0 {
        print_field("Reserve errs", &report.pool.reserve_errors.to_string());
    }
}

fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

fn format_latency(latency: &LatencySummary) -> String {
    let ms = |d: Duration| d.as_secs_f64() * 1000.0;
    format!(
        "p50 {:.2}ms  p95 {:.2}ms  p99 {:.2}ms  max {:.2}ms",
        ms(latency.p50),
        ms(latency.p95),
        ms(latency.p99),
        ms(latency.max)
    )
}
