//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    uptime_seconds: Option<u64>,
    components: HashMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Query a running instance's health and metrics endpoints.
pub async fn run(health_url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", health_url);

    let health_endpoint = format!("{}/health", health_url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_endpoint).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the evsink pipeline running?");
            println!("Start it with: evsink run --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_endpoint = format!("{}/metrics", metrics_url.trim_end_matches('/'));

    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_endpoint);

    match client.get(&metrics_endpoint).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_marker(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    if let Some(uptime) = health.uptime_seconds {
        println!("Uptime: {}s", uptime);
    }
    println!();

    if !health.components.is_empty() {
        let mut names: Vec<&String> = health.components.keys().collect();
        names.sort();

        println!("Components:");
        for name in names {
            let status = &health.components[name];
            let marker = status_marker(&status.status);
            if let Some(msg) = &status.message {
                println!("  {} {}: {} ({})", marker, name, status.status, msg);
            } else {
                println!("  {} {}: {}", marker, name, status.status);
            }
        }
    }
}

/// Parse Prometheus text into `series -> value`, skipping non-integer samples.
fn parse_metrics(metrics_text: &str) -> HashMap<&str, u64> {
    let mut values = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            if let Ok(value) = parts[1].parse::<u64>() {
                values.insert(parts[0], value);
            }
        }
    }

    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_metrics(metrics_text);

    let rows = [
        ("Consumed (main):   ", "evsink_records_consumed_total{loop=\"main\"}"),
        ("Consumed (retry):  ", "evsink_records_consumed_total{loop=\"retry\"}"),
        ("Persisted:         ", "evsink_persisted_total"),
        ("Sent to retry:     ", "evsink_retry_published_total"),
        ("Dead-lettered:     ", "evsink_dead_lettered_total"),
        ("Routing failures:  ", "evsink_routing_failures_total"),
        ("Spooled:           ", "evsink_spooled_total"),
        ("Commit failures:   ", "evsink_commit_failures_total"),
    ];

    for (label, series) in rows {
        if let Some(v) = values.get(series) {
            println!("{}{}", label, format_number(*v));
        }
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metrics() {
        let text = "# HELP evsink_persisted_total Events inserted\n\
                    # TYPE evsink_persisted_total counter\n\
                    evsink_persisted_total 42\n\
                    evsink_records_consumed_total{loop=\"retry\"} 7\n\
                    evsink_processing_duration_seconds_sum 0.25\n";

        let values = parse_metrics(text);
        assert_eq!(values.get("evsink_persisted_total"), Some(&42));
        assert_eq!(
            values.get("evsink_records_consumed_total{loop=\"retry\"}"),
            Some(&7)
        );
        assert!(!values.contains_key("evsink_processing_duration_seconds_sum"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }
}
