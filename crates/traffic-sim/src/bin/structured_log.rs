//! `structured-log`: emit one log entry whose body is a nested map, then
//! flush and exit.
//!
//! The body reaches the collector as a `kvlistValue`.

use anyhow::Result;
use pipeline::{AttributeValue, LogEntry, Severity};
use serde_json::json;
use tracing::{info, warn};

use traffic_sim::config::Config;
use traffic_sim::telemetry;

const SCOPE: &str = "example.structured.log";

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env("structured-log").map_err(|e| {
        eprintln!("ERROR: structured-log configuration invalid: {e:#}");
        e
    })?;
    let telemetry = telemetry::init(&cfg)?;

    let person = AttributeValue::from(json!({
        "name": "Juan Perez",
        "email": "juan.perez@example.com",
        "phone": "+5512345678",
        "address": {
            "street": "Av. Reforma 123",
            "city": "CDMX",
            "zip": "06500"
        }
    }));

    info!("sending log with structured body");
    telemetry.logger(SCOPE).emit(
        LogEntry::builder(person)
            .severity(Severity::Info)
            .attribute("enduser.id", "user-123")
            .attribute("event.type", "manual_test")
            .attribute("description", "Log sent from the structured log example")
            .build(),
    );

    let flushed = telemetry
        .logger_provider()
        .force_flush(cfg.telemetry.export_timeout())
        .await;
    if flushed {
        info!("log sent");
    } else {
        warn!("log flush did not complete in time");
    }

    telemetry.shutdown().await;
    Ok(())
}
