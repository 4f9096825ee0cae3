use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::schema::RawItem;
use crate::util::now_unix;

/// CollectionSource is the abstraction layer between:
/// - The collection loop
/// - Whatever produces raw measurements
///
/// Each implementation must:
/// - Return quickly (the loop runs cycles sequentially)
/// - Have no side effects beyond read access to system state
///
/// Errors propagate upward as a failed cycle; the loop logs them
/// and continues with the next tick.
///
/// THREAD SAFETY:
/// - Implementations are shared behind an `Arc` and may be called
///   from the loop task, so they must be `Send + Sync`.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Pulls one round of raw measurements.
    async fn collect(&self) -> anyhow::Result<Vec<RawItem>>;
}

// ------------------------------------------------------------
// Host snapshot source
// ------------------------------------------------------------
//
// Reads a small, cheap snapshot of host state from procfs:
//
// - /proc/loadavg  -> one "system" item (load averages)
// - /proc/meminfo  -> one "memory" item (total / available)
//
// Both files are tiny kernel-backed views; reading them is fast
// and side-effect free.
//
#[derive(Debug, Default)]
pub struct HostStatsSource;

impl HostStatsSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollectionSource for HostStatsSource {
    async fn collect(&self) -> anyhow::Result<Vec<RawItem>> {
        let timestamp = now_unix();

        let loadavg = std::fs::read_to_string("/proc/loadavg")
            .context("failed to read /proc/loadavg")?;
        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .context("failed to read /proc/meminfo")?;

        Ok(vec![
            RawItem {
                timestamp,
                kind: "system".to_string(),
                fields: parse_loadavg(&loadavg)?,
            },
            RawItem {
                timestamp,
                kind: "memory".to_string(),
                fields: parse_meminfo(&meminfo)?,
            },
        ])
    }
}

/// Parses the first three fields of /proc/loadavg.
///
/// Expected shape: `0.42 0.37 0.31 2/1234 5678`
fn parse_loadavg(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let mut parts = raw.split_whitespace();
    let mut fields = Map::new();

    for key in ["load_1m", "load_5m", "load_15m"] {
        let value: f64 = parts
            .next()
            .with_context(|| format!("loadavg is missing the {key} field"))?
            .parse()
            .with_context(|| format!("loadavg {key} field is not a number"))?;
        fields.insert(key.to_string(), Value::from(value));
    }

    Ok(fields)
}

/// Extracts MemTotal and MemAvailable from /proc/meminfo.
///
/// Lines look like `MemTotal:       16306540 kB`; values are
/// reported in kilobytes.
fn parse_meminfo(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let mut fields = Map::new();

    for line in raw.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };

        let key = match name.trim() {
            "MemTotal" => "mem_total_kb",
            "MemAvailable" => "mem_available_kb",
            _ => continue,
        };

        let kb: u64 = rest
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse()
            .with_context(|| format!("meminfo {name} value is not a number"))?;
        fields.insert(key.to_string(), Value::from(kb));
    }

    anyhow::ensure!(
        fields.contains_key("mem_total_kb"),
        "meminfo has no MemTotal line"
    );

    Ok(fields)
}
