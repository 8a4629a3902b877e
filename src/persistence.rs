// persistence.rs — Daily counters persistence (§6.5)
//
// Two-field document `{date, trades: map<symbol,int>}`, atomically
// rewritten per mutation. Best-effort: write failures are logged, not
// propagated (§5 "DailyPairTrades persistence is best-effort"). Ported from
// the teacher's `load_state`/`save_state` pair, narrowed from a full engine
// snapshot to just the daily-counter document this spec persists.
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::ledger::DailyPairTrades;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCountersDoc {
    date: String,
    trades: std::collections::HashMap<String, i64>,
}

/// Loads the daily-counters document. Rejects (falls back to empty, dated
/// `today`) if the stored date doesn't match `today`, or if the file is
/// missing or corrupt.
pub fn load_state<P: AsRef<Path>>(path: P, today: &str) -> DailyPairTrades {
    if path.as_ref().exists() {
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<DailyCountersDoc>(&content) {
                Ok(doc) if doc.date == today => {
                    info!("loaded daily counters from {:?}: date={} pairs={}", path.as_ref(), doc.date, doc.trades.len());
                    return DailyPairTrades { reset_day: doc.date, counts: doc.trades };
                }
                Ok(doc) => {
                    info!("daily counters file date {} does not match today {}, resetting", doc.date, today);
                }
                Err(e) => error!("failed to parse daily counters file: {}", e),
            },
            Err(e) => error!("failed to read daily counters file: {}", e),
        }
    }
    DailyPairTrades::new(today)
}

/// Atomically rewrites the document: write to a sibling temp file, then
/// rename over the destination, so a crash mid-write never leaves a
/// half-written file behind.
pub fn save_state<P: AsRef<Path>>(path: P, state: &DailyPairTrades) {
    let doc = DailyCountersDoc { date: state.reset_day.clone(), trades: state.counts.clone() };
    let content = match serde_json::to_string_pretty(&doc) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to serialize daily counters: {}", e);
            return;
        }
    };
    let tmp_path = path.as_ref().with_extension("tmp");
    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    })();
    if let Err(e) = write_result {
        error!("failed to persist daily counters: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("perp-engine-test-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let path = temp_path("roundtrip");
        let mut trades = DailyPairTrades::new("2026-07-28");
        trades.increment("BTCUSDT");
        trades.increment("BTCUSDT");
        save_state(&path, &trades);
        let loaded = load_state(&path, "2026-07-28");
        assert_eq!(loaded.count("BTCUSDT"), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn date_mismatch_resets_to_empty() {
        let path = temp_path("mismatch");
        let mut trades = DailyPairTrades::new("2026-07-27");
        trades.increment("ETHUSDT");
        save_state(&path, &trades);
        let loaded = load_state(&path, "2026-07-28");
        assert_eq!(loaded.count("ETHUSDT"), 0);
        assert_eq!(loaded.reset_day, "2026-07-28");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_initializes_empty() {
        let path = temp_path("missing");
        let loaded = load_state(&path, "2026-07-28");
        assert_eq!(loaded.counts.len(), 0);
        assert_eq!(loaded.reset_day, "2026-07-28");
    }
}
