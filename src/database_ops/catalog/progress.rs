use std::cmp::Reverse;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// Throttled row-progress logger for long streams.
pub(crate) struct Progress {
    label: String,
    total: Option<u64>,
    every: u64,
    start: Instant,
    last_log: Instant,
    processed: u64,
}

impl Progress {
    pub(crate) fn new<L: Into<String>>(label: L, total: Option<u64>, every: u64) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            total,
            every: every.max(1),
            start: now,
            last_log: now,
            processed: 0,
        }
    }

    pub(crate) fn tick(&mut self, n: u64) {
        let before = self.processed;
        self.processed += n;
        // log whenever an interval boundary was crossed
        if before == 0 || before / self.every != self.processed / self.every {
            self.log(false);
        }
    }

    pub(crate) fn finish(&mut self) {
        self.log(true);
    }

    fn log(&mut self, done: bool) {
        let now = Instant::now();
        if !done && self.processed > 0 && now.duration_since(self.last_log) < Duration::from_millis(200) {
            return;
        }
        self.last_log = now;

        let elapsed = now.duration_since(self.start).as_secs_f64().max(0.001);
        let rate = self.processed as f64 / elapsed;
        match self.total {
            Some(total) if total > 0 => {
                let pct = 100.0 * self.processed as f64 / total as f64;
                let remaining = total.saturating_sub(self.processed);
                if done {
                    info!(target: "progress", label=%self.label, processed=self.processed, remaining, total, pct=%format!("{pct:.1}"), rate=%format!("{rate:.1}/s"), took=%format!("{elapsed:.1}s"), "done");
                } else {
                    let eta = remaining as f64 * (elapsed / self.processed.max(1) as f64);
                    info!(target: "progress", label=%self.label, processed=self.processed, remaining, total, pct=%format!("{pct:.1}"), rate=%format!("{rate:.1}/s"), eta=%format!("{eta:.1}s"), "progress");
                }
            }
            _ if done => {
                info!(target: "progress", label=%self.label, processed=self.processed, rate=%format!("{rate:.1}/s"), took=%format!("{elapsed:.1}s"), "done");
            }
            _ => {
                info!(target: "progress", label=%self.label, processed=self.processed, rate=%format!("{rate:.1}/s"), "progress");
            }
        }
    }
}

/// Wall time spent in one load stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub took_ms: f64,
    pub success: bool,
}

/// Accumulates stage timings for a run and logs a summary at the end.
#[derive(Debug, Default)]
pub(crate) struct StageClock {
    timings: Vec<StageTiming>,
}

impl StageClock {
    pub(crate) fn record(&mut self, stage: &str, elapsed: Duration, success: bool) {
        let took_ms = elapsed.as_secs_f64() * 1000.0;
        info!(
            target: "metrics",
            stage,
            took_ms = format!("{took_ms:.2}"),
            success,
            "stage timing"
        );
        match self.timings.iter_mut().find(|t| t.stage == stage) {
            // streaming modes revisit Reading/Transforming/Writing once per batch
            Some(existing) => {
                existing.took_ms += took_ms;
                existing.success &= success;
            }
            None => self.timings.push(StageTiming {
                stage: stage.to_string(),
                took_ms,
                success,
            }),
        }
    }

    pub(crate) fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub(crate) fn emit_summary(&self) {
        if self.timings.is_empty() {
            return;
        }
        let total: f64 = self.timings.iter().map(|t| t.took_ms).sum();
        info!(
            target: "metrics",
            stages = self.timings.len(),
            total_ms = format!("{total:.2}"),
            "load stage timing summary"
        );
        let mut sorted: Vec<&StageTiming> = self.timings.iter().collect();
        sorted.sort_by_key(|t| Reverse((t.took_ms * 1000.0) as u64));
        for timing in sorted {
            let pct = if total > 0.0 { timing.took_ms / total * 100.0 } else { 0.0 };
            info!(
                target: "metrics",
                stage = %timing.stage,
                took_ms = format!("{:.2}", timing.took_ms),
                pct = format!("{pct:.1}"),
                success = timing.success,
                "stage timing detail"
            );
        }
    }
}
