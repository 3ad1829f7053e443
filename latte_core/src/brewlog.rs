//! Brew session logger.
//!
//! Named numeric sources are polled at a fixed sample period while a brew
//! runs; `finish` writes the buffered rows as CSV and clears the logger
//! for the next session. One file per session, named by the wall-clock
//! second the session ended.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use latte_traits::clock::{Clock, MonotonicClock};

use crate::error::Result;

type Source = Box<dyn FnMut() -> f32 + Send>;

pub struct BrewLogger {
    sample_ms: u64,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    sources: Vec<(String, Source)>,
    rows: Vec<(f64, Vec<f32>)>,
    t0_ms: Option<u64>,
    next_sample_ms: u64,
}

impl BrewLogger {
    pub fn new(sample_ms: u64) -> Self {
        Self::with_clock(sample_ms, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(sample_ms: u64, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let epoch = clock.now();
        Self {
            sample_ms: sample_ms.max(1),
            clock,
            epoch,
            sources: Vec::new(),
            rows: Vec::new(),
            t0_ms: None,
            next_sample_ms: 0,
        }
    }

    /// Register a named source polled on every sampled row.
    pub fn add_source(&mut self, name: impl Into<String>, source: impl FnMut() -> f32 + Send + 'static) {
        self.sources.push((name.into(), Box::new(source)));
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Record a row if the sample period has elapsed. The first call of a
    /// session records immediately and anchors the time axis.
    pub fn log(&mut self) {
        let now = self.clock.ms_since(self.epoch);
        match self.t0_ms {
            None => {
                self.t0_ms = Some(now);
                self.next_sample_ms = now.saturating_add(self.sample_ms);
                self.record(now);
            }
            Some(_) => {
                if now >= self.next_sample_ms {
                    self.record(now);
                    self.next_sample_ms = self.next_sample_ms.saturating_add(self.sample_ms);
                }
            }
        }
    }

    fn record(&mut self, now_ms: u64) {
        let t0 = self.t0_ms.unwrap_or(now_ms);
        let t_s = now_ms.saturating_sub(t0) as f64 / 1000.0;
        let values = self.sources.iter_mut().map(|(_, f)| f()).collect();
        self.rows.push((t_s, values));
    }

    /// Write the buffered session to `<dir>/brew-<unix-secs>.csv` and reset.
    /// Returns the written path, or None when no rows were collected.
    pub fn finish(&mut self, dir: &Path) -> Result<Option<PathBuf>> {
        if self.rows.is_empty() {
            self.t0_ms = None;
            return Ok(None);
        }

        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = dir.join(format!("brew-{stamp}.csv"));

        let mut wtr = csv::Writer::from_path(&path)?;
        let mut header = vec!["t_s".to_string()];
        header.extend(self.sources.iter().map(|(n, _)| n.clone()));
        wtr.write_record(&header)?;
        for (t_s, values) in &self.rows {
            let mut rec = vec![format!("{t_s:.3}")];
            rec.extend(values.iter().map(|v| format!("{v:.4}")));
            wtr.write_record(&rec)?;
        }
        wtr.flush()?;

        let rows = self.rows.len();
        self.rows.clear();
        self.t0_ms = None;
        tracing::info!(path = %path.display(), rows, "brew log written");
        Ok(Some(path))
    }
}
