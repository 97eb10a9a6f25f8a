use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use geotrail_logic::{PositionError, PositionSource, RawFix, WatchOptions, WatchSink};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
/// One line of a recording
pub enum ReplayEntry {
    Fix(RawFix),
    Error(PositionError),
}

/// Parse a JSON-lines recording, blank lines are skipped
pub fn parse_recording(text: &str) -> Result<Vec<ReplayEntry>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid entry on line {}", i + 1))
        })
        .collect()
}

/// A [PositionSource] that plays back a recording. Fixes are spaced out by the difference in
/// their timestamps divided by `speed`. An error entry ends the watch, the next watch continues
/// with the entry after it.
pub struct ReplaySource {
    entries: Arc<[ReplayEntry]>,
    speed: f64,
    cursor: Arc<AtomicUsize>,
}

impl ReplaySource {
    pub fn new(entries: Vec<ReplayEntry>, speed: f64) -> Result<Self> {
        if !(speed.is_finite() && speed > 0.0) {
            bail!("Replay speed must be a positive number, got {speed}");
        }

        Ok(Self {
            entries: entries.into(),
            speed,
            cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn load(path: impl AsRef<Path>, speed: f64) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording {}", path.display()))?;
        let entries = parse_recording(&text)
            .with_context(|| format!("Failed to parse recording {}", path.display()))?;
        info!("Loaded {} entries from {}", entries.len(), path.display());
        Self::new(entries, speed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn delay_between(prev: i64, next: i64, speed: f64) -> Duration {
        let millis = next.saturating_sub(prev).max(0) as f64 / speed;
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Wall time needed to play back the whole recording
    pub fn span(&self) -> Duration {
        let mut last = None;
        let mut total = Duration::ZERO;

        for entry in self.entries.iter() {
            if let ReplayEntry::Fix(fix) = entry {
                if let Some(prev) = last {
                    let delay = Self::delay_between(prev, fix.timestamp, self.speed);
                    total = total.saturating_add(delay);
                }
                last = Some(fix.timestamp);
            }
        }

        total
    }

    async fn play(
        entries: Arc<[ReplayEntry]>,
        cursor: Arc<AtomicUsize>,
        speed: f64,
        sink: WatchSink,
        cancel: CancellationToken,
    ) {
        let mut last = None;

        loop {
            let idx = cursor.load(Ordering::SeqCst);
            let Some(entry) = entries.get(idx) else {
                debug!("Recording finished for watch {}", sink.watch_id());
                break;
            };

            match entry {
                ReplayEntry::Fix(fix) => {
                    if let Some(prev) = last {
                        let delay = Self::delay_between(prev, fix.timestamp, speed);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }

                    if cancel.is_cancelled() {
                        break;
                    }

                    last = Some(fix.timestamp);
                    cursor.store(idx + 1, Ordering::SeqCst);

                    if !sink.deliver(*fix) {
                        break;
                    }
                }
                ReplayEntry::Error(error) => {
                    cursor.store(idx + 1, Ordering::SeqCst);
                    sink.fail(error.clone());
                    break;
                }
            }
        }
    }
}

impl PositionSource for ReplaySource {
    type Watch = CancellationToken;

    fn is_available(&self) -> bool {
        true
    }

    fn subscribe(&self, _options: WatchOptions, sink: WatchSink) -> Self::Watch {
        let cancel = CancellationToken::new();
        tokio::spawn(Self::play(
            self.entries.clone(),
            self.cursor.clone(),
            self.speed,
            sink,
            cancel.clone(),
        ));
        cancel
    }

    fn unsubscribe(&self, watch: Self::Watch) {
        watch.cancel();
    }
}
