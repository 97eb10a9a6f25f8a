use std::{sync::Arc, time::Duration};

use chrono::Utc;
use geotrail_logic::{PositionError, PositionSource, RawFix, WatchOptions, WatchSink};
use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Rough length of one degree of latitude
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone)]
/// How a [SimulatedSource] walks
pub struct WalkSettings {
    /// Seed for the walk, same seed means the same path
    pub seed: u64,
    /// Latitude and longitude to start from
    pub start: (f64, f64),
    /// Time between fixes
    pub interval: Duration,
    /// Meters moved per fix when not standing still
    pub step_meters: f64,
    /// Chance out of 100 that a fix repeats the last coordinate
    pub stand_still_chance: u32,
    /// Stop producing fixes for good after this many
    pub max_fixes: Option<usize>,
    /// Go quiet after this many fixes, the watch then times out
    pub stall_after: Option<usize>,
    /// Every subscription is refused with a permission error
    pub deny_permission: bool,
    /// Pretend the platform has no location support at all
    pub available: bool,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            start: (40.0, -74.0),
            interval: Duration::from_secs(1),
            step_meters: 1.4,
            stand_still_chance: 20,
            max_fixes: None,
            stall_after: None,
            deny_permission: false,
            available: true,
        }
    }
}

impl WalkSettings {
    /// How long it takes for the walk to play out with a given watch timeout, if it ever ends
    pub fn expected_duration(&self, options: &WatchOptions) -> Option<Duration> {
        if self.deny_permission || !self.available {
            return Some(Duration::ZERO);
        }

        match (self.stall_after, self.max_fixes) {
            (Some(stall), max) => {
                let fixes = max.map_or(stall, |max| max.min(stall));
                Some(self.time_for(fixes).saturating_add(options.timeout_duration()))
            }
            (None, Some(max)) => Some(self.time_for(max)),
            (None, None) => None,
        }
    }

    /// Time taken to produce `fixes` fixes, saturating at [Duration::MAX]
    fn time_for(&self, fixes: usize) -> Duration {
        u32::try_from(fixes)
            .ok()
            .and_then(|fixes| self.interval.checked_mul(fixes))
            .unwrap_or(Duration::MAX)
    }
}

/// Position and rng of the walker, shared between subscriptions so a restart picks up where the
/// last watch left off
#[derive(Debug)]
pub struct Walker {
    rng: ChaCha20Rng,
    lat: f64,
    long: f64,
    heading: f64,
    fixes: usize,
}

impl Walker {
    pub fn new(settings: &WalkSettings) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(settings.seed);
        let heading = rng.random_range(0.0..360.0);
        Self {
            rng,
            lat: settings.start.0,
            long: settings.start.1,
            heading,
            fixes: 0,
        }
    }

    pub fn fixes(&self) -> usize {
        self.fixes
    }

    /// Produce the next fix
    pub fn step(&mut self, settings: &WalkSettings, timestamp: i64) -> RawFix {
        let stand_still = self.rng.random_ratio(settings.stand_still_chance.min(100), 100);

        if !stand_still {
            self.heading = (self.heading + self.rng.random_range(-30.0..30.0)).rem_euclid(360.0);
            let rad = self.heading.to_radians();
            let north = settings.step_meters * rad.cos();
            let east = settings.step_meters * rad.sin();
            self.lat += north / METERS_PER_DEGREE;
            self.long += east / (METERS_PER_DEGREE * self.lat.to_radians().cos());
        }

        let speed = if stand_still {
            0.0
        } else {
            settings.step_meters / settings.interval.as_secs_f64().max(0.001)
        };

        self.fixes += 1;

        RawFix {
            lat: self.lat,
            long: self.long,
            accuracy: self.rng.random_range(3.0..12.0),
            heading: (!stand_still).then_some(self.heading),
            speed: Some(speed),
            timestamp,
        }
    }
}

/// A [PositionSource] that takes a seeded random walk
pub struct SimulatedSource {
    settings: WalkSettings,
    walker: Arc<Mutex<Walker>>,
}

impl SimulatedSource {
    pub fn new(settings: WalkSettings) -> Self {
        let walker = Arc::new(Mutex::new(Walker::new(&settings)));
        Self { settings, walker }
    }

    async fn walk(
        walker: Arc<Mutex<Walker>>,
        settings: WalkSettings,
        options: WatchOptions,
        sink: WatchSink,
        cancel: CancellationToken,
    ) {
        if settings.deny_permission {
            sink.fail(PositionError::permission_denied());
            return;
        }

        if settings.interval.is_zero() {
            warn!(
                "Walk interval for watch {} is zero, no fixes can be produced",
                sink.watch_id()
            );
            sink.fail(PositionError::position_unavailable());
            return;
        }

        let mut interval = tokio::time::interval(settings.interval);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                _ = interval.tick() => {
                    let mut walker = walker.lock().await;

                    if settings.max_fixes.is_some_and(|max| walker.fixes() >= max) {
                        debug!("Walk for watch {} finished", sink.watch_id());
                        break;
                    }

                    if settings.stall_after.is_some_and(|stall| walker.fixes() >= stall) {
                        drop(walker);
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(options.timeout_duration()) => {
                                sink.fail(PositionError::timeout());
                            }
                        }
                        break;
                    }

                    let fix = walker.step(&settings, Utc::now().timestamp_millis());
                    if !sink.deliver(fix) {
                        break;
                    }
                }
            }
        }
    }
}

impl PositionSource for SimulatedSource {
    type Watch = CancellationToken;

    fn is_available(&self) -> bool {
        self.settings.available
    }

    fn subscribe(&self, options: WatchOptions, sink: WatchSink) -> Self::Watch {
        let cancel = CancellationToken::new();
        debug!(
            "Starting simulated walk for watch {} (high accuracy: {})",
            sink.watch_id(),
            options.enable_high_accuracy
        );
        tokio::spawn(Self::walk(
            self.walker.clone(),
            self.settings.clone(),
            options,
            sink,
            cancel.clone(),
        ));
        cancel
    }

    fn unsubscribe(&self, watch: Self::Watch) {
        watch.cancel();
    }
}
