use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use geotrail_logic::{
    PositionSource, StateUpdateSender, TRACKING_WATCH_OPTIONS, TrackingSession, TrackingStatus,
};
use geotrail_sim::{ReplaySource, SimulatedSource, WalkSettings, prelude::*};
use geotrail_transport::RemoteSampleSink;
use log::{debug, info, warn};

/// Extra time given to the stream after it should have played out
const GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(version, about = "Record a trail from a simulated or recorded location stream")]
struct Cli {
    /// Forward every accepted sample to the location server
    #[arg(long)]
    emit: bool,

    /// Location server to forward to instead of the built in one
    #[arg(long, requires = "emit")]
    server: Option<String>,

    /// Print the final snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Stop after this many seconds instead of when the stream runs out
    #[arg(long)]
    duration: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a seeded random walk
    Walk {
        /// Seed for the walk
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Starting latitude
        #[arg(long, default_value_t = 40.0, allow_hyphen_values = true)]
        lat: f64,
        /// Starting longitude
        #[arg(long, default_value_t = -74.0, allow_hyphen_values = true)]
        long: f64,
        /// Milliseconds between fixes
        #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: u64,
        /// Number of fixes to produce
        #[arg(long, default_value_t = 30)]
        fixes: usize,
        /// Chance out of 100 of standing still for a fix
        #[arg(long, default_value_t = 20)]
        stand_still: u32,
        /// Go quiet after this many fixes so the watch times out
        #[arg(long)]
        stall_after: Option<usize>,
        /// Refuse location permission
        #[arg(long)]
        deny: bool,
        /// Pretend there's no location support
        #[arg(long)]
        unavailable: bool,
    },
    /// Play back a JSON-lines recording
    Replay {
        /// Path to the recording
        file: PathBuf,
        /// Playback speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
}

struct LogUpdateSender;

impl StateUpdateSender for LogUpdateSender {
    fn send_update(&self) {
        debug!("Session state updated");
    }
}

struct RunOptions {
    emit: bool,
    server: Option<String>,
    json: bool,
    run_for: Duration,
}

async fn run<P: PositionSource + 'static>(source: P, opts: RunOptions) -> Result {
    let mut session = TrackingSession::new(source, LogUpdateSender);
    let mut forwarder = None;

    if opts.emit {
        let (sink, handle) = match opts.server {
            Some(url) => RemoteSampleSink::with_base_url(url),
            None => RemoteSampleSink::spawn(),
        }
        .context("Failed to set up location forwarding")?;
        session = session.with_observer(sink);
        forwarder = Some(handle);
    }

    let session = Arc::new(session);

    let main_loop = tokio::spawn({
        let session = session.clone();
        async move { session.main_loop().await }
    });

    let mut snapshots = session.watch_snapshots();
    session.start();

    info!(
        "Tracking session {} for up to {:.1}s",
        session.id(),
        opts.run_for.as_secs_f64()
    );

    let deadline = tokio::time::sleep(opts.run_for);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
            Ok(_) = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            res = snapshots.changed() => {
                if res.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                info!("{}", snap.stats());
                if snap.status == TrackingStatus::Failed {
                    warn!(
                        "Tracking failed: {}",
                        snap.last_error.as_deref().unwrap_or("no reason given")
                    );
                    break;
                }
            }
        }
    }

    session.stop();
    session.sync().await;
    session.shutdown();

    let last = main_loop.await.context("Session loop panicked")??;

    // The sink lives in the session, the forwarder only finishes once both are gone
    drop(session);

    if let Some(forwarder) = forwarder {
        let failed = forwarder.await.context("Location forwarder panicked")?;
        if failed > 0 {
            warn!("{failed} location updates could not be forwarded");
        } else {
            info!("Every location update was forwarded");
        }
    }

    if opts.json {
        let encoded = serde_json::to_string_pretty(&last).context("Failed to encode snapshot")?;
        println!("{encoded}");
    } else {
        println!("Session {}: {:?}", last.id, last.status);
        println!("{}", last.stats());
        if let Some(err) = last.last_error.as_deref() {
            println!("Last error: {err}");
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let Cli {
        emit,
        server,
        json,
        duration,
        command,
    } = Cli::parse();

    let run_for = |expected: Option<Duration>| {
        duration
            .map(Duration::from_secs)
            .or(expected.map(|e| e.saturating_add(GRACE)))
            .unwrap_or(Duration::MAX)
    };

    match command {
        Commands::Walk {
            seed,
            lat,
            long,
            interval_ms,
            fixes,
            stand_still,
            stall_after,
            deny,
            unavailable,
        } => {
            let settings = WalkSettings {
                seed,
                start: (lat, long),
                interval: Duration::from_millis(interval_ms),
                stand_still_chance: stand_still,
                max_fixes: Some(fixes),
                stall_after,
                deny_permission: deny,
                available: !unavailable,
                ..Default::default()
            };
            let opts = RunOptions {
                emit,
                server,
                json,
                run_for: run_for(settings.expected_duration(&TRACKING_WATCH_OPTIONS)),
            };
            run(SimulatedSource::new(settings), opts).await
        }
        Commands::Replay { file, speed } => {
            let source = ReplaySource::load(&file, speed)?;
            if source.is_empty() {
                bail!("Recording {} has no entries", file.display());
            }
            let opts = RunOptions {
                emit,
                server,
                json,
                run_for: run_for(Some(source.span())),
            };
            run(source, opts).await
        }
    }
}
