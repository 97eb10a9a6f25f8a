use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::prelude::*;

use crate::{
    error::{PositionError, TrackingErrorKind},
    location::{GeoSample, RawFix},
    source::{PositionSource, TRACKING_WATCH_OPTIONS, WatchId, WatchSink},
    tracker_state::{TrackerSnapshot, TrackerState},
};

pub type Id = Uuid;

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

pub trait StateUpdateSender {
    fn send_update(&self);
}

/// Something that wants to see every sample the session accepts (including ones that were
/// coalesced into the last path point). Observers can't influence the session.
pub trait SampleObserver: Send + Sync {
    fn on_sample(&self, session: Id, sample: &GeoSample);
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    Start,
    Stop,
    Fix(WatchId, RawFix),
    Error(WatchId, PositionError),
    /// Reply once everything before this has been handled
    Sync(oneshot::Sender<()>),
}

type EventQueue = (
    mpsc::UnboundedSender<SessionEvent>,
    Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
);

struct ActiveWatch<W> {
    id: WatchId,
    handle: W,
}

/// Everything the main loop mutates, lives on the loop's stack so nothing else can touch it
struct LoopState<W> {
    tracker: TrackerState,
    /// Only [Option::Some] while the tracker is active
    active: Option<ActiveWatch<W>>,
    last_watch: WatchId,
}

impl<W> LoopState<W> {
    fn is_current(&self, watch: WatchId) -> bool {
        self.active.as_ref().is_some_and(|active| active.id == watch)
    }
}

/// A tracking session, turns fixes from a [PositionSource] into a path.
///
/// All state changes happen inside [TrackingSession::main_loop], commands and fixes are
/// queued and handled one at a time in the order they arrived. Consumers read immutable
/// snapshots with [TrackingSession::snapshot] or [TrackingSession::watch_snapshots] and get
/// poked through the [StateUpdateSender] whenever a new one is published.
pub struct TrackingSession<P: PositionSource, S: StateUpdateSender> {
    id: Id,
    source: P,
    state_update_sender: S,
    observers: Vec<Box<dyn SampleObserver>>,
    events: EventQueue,
    snapshot: watch::Sender<Arc<TrackerSnapshot>>,
    cancel: CancellationToken,
}

impl<P: PositionSource, S: StateUpdateSender> TrackingSession<P, S> {
    pub fn new(source: P, state_update_sender: S) -> Self {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(Arc::new(TrackerState::new(id).as_snapshot()));

        Self {
            id,
            source,
            state_update_sender,
            observers: Vec::new(),
            events: (tx, Mutex::new(rx)),
            snapshot,
            cancel: CancellationToken::new(),
        }
    }

    /// Register an observer, must be done before the main loop starts
    pub fn with_observer(mut self, observer: impl SampleObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn id(&self) -> Id {
        self.id
    }

    fn push_event(&self, event: SessionEvent) {
        if self.events.0.send(event).is_err() {
            debug!("Session {} has shut down, dropping command", self.id);
        }
    }

    /// Begin (or restart) tracking, replaces any live watch
    pub fn start(&self) {
        self.push_event(SessionEvent::Start);
    }

    /// Stop tracking. A failed session stays failed with its error and an idle (never started)
    /// session stays idle, in both cases any live watch is still ended.
    pub fn stop(&self) {
        self.push_event(SessionEvent::Stop);
    }

    /// Wait until every command and fix queued before this call has been handled.
    /// Returns right away if the main loop has exited, waits for it to start otherwise.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.push_event(SessionEvent::Sync(tx));
        rx.await.ok();
    }

    pub fn snapshot(&self) -> Arc<TrackerSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<TrackerSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Stop the main loop, any live watch is unsubscribed on the way out
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn publish(&self, tracker: &TrackerState) {
        self.snapshot.send_replace(Arc::new(tracker.as_snapshot()));
        self.state_update_sender.send_update();
    }

    fn end_watch(&self, state: &mut LoopState<P::Watch>) {
        if let Some(watch) = state.active.take() {
            debug!("Session {}: ending watch {}", self.id, watch.id);
            self.source.unsubscribe(watch.handle);
        }
    }

    fn handle_start(&self, state: &mut LoopState<P::Watch>) {
        self.end_watch(state);

        if !self.source.is_available() {
            warn!("Session {}: no location capability on this platform", self.id);
            state.tracker.fail(TrackingErrorKind::CapabilityUnavailable);
            self.publish(&state.tracker);
            return;
        }

        state.tracker.activate();

        state.last_watch += 1;
        let id = state.last_watch;
        let sink = WatchSink::new(id, self.events.0.clone());
        let handle = self.source.subscribe(TRACKING_WATCH_OPTIONS, sink);
        state.active = Some(ActiveWatch { id, handle });

        info!("Session {} tracking with watch {id}", self.id);
        self.publish(&state.tracker);
    }

    fn handle_stop(&self, state: &mut LoopState<P::Watch>) {
        self.end_watch(state);

        let before = state.tracker.status();
        state.tracker.stop();

        if state.tracker.status() != before {
            info!("Session {} stopped", self.id);
            self.publish(&state.tracker);
        }
    }

    fn handle_fix(&self, state: &mut LoopState<P::Watch>, watch: WatchId, fix: RawFix) {
        if !state.is_current(watch) {
            debug!("Session {}: dropping fix from stale watch {watch}", self.id);
            return;
        }

        let sample = GeoSample::from(fix);

        if !state.tracker.accept_sample(sample).accepted() {
            return;
        }

        for observer in self.observers.iter() {
            observer.on_sample(self.id, &sample);
        }

        self.publish(&state.tracker);
    }

    fn handle_error(&self, state: &mut LoopState<P::Watch>, watch: WatchId, error: PositionError) {
        if !state.is_current(watch) {
            debug!("Session {}: dropping error from stale watch {watch}: {error}", self.id);
            return;
        }

        self.end_watch(state);

        let kind = error.kind();
        warn!("Session {}: location error {error}, failing with {kind:?}", self.id);
        state.tracker.fail(kind);
        self.publish(&state.tracker);
    }

    fn handle_event(&self, state: &mut LoopState<P::Watch>, event: SessionEvent) {
        match event {
            SessionEvent::Start => self.handle_start(state),
            SessionEvent::Stop => self.handle_stop(state),
            SessionEvent::Fix(watch, fix) => self.handle_fix(state, watch, fix),
            SessionEvent::Error(watch, error) => self.handle_error(state, watch, error),
            SessionEvent::Sync(done) => {
                done.send(()).ok();
            }
        }
    }

    /// Main loop of the session, handles commands and fixes until [TrackingSession::shutdown]
    /// is called. Returns the final snapshot.
    pub async fn main_loop(&self) -> Result<TrackerSnapshot> {
        let Ok(mut rx) = self.events.1.try_lock() else {
            bail!("Main loop for session {} is already running", self.id);
        };

        if rx.is_closed() {
            bail!("Session {} has already shut down", self.id);
        }

        let mut state = LoopState {
            tracker: TrackerState::new(self.id),
            active: None,
            last_watch: 0,
        };

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                event = rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(&mut state, event),
                        None => break,
                    }
                }
            }
        }

        self.end_watch(&mut state);

        // Anything still queued is dropped, this also wakes up pending syncs
        rx.close();
        while rx.try_recv().is_ok() {}

        info!(
            "Session {} shut down with {} points",
            self.id,
            state.tracker.path().len()
        );

        Ok(state.tracker.as_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::{task::JoinHandle, test};

    use super::*;
    use crate::{
        error::{PERMISSION_DENIED, POSITION_UNAVAILABLE, TIMEOUT},
        tests::{CountingSender, DummySender, MockPositionSource, RecordingObserver, fix},
        tracker_state::TrackingStatus,
    };

    type TestSession = TrackingSession<MockPositionSource, DummySender>;

    type LoopHandle = JoinHandle<Result<TrackerSnapshot>>;

    fn spawn_loop<S: StateUpdateSender + Send + Sync + 'static>(
        session: &Arc<TrackingSession<MockPositionSource, S>>,
    ) -> LoopHandle {
        let session = session.clone();
        tokio::spawn(async move { session.main_loop().await })
    }

    fn mk_session() -> (Arc<TestSession>, MockPositionSource, LoopHandle) {
        let source = MockPositionSource::new();
        let session = Arc::new(TestSession::new(source.clone(), DummySender));
        let handle = spawn_loop(&session);
        (session, source, handle)
    }

    #[test]
    async fn test_end_to_end() {
        let (session, source, _handle) = mk_session();

        session.start();
        session.sync().await;

        assert_eq!(source.live_count(), 1);
        assert_eq!(source.last_options(), Some(TRACKING_WATCH_OPTIONS));
        assert_eq!(session.snapshot().status, TrackingStatus::Active);

        source.deliver(fix(40.0, -74.0, 1000));
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.status, TrackingStatus::Active);
        assert_eq!(snap.path.len(), 1);
        assert_eq!(snap.path[0].lat, 40.0);
        assert_eq!(snap.path[0].long, -74.0);
        assert_eq!(snap.path[0].accuracy, 5.0);
        assert_eq!(snap.current, Some(snap.path[0]));

        source.deliver(fix(40.0, -74.0, 2000));
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.path.len(), 1);
        assert_eq!(snap.current.map(|c| c.timestamp), Some(2000));

        let stale = source.latest_sink().expect("Should have subscribed");

        session.stop();
        session.sync().await;

        assert_eq!(session.snapshot().status, TrackingStatus::Stopped);
        assert_eq!(source.live_count(), 0);

        // Arrives after stop was handled, must be dropped
        stale.deliver(fix(41.0, -75.0, 3000));
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.status, TrackingStatus::Stopped);
        assert_eq!(snap.path.len(), 1);
        assert_eq!(snap.current.map(|c| c.timestamp), Some(2000));
    }

    #[test]
    async fn test_duplicate_coalescing() {
        let (session, source, _handle) = mk_session();

        session.start();
        session.sync().await;
        source.deliver(fix(1.0, 1.0, 1));
        source.deliver(fix(1.0, 1.0, 2));
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.path.len(), 1);
        assert_eq!(snap.path[0].timestamp, 1);
        assert_eq!(snap.current.map(|c| c.timestamp), Some(2));

        source.deliver(fix(2.0, 2.0, 3));
        session.sync().await;

        let snap = session.snapshot();
        let stamps = snap.path.iter().map(|s| s.timestamp).collect::<Vec<_>>();
        assert_eq!(stamps, vec![1, 3]);
        assert_eq!(snap.current.map(|c| c.timestamp), Some(3));
    }

    #[test]
    async fn test_fix_queued_after_stop_dropped() {
        let (session, source, _handle) = mk_session();

        session.start();
        session.sync().await;
        let sink = source.latest_sink().expect("Should have subscribed");
        // Fix is in flight when stop is requested
        session.stop();
        sink.deliver(fix(5.0, 5.0, 1));
        session.sync().await;

        assert!(session.snapshot().path.is_empty());
    }

    #[test]
    async fn test_double_start_single_subscription() {
        let (session, source, _handle) = mk_session();

        session.start();
        session.start();
        session.sync().await;

        assert_eq!(source.subscribe_calls(), 2);
        assert_eq!(source.live_count(), 1);

        let sinks = source.all_sinks();
        assert_eq!(sinks.len(), 2);
        assert!(sinks[0].watch_id() < sinks[1].watch_id());

        sinks[0].deliver(fix(1.0, 1.0, 1));
        sinks[1].deliver(fix(2.0, 2.0, 2));
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.path.len(), 1);
        assert_eq!(snap.path[0].lat, 2.0);
    }

    #[test]
    async fn test_stop_idempotent() {
        let (session, source, _handle) = mk_session();

        session.stop();
        session.stop();
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.status, TrackingStatus::Idle);
        assert!(snap.path.is_empty());
        assert!(snap.current.is_none());

        session.start();
        session.sync().await;
        source.deliver(fix(1.0, 1.0, 1));
        session.stop();
        session.sync().await;
        let before = session.snapshot();

        session.stop();
        session.sync().await;
        let after = session.snapshot();

        assert_eq!(after.status, TrackingStatus::Stopped);
        assert_eq!(before.path, after.path);
        assert_eq!(before.current, after.current);
        assert_eq!(source.live_count(), 0);
    }

    #[test]
    async fn test_error_mapping() {
        let cases = [
            (PERMISSION_DENIED, TrackingErrorKind::PermissionDenied),
            (POSITION_UNAVAILABLE, TrackingErrorKind::PositionUnavailable),
            (TIMEOUT, TrackingErrorKind::Timeout),
            (77, TrackingErrorKind::Unknown),
        ];

        for (code, kind) in cases {
            let (session, source, _handle) = mk_session();

            session.start();
            session.sync().await;
            source.fail(PositionError::new(code, "platform said no"));
            session.sync().await;

            let snap = session.snapshot();
            assert_eq!(snap.status, TrackingStatus::Failed, "Code {code}");
            assert_eq!(snap.error_kind, Some(kind), "Code {code}");
            assert_eq!(
                snap.last_error.as_deref(),
                Some(kind.message()),
                "Code {code}"
            );
            assert_eq!(source.live_count(), 0, "Code {code} left a watch live");

            // A misbehaving source keeps delivering after the error
            let sink = source.latest_sink().expect("Should have subscribed");
            sink.deliver(fix(1.0, 1.0, 1));
            session.sync().await;
            assert!(session.snapshot().path.is_empty(), "Code {code}");
        }
    }

    #[test]
    async fn test_restart_after_failure() {
        let (session, source, _handle) = mk_session();

        session.start();
        session.sync().await;
        source.deliver(fix(1.0, 1.0, 1));
        source.fail(PositionError::timeout());
        session.sync().await;

        assert_eq!(session.snapshot().status, TrackingStatus::Failed);

        session.start();
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.status, TrackingStatus::Active);
        assert!(snap.last_error.is_none());
        assert!(snap.error_kind.is_none());

        source.deliver(fix(2.0, 2.0, 2));
        session.sync().await;

        let snap = session.snapshot();
        let lats = snap.path.iter().map(|s| s.lat).collect::<Vec<_>>();
        assert_eq!(lats, vec![1.0, 2.0]);
    }

    #[test]
    async fn test_stop_after_failure_keeps_error() {
        let (session, source, _handle) = mk_session();

        session.start();
        session.sync().await;
        source.fail(PositionError::permission_denied());
        session.stop();
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.status, TrackingStatus::Failed);
        assert_eq!(
            snap.last_error.as_deref(),
            Some(TrackingErrorKind::PermissionDenied.message())
        );
    }

    #[test]
    async fn test_capability_unavailable() {
        let source = MockPositionSource::unavailable();
        let session = Arc::new(TestSession::new(source.clone(), DummySender));
        let _handle = spawn_loop(&session);

        session.start();
        session.sync().await;

        let snap = session.snapshot();
        assert_eq!(snap.status, TrackingStatus::Failed);
        assert_eq!(
            snap.error_kind,
            Some(TrackingErrorKind::CapabilityUnavailable)
        );
        assert_eq!(source.subscribe_calls(), 0);

        // Retrying fails the same way
        session.start();
        session.sync().await;
        assert_eq!(session.snapshot().status, TrackingStatus::Failed);
        assert_eq!(source.subscribe_calls(), 0);
    }

    #[test]
    async fn test_observers_see_accepted_samples() {
        let source = MockPositionSource::new();
        let observer = RecordingObserver::default();
        let session = Arc::new(
            TestSession::new(source.clone(), DummySender).with_observer(observer.clone()),
        );
        let _handle = spawn_loop(&session);

        session.start();
        session.sync().await;
        source.deliver(fix(1.0, 1.0, 1));
        source.deliver(fix(1.0, 1.0, 2));
        session.sync().await;
        let stale = source.latest_sink().expect("Should have subscribed");
        session.stop();
        stale.deliver(fix(3.0, 3.0, 3));
        session.sync().await;

        let seen = observer.samples();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(id, _)| *id == session.id()));
        let stamps = seen.iter().map(|(_, s)| s.timestamp).collect::<Vec<_>>();
        assert_eq!(stamps, vec![1, 2]);
    }

    #[test]
    async fn test_state_updates_sent() {
        let source = MockPositionSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(TrackingSession::new(
            source.clone(),
            CountingSender(count.clone()),
        ));
        let _handle = spawn_loop(&session);

        session.start();
        session.sync().await;
        source.deliver(fix(1.0, 1.0, 1));
        session.stop();
        session.stop();
        session.sync().await;

        // start, fix, first stop
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    async fn test_watch_snapshots() {
        let (session, source, _handle) = mk_session();
        let mut rx = session.watch_snapshots();

        session.start();
        rx.changed().await.expect("Sender dropped");
        assert!(rx.borrow_and_update().is_tracking());

        source.deliver(fix(1.0, 2.0, 1));
        rx.changed().await.expect("Sender dropped");
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.path.len(), 1);
        assert_eq!(snap.id, session.id());
    }

    #[test]
    async fn test_shutdown() {
        let (session, source, handle) = mk_session();

        session.start();
        session.sync().await;
        source.deliver(fix(1.0, 1.0, 1));
        session.sync().await;

        session.shutdown();
        let last = handle
            .await
            .expect("Failed to join")
            .expect("Loop errored");

        assert_eq!(last.path.len(), 1);
        assert_eq!(source.live_count(), 0);

        // Neither of these should hang once the loop is gone
        session.start();
        session.sync().await;

        assert!(session.main_loop().await.is_err());
    }

    #[test]
    async fn test_main_loop_twice() {
        let (session, _source, _handle) = mk_session();
        session.sync().await;
        assert!(session.main_loop().await.is_err());
    }
}
