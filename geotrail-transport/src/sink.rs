use geotrail_logic::{GeoSample, Id, SampleObserver, prelude::*};
use log::{debug, warn};
use reqwest::Client;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{LocationUpdate, server};

/// Background task posting updates, resolves to the number of failed posts once every
/// [RemoteSampleSink] feeding it is dropped
pub type ForwarderHandle = JoinHandle<usize>;

/// Forwards every accepted sample to the location server. Samples are queued and posted one at
/// a time by a background task so they arrive in the order they were accepted, failed posts are
/// logged and dropped.
pub struct RemoteSampleSink {
    tx: mpsc::UnboundedSender<LocationUpdate>,
}

impl RemoteSampleSink {
    /// Spawn a sink posting to [server::DEFAULT_BASE_URL], must be called within a tokio runtime
    pub fn spawn() -> Result<(Self, ForwarderHandle)> {
        Self::with_base_url(server::DEFAULT_BASE_URL)
    }

    /// Spawn a sink posting to a custom server, must be called within a tokio runtime
    pub fn with_base_url(base: impl Into<String>) -> Result<(Self, ForwarderHandle)> {
        let base = base.into();
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::spawn_with(move |update| {
            let client = client.clone();
            let base = base.clone();
            async move { server::post_location(&client, &base, &update).await }
        }))
    }

    fn spawn_with<F, Fut>(post: F) -> (Self, ForwarderHandle)
    where
        F: FnMut(LocationUpdate) -> Fut + Send + 'static,
        Fut: Future<Output = Result> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(forward_loop(rx, post));
        (Self { tx }, handle)
    }
}

impl SampleObserver for RemoteSampleSink {
    fn on_sample(&self, session: Id, sample: &GeoSample) {
        let update = LocationUpdate {
            session,
            sample: *sample,
        };
        if self.tx.send(update).is_err() {
            warn!("Location forwarder for session {session} is gone, dropping sample");
        }
    }
}

/// Post updates until every sender is dropped. Returns how many posts failed.
async fn forward_loop<F, Fut>(mut rx: mpsc::UnboundedReceiver<LocationUpdate>, mut post: F) -> usize
where
    F: FnMut(LocationUpdate) -> Fut,
    Fut: Future<Output = Result>,
{
    let mut failed = 0;

    while let Some(update) = rx.recv().await {
        let session = update.session;
        match post(update).await {
            Ok(_) => debug!("Forwarded location for session {session}"),
            Err(why) => {
                failed += 1;
                warn!("Failed to forward location for session {session}: {why:?}");
            }
        }
    }

    failed
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use tokio::test;
    use uuid::Uuid;

    use super::*;

    fn sample(timestamp: i64) -> GeoSample {
        GeoSample {
            lat: 1.0,
            long: 2.0,
            accuracy: 3.0,
            heading: None,
            speed: Some(1.0),
            timestamp,
        }
    }

    #[test]
    async fn test_forward_in_order_and_count_failures() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = RemoteSampleSink { tx };
        let posted = Arc::new(Mutex::new(Vec::new()));

        let id = Uuid::new_v4();
        for ts in 0..5 {
            sink.on_sample(id, &sample(ts));
        }
        drop(sink);

        let failed = forward_loop(rx, {
            let posted = posted.clone();
            move |update: LocationUpdate| {
                let posted = posted.clone();
                async move {
                    let ts = update.sample.timestamp;
                    posted.lock().expect("Poisoned").push(update);
                    if ts == 3 {
                        Err(anyhow!("Server said no"))
                    } else {
                        Ok(())
                    }
                }
            }
        })
        .await;

        assert_eq!(failed, 1);
        let posted = posted.lock().expect("Poisoned");
        let stamps = posted.iter().map(|u| u.sample.timestamp).collect::<Vec<_>>();
        assert_eq!(stamps, vec![0, 1, 2, 3, 4]);
        assert!(posted.iter().all(|u| u.session == id));
    }

    #[test]
    async fn test_handle_reports_failures() {
        let (sink, handle) = RemoteSampleSink::spawn_with(|update: LocationUpdate| async move {
            if update.sample.timestamp % 2 == 0 {
                Err(anyhow!("Server said no"))
            } else {
                Ok(())
            }
        });

        let id = Uuid::new_v4();
        for ts in 0..5 {
            sink.on_sample(id, &sample(ts));
        }
        drop(sink);

        let failed = handle.await.expect("Forwarder panicked");
        assert_eq!(failed, 3);
    }

    #[test]
    async fn test_update_body() {
        let update = LocationUpdate {
            session: Uuid::nil(),
            sample: sample(42),
        };
        let value = serde_json::to_value(update).expect("Failed to encode");
        assert_eq!(value["sample"]["timestamp"], 42);
        assert_eq!(value["session"], "00000000-0000-0000-0000-000000000000");
    }
}
