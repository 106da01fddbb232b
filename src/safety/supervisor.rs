use super::weather::{WeatherRecord, WeatherSource};
use crate::{error, event, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Background poller keeping the latest weather snapshot current.
///
/// The snapshot lives in a `watch` channel: the poller only ever overwrites it and readers
/// never block on it. A failed poll leaves the previous record in place, so it ages out and
/// the safety gate closes on its own.
pub struct Supervisor {
    /// Station or file the readings come from.
    source: Arc<dyn WeatherSource>,
    /// Latest reading. `None` until the first successful poll.
    snapshot: watch::Sender<Option<WeatherRecord>>,
    /// Pause between two polls.
    poll_interval: Duration,
    /// Limit for a single poll, the poll interval capped at [`Self::MAX_POLL_TIMEOUT`].
    poll_timeout: Duration,
}

impl Supervisor {
    /// Upper bound for a single poll, independent of the poll interval.
    const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(20);

    /// Creates a new `Supervisor` together with the receiving end of its snapshot channel.
    pub fn new(
        source: Arc<dyn WeatherSource>,
        poll_interval: Duration,
    ) -> (Supervisor, watch::Receiver<Option<WeatherRecord>>) {
        let (tx, rx) = watch::channel(None);
        let poll_timeout = poll_interval.min(Self::MAX_POLL_TIMEOUT);
        (Self { source, snapshot: tx, poll_interval, poll_timeout }, rx)
    }

    /// Another reader of the snapshot channel.
    pub fn subscribe(&self) -> watch::Receiver<Option<WeatherRecord>> { self.snapshot.subscribe() }

    /// Polls once and publishes the result. Returns whether a new record was stored.
    pub async fn poll_once(&self) -> bool {
        let polled = tokio::time::timeout(self.poll_timeout, self.source.latest()).await;
        let record = match polled {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => return false,
            Ok(Err(e)) => {
                warn!("Polling {} failed: {e}", self.source.name());
                return false;
            }
            Err(_) => {
                warn!("Polling {} timed out after {:?}", self.source.name(), self.poll_timeout);
                return false;
            }
        };
        let previous = self.snapshot.send_replace(Some(record));
        match previous {
            Some(prev) if prev.safe && !record.safe => {
                error!("Weather turned unsafe at {}", record.timestamp.format("%H:%M:%S"));
            }
            Some(prev) if !prev.safe && record.safe => {
                info!("Weather is safe again at {}", record.timestamp.format("%H:%M:%S"));
            }
            _ => event!("Weather record: safe={} at {}", record.safe, record.timestamp),
        }
        true
    }

    /// Runs the polling loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Weather supervisor polling {} every {:?}", self.source.name(), self.poll_interval);
        loop {
            self.poll_once().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Weather supervisor stopped");
    }
}
