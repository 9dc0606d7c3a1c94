//! Cache invalidation: periodic ETag polling and an optional push channel,
//! converging on one idempotent purge routine.

use crate::cache::MegCaches;
use crate::error::{MegError, Result};
use crate::store::{resolve_stored, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll cadence when no push channel is supplied.
pub const POLL_INTERVAL: Duration = Duration::from_secs(150);
/// Floor for the poll cadence; misconfiguration cannot tighten it below
/// this.
pub const MIN_CYCLE: Duration = Duration::from_secs(60);
/// Budget for one poll iteration; an overrun abandons the cycle.
pub const CYCLE_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Delete,
    Modify,
    Create,
}

/// One event from a store-side notification channel.
#[derive(Debug, Clone)]
pub struct BucketNotification {
    pub change: ChangeKind,
    pub path: String,
    pub etag: Option<String>,
}

pub struct Invalidator {
    store: Arc<dyn ObjectStore>,
    caches: Arc<MegCaches>,
    interval: Duration,
}

impl Invalidator {
    pub fn new(store: Arc<dyn ObjectStore>, caches: Arc<MegCaches>) -> Self {
        Invalidator {
            store,
            caches,
            interval: POLL_INTERVAL,
        }
    }

    /// Override the poll cadence (clamped to [`MIN_CYCLE`]). Tests use
    /// this; production sticks with the default.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_CYCLE);
        self
    }

    /// Start the background task. A push channel replaces polling; without
    /// one, the periodic ETag poll runs until the token cancels.
    pub fn spawn(
        self,
        push: Option<mpsc::Receiver<BucketNotification>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        match push {
            Some(rx) => tokio::spawn(async move { self.run_push(rx, cancel).await }),
            None => tokio::spawn(async move { self.run_periodic(cancel).await }),
        }
    }

    pub async fn run_periodic(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(MIN_CYCLE));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would race startup; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match tokio::time::timeout(CYCLE_TIMEOUT, self.poll_cycle()).await {
                        Ok(()) => {}
                        Err(_) => warn!(
                            budget_secs = CYCLE_TIMEOUT.as_secs(),
                            "invalidation cycle exceeded its budget; abandoned"
                        ),
                    }
                }
            }
        }
        debug!("periodic invalidator stopped");
    }

    /// One poll iteration. With an empty ETag map the pass reseeds it from
    /// whatever the archive cache holds; otherwise every known ETag is
    /// revalidated with a conditional GET.
    pub async fn poll_cycle(&self) {
        if self.caches.etags.is_empty() {
            for name in self.caches.archives.names().await {
                match self.head_with_retry(&name).await {
                    Ok(Some(etag)) => self.caches.etags.set(&name, etag),
                    Ok(None) => {}
                    Err(err) => warn!(archive = %name, error = %err, "etag reseed failed"),
                }
            }
            return;
        }

        for (name, etag) in self.caches.etags.snapshot() {
            if let Err(err) = self.revalidate(&name, &etag).await {
                warn!(archive = %name, error = %err, "revalidation failed; keeping caches");
            }
        }
    }

    async fn head_with_retry(&self, name: &str) -> Result<Option<String>> {
        match resolve_stored(self.store.as_ref(), name).await {
            Ok((_, head)) => Ok(head.etag),
            // One retry on transport trouble; anything else is final.
            Err(MegError::Transport(_)) => {
                let (_, head) = resolve_stored(self.store.as_ref(), name).await?;
                Ok(head.etag)
            }
            Err(err) => Err(err),
        }
    }

    /// Conditional GET against the last seen ETag. A change purges the
    /// index and either refreshes the archive body (when one was cached)
    /// or purges it too.
    async fn revalidate(&self, name: &str, etag: &str) -> Result<()> {
        let (stored_key, _) = resolve_stored(self.store.as_ref(), name).await?;

        let got = match self.store.get(&stored_key, None, Some(etag)).await {
            Ok(got) => got,
            Err(MegError::Transport(_)) => self.store.get(&stored_key, None, Some(etag)).await?,
            Err(err) => return Err(err),
        };
        if got.not_modified {
            return Ok(());
        }

        debug!(archive = name, "etag changed; invalidating");
        self.caches.indexes.purge(name).await;
        self.caches.heads.purge(name).await;
        if self.caches.archives.get(name).await.is_some() {
            self.caches.archives.set(name, got.body, None).await;
        } else {
            self.caches.archives.purge(name).await;
        }
        if let Some(new_etag) = got.etag {
            self.caches.etags.set(name, new_etag);
        }
        Ok(())
    }

    /// Single-subscriber push listener. Delete and modify purge; create is
    /// observed but purges nothing.
    pub async fn run_push(
        &self,
        mut rx: mpsc::Receiver<BucketNotification>,
        cancel: CancellationToken,
    ) {
        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(n) => n,
                    None => break,
                },
            };
            self.apply(notification).await;
        }
        debug!("push invalidator stopped");
    }

    pub async fn apply(&self, notification: BucketNotification) {
        let name = notification.path.as_str();
        match notification.change {
            ChangeKind::Delete => {
                debug!(archive = name, "purging on delete notification");
                self.caches.purge_archive(name).await;
                self.caches.etags.remove(name);
            }
            ChangeKind::Modify => {
                debug!(archive = name, "purging on modify notification");
                self.caches.purge_archive(name).await;
                if let Some(etag) = notification.etag {
                    self.caches.etags.set(name, etag);
                }
            }
            ChangeKind::Create => {
                debug!(archive = name, "create notification observed");
            }
        }
    }
}
