//! Debounced status-board refreshing. State-change producers only signal
//! that a refresh is needed; a single consumer performs it and then sleeps
//! a fixed cooldown. Signals are coalesced: a burst of joins triggers one
//! refresh, and a signal landing during the cooldown is honored once it
//! elapses, so the final state is never dropped.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::error;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait BoardRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct RefreshQueue {
    notify: Arc<Notify>,
}

impl RefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }
}

pub struct RefreshWorker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RefreshWorker {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

pub fn spawn_refresh_worker(
    queue: &RefreshQueue,
    refresher: Arc<dyn BoardRefresher>,
    cooldown: Duration,
) -> RefreshWorker {
    let notify = queue.notify.clone();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = notify.notified() => {}
            }

            if let Err(err) = refresher.refresh().await {
                error!("board refresh failed: {err:#}");
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(cooldown) => {}
            }
        }
    });

    RefreshWorker { handle, cancel }
}
