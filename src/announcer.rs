//! Fire-and-forget spoken announcements. Each voice channel gets its own
//! queue with a dedicated consumer task, so the reconciler enqueues and
//! moves on without ever waiting on playback.

use std::{collections::HashMap, sync::Arc};

use log::error;
use tokio::sync::{mpsc, Mutex};

use crate::platform::{ChannelId, SpeechBackend, UserId};

#[derive(Debug, Clone)]
pub struct Announcement {
    pub user_id: UserId,
    pub text: String,
}

#[derive(Clone)]
pub struct VoiceAnnouncer {
    backend: Arc<dyn SpeechBackend>,
    channels: Arc<Mutex<HashMap<ChannelId, mpsc::UnboundedSender<Announcement>>>>,
}

impl VoiceAnnouncer {
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self {
            backend,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn enqueue(&self, channel: ChannelId, announcement: Announcement) {
        let mut channels = self.channels.lock().await;
        let sender = channels
            .entry(channel)
            .or_insert_with(|| spawn_consumer(channel, self.backend.clone()));

        if let Err(returned) = sender.send(announcement) {
            // The consumer task is gone; start a fresh one and requeue.
            let fresh = spawn_consumer(channel, self.backend.clone());
            let _ = fresh.send(returned.0);
            channels.insert(channel, fresh);
        }
    }

    /// Drop all queues; consumer tasks finish their backlog and exit.
    pub async fn shutdown(&self) {
        self.channels.lock().await.clear();
    }
}

fn spawn_consumer(
    channel: ChannelId,
    backend: Arc<dyn SpeechBackend>,
) -> mpsc::UnboundedSender<Announcement> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Announcement>();

    tokio::spawn(async move {
        while let Some(announcement) = rx.recv().await {
            if let Err(err) = backend
                .speak(channel, &announcement.text, announcement.user_id)
                .await
            {
                error!("voice announcement failed in channel {channel}: {err:#}");
            }
        }
    });

    tx
}
