// Progress bus: per-round ordered event queue bridging worker threads to one async consumer.

use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// One state change of an item or of the whole round. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Downloading {
        video_id: String,
        title: String,
    },
    Progress {
        video_id: String,
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    Merging {
        video_id: String,
        message: String,
    },
    Complete {
        video_id: String,
        title: String,
    },
    Error {
        video_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        message: String,
    },
    AllComplete {},
}

impl ProgressEvent {
    pub fn video_id(&self) -> Option<&str> {
        match self {
            ProgressEvent::Downloading { video_id, .. }
            | ProgressEvent::Progress { video_id, .. }
            | ProgressEvent::Merging { video_id, .. }
            | ProgressEvent::Complete { video_id, .. }
            | ProgressEvent::Error { video_id, .. } => Some(video_id),
            ProgressEvent::AllComplete {} => None,
        }
    }

    /// `complete` or `error`: exactly one per requested item per round.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }
}

/// What the consumer yields: a real event or an idle keepalive.
#[derive(Debug, Clone, PartialEq)]
pub enum BusFrame {
    Event(ProgressEvent),
    KeepAlive,
}

/// Producer side. Cheap to clone and safe to call from blocking threads.
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl BusSender {
    /// Enqueue an event. Sends into an abandoned bus are dropped silently.
    pub fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("progress bus consumer gone, event dropped");
        }
    }
}

/// Consumer side. Exactly one per round.
pub struct ProgressBus {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    keepalive: Duration,
    finished: bool,
}

impl ProgressBus {
    pub fn new(keepalive: Duration) -> (BusSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BusSender { tx },
            Self {
                rx,
                keepalive,
                finished: false,
            },
        )
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` after `all_complete` has been yielded, or if every
    /// producer went away without sending it.
    pub async fn next_frame(&mut self) -> Option<BusFrame> {
        if self.finished {
            return None;
        }

        match tokio::time::timeout(self.keepalive, self.rx.recv()).await {
            Ok(Some(event)) => {
                if matches!(event, ProgressEvent::AllComplete {}) {
                    self.finished = true;
                }
                Some(BusFrame::Event(event))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => Some(BusFrame::KeepAlive),
        }
    }

    /// Turn the bus into a stream that ends right after `all_complete`.
    pub fn into_stream(self) -> impl Stream<Item = BusFrame> + Send {
        stream::unfold(self, |mut bus| async move {
            let frame = bus.next_frame().await?;
            Some((frame, bus))
        })
    }
}
