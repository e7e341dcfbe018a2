//! Capture source fed by the host application.

use super::CaptureSource;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioFrame;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

type Slot = Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>;

/// A [`CaptureSource`] whose frames come from a [`FramePusher`].
///
/// Frames pushed while the source is stopped are discarded.
pub struct PushCapture {
    slot: Slot,
    denied: Option<String>,
}

/// Host-side handle used to push frames into a [`PushCapture`].
#[derive(Clone)]
pub struct FramePusher {
    slot: Slot,
}

impl PushCapture {
    pub fn new() -> (Self, FramePusher) {
        let slot: Slot = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
                denied: None,
            },
            FramePusher { slot },
        )
    }

    /// Make every `start` fail with a permission error, as a host does when
    /// the user refused microphone access.
    pub fn deny_permission(&mut self, reason: impl Into<String>) {
        self.denied = Some(reason.into());
    }
}

#[async_trait]
impl CaptureSource for PushCapture {
    async fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()> {
        if let Some(reason) = &self.denied {
            return Err(SpeechError::Permission(reason.clone()));
        }
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| SpeechError::Audio("capture slot poisoned".into()))?;
        *slot = Some(frames);
        debug!("push capture armed");
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }
}

impl FramePusher {
    /// Push one frame. Returns `false` if the source is not running or the
    /// consumer has gone away.
    pub async fn push(&self, frame: AudioFrame) -> bool {
        let tx = match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Whether a consumer is currently attached.
    pub fn is_armed(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}
