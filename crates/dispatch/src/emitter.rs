//! Stream emitter — multiplexes node-produced frames into one ordered
//! output stream.
//!
//! The emitter wraps an `mpsc` sender. When the receiving transport closes
//! (client disconnect), sends start failing; the emitter latches shut and
//! silently drops further frames so in-flight executors can finish without
//! writing to a dead connection.
//!
//! A pending *preface* frame (the run metadata) is flushed immediately
//! before the first answer fragment, guaranteeing the metadata-first wire
//! contract regardless of which node produces the first fragment.

use promptweave_core::event::FlowStreamEvent;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct StreamEmitter {
    tx: Option<mpsc::Sender<FlowStreamEvent>>,
    open: Arc<AtomicBool>,
    wrote: Arc<AtomicBool>,
    preface: Arc<Mutex<Option<FlowStreamEvent>>>,
}

impl StreamEmitter {
    /// Create an emitter and the receiver the transport drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<FlowStreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx: Some(tx),
                open: Arc::new(AtomicBool::new(true)),
                wrote: Arc::new(AtomicBool::new(false)),
                preface: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// An emitter for non-streaming runs: every frame is dropped.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            open: Arc::new(AtomicBool::new(false)),
            wrote: Arc::new(AtomicBool::new(false)),
            preface: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether this run streams at all.
    pub fn is_streaming(&self) -> bool {
        self.tx.is_some()
    }

    /// Whether at least one frame reached the transport.
    pub fn has_written(&self) -> bool {
        self.wrote.load(Ordering::Acquire)
    }

    /// Stage (or replace) the frame sent ahead of the first answer
    /// fragment.
    pub fn set_preface(&self, event: FlowStreamEvent) {
        *self.preface.lock().expect("preface lock poisoned") = Some(event);
    }

    /// Remove and return a still-unsent preface frame.
    pub fn take_preface(&self) -> Option<FlowStreamEvent> {
        self.preface.lock().expect("preface lock poisoned").take()
    }

    /// Send one frame. An answer fragment flushes the preface first. A
    /// failed send (receiver dropped) closes the emitter.
    pub async fn send(&self, event: FlowStreamEvent) {
        if matches!(event, FlowStreamEvent::Answer { .. }) {
            if let Some(preface) = self.take_preface() {
                self.send_raw(preface).await;
            }
        }
        self.send_raw(event).await;
    }

    async fn send_raw(&self, event: FlowStreamEvent) {
        let Some(tx) = &self.tx else { return };
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        if tx.send(event).await.is_err() {
            debug!("Stream receiver dropped, closing emitter");
            self.open.store(false, Ordering::Release);
        } else {
            self.wrote.store(true, Ordering::Release);
        }
    }
}
