//! Bounded lock-free queues between the host thread and the audio thread.
//!
//! Control messages travel host → audio; status events travel audio → host.
//! Neither side ever blocks. A full control queue is reported to the host as
//! an error. A full status queue never stalls audio: positions are dropped
//! (a newer one follows shortly) and highlight ids are carried into the next
//! batch.

use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::error::EngineError;
use crate::messages::{ControlMessage, StatusEvent};

/// Host-side end of both queues.
pub struct EngineHandle {
    control: Producer<ControlMessage>,
    status: Consumer<StatusEvent>,
}

impl EngineHandle {
    /// Queue a control message for the next buffer.
    pub fn send(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        self.control
            .push(message)
            .map_err(|_| EngineError::ControlQueueFull)
    }

    /// Parse and queue a JSON control message.
    pub fn send_json(&mut self, json: &str) -> Result<(), EngineError> {
        self.send(ControlMessage::from_json(json)?)
    }

    /// Free slots in the control queue.
    pub fn control_slots(&self) -> usize {
        self.control.slots()
    }

    pub fn poll_status(&mut self) -> Option<StatusEvent> {
        self.status.pop().ok()
    }

    /// Everything currently waiting in the status queue.
    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        let mut out = Vec::with_capacity(self.status.slots());
        while let Ok(event) = self.status.pop() {
            out.push(event);
        }
        out
    }
}

/// Audio-side producer of status events with the overflow policy applied.
pub struct StatusSender {
    producer: Producer<StatusEvent>,
    pending_ids: Vec<String>,
    max_pending: usize,
    dropped: u64,
}

impl StatusSender {
    pub fn new(producer: Producer<StatusEvent>, max_pending: usize) -> Self {
        Self {
            producer,
            pending_ids: Vec::with_capacity(max_pending),
            max_pending,
            dropped: 0,
        }
    }

    /// Returns false if the queue was full and the position was dropped.
    pub fn send_position(&mut self, beat: f64) -> bool {
        self.push_or_count(StatusEvent::PlaybackPosition { beat })
    }

    /// Send highlight ids along with any carried over from a failed batch.
    pub fn send_highlights(&mut self, beat: f64, mut event_ids: Vec<String>) -> bool {
        if !self.pending_ids.is_empty() {
            let mut merged = std::mem::take(&mut self.pending_ids);
            merged.append(&mut event_ids);
            event_ids = merged;
        }
        if event_ids.is_empty() {
            return true;
        }
        match self.producer.push(StatusEvent::PlaybackUpdate { beat, event_ids }) {
            Ok(()) => true,
            Err(PushError::Full(StatusEvent::PlaybackUpdate { mut event_ids, .. })) => {
                self.dropped += 1;
                // Keep the newest ids.
                if event_ids.len() > self.max_pending {
                    let excess = event_ids.len() - self.max_pending;
                    event_ids.drain(..excess);
                }
                self.pending_ids = event_ids;
                false
            }
            Err(PushError::Full(_)) => {
                self.dropped += 1;
                false
            }
        }
    }

    pub fn send_quiet_period(&mut self, beat: f64, duration_seconds: f64) -> bool {
        self.push_or_count(StatusEvent::QuietPeriod {
            beat,
            duration_seconds,
        })
    }

    pub fn send_debug(&mut self, message: String) -> bool {
        self.push_or_count(StatusEvent::Debug { message })
    }

    fn push_or_count(&mut self, event: StatusEvent) -> bool {
        if self.producer.push(event).is_err() {
            self.dropped += 1;
            false
        } else {
            true
        }
    }

    /// Ids waiting for the next batch.
    pub fn pending_highlights(&self) -> usize {
        self.pending_ids.len()
    }

    /// Status events that could not be delivered.
    pub fn dropped_status_events(&self) -> u64 {
        self.dropped
    }
}

/// Create both queues. Returns the host handle, the audio-side control
/// consumer, and the audio-side status sender.
pub fn queues(
    control_capacity: usize,
    status_capacity: usize,
    max_pending_highlights: usize,
) -> (EngineHandle, Consumer<ControlMessage>, StatusSender) {
    let (control_tx, control_rx) = RingBuffer::new(control_capacity.max(1));
    let (status_tx, status_rx) = RingBuffer::new(status_capacity.max(1));
    (
        EngineHandle {
            control: control_tx,
            status: status_rx,
        },
        control_rx,
        StatusSender::new(status_tx, max_pending_highlights),
    )
}
