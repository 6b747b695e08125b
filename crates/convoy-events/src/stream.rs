//! The event stream: sequenced emission, replay, and synchronous fan-out

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use convoy_core::{time, Aid};
use serde_json::Value;

use crate::error::Result;
use crate::event::{Event, EventFilter, EventType};
use crate::ring::RingBuffer;

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    filter: Option<EventFilter>,
    callback: Callback,
    active: Arc<AtomicBool>,
}

struct StreamState {
    sequence: u64,
    buffer: RingBuffer<Event>,
    listeners: Vec<Listener>,
}

/// A sequenced, replay-buffered event stream.
///
/// Cloning is cheap and clones share the same stream. Emission is
/// synchronous: every matching subscriber has observed the event, in
/// sequence order, before [`EventStream::emit`] returns.
#[derive(Clone)]
pub struct EventStream {
    state: Arc<Mutex<StreamState>>,
}

/// Handle returned by [`EventStream::subscribe`].
///
/// Call [`Subscription::cancel`] to stop receiving events; cancelling from
/// inside the subscriber's own callback is allowed and takes effect for
/// subsequent events. Dropping the handle without cancelling leaves the
/// subscription in place.
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl EventStream {
    /// Create a stream whose replay buffer holds `capacity` events.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(StreamState {
                sequence: 0,
                buffer: RingBuffer::new(capacity)?,
                listeners: Vec::new(),
            })),
        })
    }

    /// Emit an event: assign id, timestamp, and the next sequence number,
    /// record it for replay, and deliver it to every matching subscriber
    /// before returning.
    ///
    /// A subscriber that panics is isolated: the panic is caught and logged
    /// at debug level, and remaining subscribers still receive the event.
    pub fn emit(
        &self,
        event_type: impl Into<EventType>,
        data: Value,
        source: Option<Aid>,
    ) -> Event {
        let mut state = self.lock_state();

        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            data,
            timestamp: time::now_millis(),
            sequence: state.sequence,
            source,
        };
        state.sequence += 1;
        state.buffer.push(event.clone());

        // Deliver under the lock: emission order is delivery order for every
        // subscriber. Subscribers must not call subscribe/emit/replay on the
        // same stream from inside a callback; cancelling is fine.
        state.listeners.retain(|l| l.active.load(Ordering::Acquire));
        for listener in &state.listeners {
            if !listener.active.load(Ordering::Acquire) {
                continue;
            }
            if let Some(filter) = &listener.filter {
                if !filter.matches(&event) {
                    continue;
                }
            }
            let callback = Arc::clone(&listener.callback);
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                tracing::debug!(
                    sequence = event.sequence,
                    event_type = %event.event_type,
                    panic = panic_message(&panic),
                    "event subscriber panicked; continuing delivery"
                );
            }
        }

        event
    }

    /// Register a subscriber. Events matching `filter` (all events when
    /// `None`) are delivered in emission order until the subscription is
    /// cancelled.
    pub fn subscribe<F>(&self, filter: Option<EventFilter>, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut state = self.lock_state();
        state.listeners.retain(|l| l.active.load(Ordering::Acquire));
        state.listeners.push(Listener {
            filter,
            callback: Arc::new(callback),
            active: Arc::clone(&active),
        });
        Subscription { active }
    }

    /// Snapshot of buffered events matching `filter`, oldest first.
    pub fn replay(&self, filter: Option<&EventFilter>) -> Vec<Event> {
        let state = self.lock_state();
        state
            .buffer
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(e)))
            .cloned()
            .collect()
    }

    /// The sequence number the next emitted event will receive.
    pub fn next_sequence(&self) -> u64 {
        self.lock_state().sequence
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock_state();
        state.listeners.retain(|l| l.active.load(Ordering::Acquire));
        state.listeners.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
