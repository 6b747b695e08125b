#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! Sequenced event stream for convoy services.
//!
//! One [`EventStream`] per service: events get a unique id, a millisecond
//! timestamp, and a strictly increasing sequence number; a bounded ring
//! buffer keeps recent history for replay to late-joining subscribers; and
//! filtered subscribers receive matching events synchronously, in order.
//!
//! ```rust
//! use convoy_events::{EventStream, EventType};
//!
//! let stream = EventStream::new(64).unwrap();
//! let event = stream.emit(EventType::new("status"), serde_json::json!({"battery": 0.93}), None);
//! assert_eq!(event.sequence, 0);
//! assert_eq!(stream.replay(None).len(), 1);
//! ```

mod error;
mod event;
mod ring;
mod stream;

pub use error::{Error, Result};
pub use event::{Event, EventFilter, EventType};
pub use ring::RingBuffer;
pub use stream::{EventStream, Subscription};
