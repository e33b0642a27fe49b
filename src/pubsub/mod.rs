//! Publish/subscribe event bus
//!
//! A [`Broker`] is generic over exactly one payload type. The crate creates
//! one broker per domain (jobs, MCP state, sessions, messages, shell history)
//! and subscribers match on [`EventType`] plus the typed payload.
//!
//! ```rust
//! use kodegen_agent_core::pubsub::{Broker, EventType};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let broker: Broker<String> = Broker::new();
//! let mut sub = broker.subscribe();
//!
//! broker.publish(EventType::Created, "hello".to_string());
//!
//! let event = sub.recv().await.unwrap();
//! assert_eq!(event.event_type, EventType::Created);
//! assert_eq!(event.payload, "hello");
//! # }
//! ```

mod broker;
mod event;

pub use broker::{BackpressureStrategy, Broker, DEFAULT_CHANNEL_BUFFER_SIZE, Subscription};
pub use event::{Event, EventType};
