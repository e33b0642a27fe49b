//! Conversation state: sessions and their messages
//!
//! Both stores hand out clones, so callers can never mutate stored state
//! without going through `update`. When built with a broker they publish an
//! event for every mutation.

mod message;
mod session;

pub use message::{MessageRepository, MessageStore};
pub use session::{FORK_TITLE_PREFIX, SessionStore};
