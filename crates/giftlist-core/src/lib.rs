//! # giftlist-core
//!
//! Types shared by every crate in the realtime layer:
//!
//! - [`ids`]: branded identifiers for connections and authenticated subjects
//! - [`topic`]: validated `<entity-type>:<id>` topic keys
//! - [`events`]: mutation events pushed to subscribers

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod topic;

pub use events::{Event, EventKind};
pub use ids::{ConnectionId, SubjectId};
pub use topic::{Topic, TopicError};
