//! Domain types shared by the scheduling, encoding and supervision layers.

pub mod item;
pub mod state;

pub use item::{ChannelId, ItemId, ItemStatus, QueueItem, truncate_chars};
pub use state::{DisplayMode, StreamState, StreamStatus};
