//! Round-robin playlist over the approved queue.

mod scheduler;
mod ticker;

pub use scheduler::{DEFAULT_NEIGHBOR_COUNT, PlaylistScheduler, ScheduledItem, Selection};
pub use ticker::{TICKER_FALLBACK, ticker_text};
