//! Scrolling ticker text built from upcoming items.

use crate::domain::{QueueItem, truncate_chars};

/// Shown when nothing follows the current item.
pub const TICKER_FALLBACK: &str = "More news coming up...";

const TICKER_SEPARATOR: &str = "  ★  ";
const TICKER_ITEMS: usize = 5;
const TICKER_TITLE_CHARS: usize = 80;

/// Join the titles of up to five upcoming items.
pub fn ticker_text(neighbors: &[QueueItem]) -> String {
    let titles: Vec<String> = neighbors
        .iter()
        .take(TICKER_ITEMS)
        .map(|item| truncate_chars(item.title.trim(), TICKER_TITLE_CHARS))
        .filter(|title| !title.is_empty())
        .collect();

    if titles.is_empty() {
        TICKER_FALLBACK.to_string()
    } else {
        titles.join(TICKER_SEPARATOR)
    }
}
