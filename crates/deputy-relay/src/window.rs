//! Window arithmetic for the relay cursor.

use deputy_types::Window;

/// First window for a stream with no checkpoint.
///
/// Starts `window_size + confirmation_depth` below `latest` (or at
/// `start_block` when configured) and spans `window_size` blocks.
pub fn seed_window(
    latest: u64,
    window_size: u64,
    confirmation_depth: u64,
    start_block: Option<u64>,
) -> Window {
    let window_size = window_size.max(1);
    let from_block = start_block
        .unwrap_or_else(|| latest.saturating_sub(window_size.saturating_add(confirmation_depth)));
    Window {
        from_block,
        to_block: from_block.saturating_add(window_size - 1),
    }
}

/// Whether `window` is at least `confirmation_depth` blocks behind `latest`.
pub fn is_confirmed(window: &Window, latest: u64, confirmation_depth: u64) -> bool {
    window.to_block.saturating_add(confirmation_depth) < latest
}
