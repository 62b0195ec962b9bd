//! UI primitives for the fsdump CLI.
//!
//! This module provides:
//! - **Context**: Environment detection (TTY, color, unicode)
//! - **Mode**: Output mode resolution (plain, pretty)
//! - **Theme**: Badge tokens and styles
//! - **Render**: Badges, key-value lines, hints, receipts

mod context;
mod mode;
pub mod render;
pub mod theme;

pub use context::UiContext;
pub use theme::Badge;

pub use render::{badge, hint, receipt};
