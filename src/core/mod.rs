//! Pure helpers shared by the engine and the snapshot builder.
//!
//! No I/O and no clocks: every function here is a plain transformation of
//! its arguments.

pub mod names;
pub mod timefmt;

pub use names::{last_color, normalize_key, strip_color_codes};
pub use timefmt::{format_gap_ms, format_gap_secs};
