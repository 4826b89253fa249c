//! Target chip definitions.

pub mod chip;

pub use chip::{ChipModel, ChipRegistry, MAX_BLOCK_SIZE, Zone, ZoneKind, parse_part};
