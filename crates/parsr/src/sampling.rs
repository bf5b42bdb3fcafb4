//! 🎲 Scenario sampling — which jobs get the expensive extra treatment.
//!
//! No dice are actually rolled. The match id's last two digits decide, so every
//! worker on every box reaches the same answer for the same match without talking
//! to anyone. Scanner-sourced jobs only.

use crate::common::Origin;

/// ✅ `true` when `origin` is the scanner and `match_id % 100 < percent`.
///
/// `percent` of 0 disables sampling; 100 or more selects every scanner job.
pub fn should_generate_scenarios(origin: &Origin, match_id: u64, percent: u8) -> bool {
    origin.is_scanner() && match_id % 100 < u64::from(percent)
}
