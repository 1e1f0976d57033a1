use serde::{Deserialize, Serialize};

use crate::compensation::plan::Banded;

/// Band selected by a scan, kept in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandHit {
    pub index: usize,
    pub label: String,
    /// Set when the value sits above the last band's finite upper bound.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// Band scan shared by tier, matrix-row, matrix-column and rate-condition lookups.
///
/// Returns the first band with `min <= value < max`. When nothing matches but the value is at
/// or above the last band's minimum, the last band wins. An empty list, or a value below the
/// first band's minimum, yields `None`.
pub fn scan_bands<B: Banded>(value: f64, bands: &[B]) -> Option<BandHit> {
    if let Some(index) = bands.iter().position(|band| band.contains(value)) {
        return Some(BandHit {
            index,
            label: bands[index].label().to_string(),
            fallback: false,
        });
    }

    let last = bands.last()?;
    if value >= last.lower() {
        return Some(BandHit {
            index: bands.len() - 1,
            label: last.label().to_string(),
            fallback: true,
        });
    }

    None
}
