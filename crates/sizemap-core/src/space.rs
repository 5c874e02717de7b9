//! Volume capacity figures.

use serde::{Deserialize, Serialize};

/// Capacity of the volume holding a path, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceInfo {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl SpaceInfo {
    /// Build from total and available bytes; used is the remainder.
    pub fn new(total: u64, available: u64) -> Self {
        Self {
            total,
            used: total.saturating_sub(available),
            available,
        }
    }

    /// Fraction of the volume in use, 0–100.
    pub fn used_percent(&self) -> f64 {
        crate::tree::percent_of(self.used, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_is_remainder() {
        let info = SpaceInfo::new(1000, 250);
        assert_eq!(info.used, 750);
        assert_eq!(info.used_percent(), 75.0);

        assert_eq!(SpaceInfo::new(10, 20).used, 0);
    }
}
