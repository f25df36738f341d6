//! Selection of the eras a run exports.

use crate::config::ValidationError;
use crate::schemas::EraIndex;

/// Validated request for the N most recent completed eras
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraSelector {
    requested: u32,
}

impl EraSelector {
    /// Accepts `1..=ceiling` eras.
    pub fn new(requested: u32, ceiling: u32) -> Result<Self, ValidationError> {
        if requested == 0 || requested > ceiling {
            return Err(ValidationError::EraCountOutOfRange {
                requested,
                max: ceiling,
            });
        }
        Ok(Self { requested })
    }

    pub fn requested(&self) -> u32 {
        self.requested
    }

    /// The last `requested` entries of `available` (ascending, active era
    /// excluded), or all of them when fewer are retained. Order is kept.
    pub fn select(&self, available: &[EraIndex]) -> Vec<EraIndex> {
        let skip = available.len().saturating_sub(self.requested as usize);
        available[skip..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_ERAS;

    #[test]
    fn test_selects_most_recent() {
        let selector = EraSelector::new(2, MAX_ERAS).unwrap();
        assert_eq!(selector.select(&[100, 101, 102, 103]), vec![102, 103]);
    }

    #[test]
    fn test_fewer_available_than_requested() {
        let selector = EraSelector::new(5, MAX_ERAS).unwrap();
        assert_eq!(selector.select(&[7, 8]), vec![7, 8]);
        assert!(selector.select(&[]).is_empty());
    }

    #[test]
    fn test_single_era() {
        let selector = EraSelector::new(1, MAX_ERAS).unwrap();
        assert_eq!(selector.select(&[10, 11, 12]), vec![12]);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert_eq!(
            EraSelector::new(0, MAX_ERAS),
            Err(ValidationError::EraCountOutOfRange {
                requested: 0,
                max: MAX_ERAS
            })
        );
        assert!(EraSelector::new(MAX_ERAS + 1, MAX_ERAS).is_err());
        assert!(EraSelector::new(MAX_ERAS, MAX_ERAS).is_ok());
    }
}
