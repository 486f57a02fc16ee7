//! Which discovery units a run covers.

use std::fmt;

/// Items per discovery unit assumed when the catalog does not say otherwise.
pub const DEFAULT_PAGE_SIZE: u64 = 24;

/// The three discovery modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryScope {
    /// Exactly one unit.
    Single {
        /// The unit to ingest.
        unit: i64,
    },
    /// An inclusive range, truncated to what the catalog actually has.
    Range {
        /// First unit.
        start: i64,
        /// Last unit (inclusive).
        end: i64,
    },
    /// From `start` to the last unit the catalog has.
    Sweep {
        /// First unit.
        start: i64,
    },
}

impl DiscoveryScope {
    /// Builds a range when `end` is given, a sweep otherwise.
    #[must_use]
    pub fn from_units(start: i64, end: Option<i64>) -> Self {
        match end {
            Some(end) => Self::Range { start, end },
            None => Self::Sweep { start },
        }
    }

    /// First unit of the run.
    #[must_use]
    pub fn start_unit(&self) -> i64 {
        match *self {
            Self::Single { unit } => unit,
            Self::Range { start, .. } | Self::Sweep { start } => start,
        }
    }

    /// Checks unit numbers are 1-based and ranges are not inverted.
    ///
    /// # Errors
    ///
    /// Returns a message describing the problem.
    pub fn validate(&self) -> Result<(), String> {
        let start = self.start_unit();
        if start < 1 {
            return Err(format!("start unit must be at least 1, got {start}"));
        }
        if let Self::Range { start, end } = *self
            && end < start
        {
            return Err(format!("end unit {end} is before start unit {start}"));
        }
        Ok(())
    }

    /// Number of units to walk, given what discovery reported.
    #[must_use]
    pub fn total_units(&self, item_count: u64, page_size: u64) -> u64 {
        let discovered = discovered_units(item_count, page_size);
        let start = u64::try_from(self.start_unit().max(1)).unwrap_or(1);
        let available = (discovered + 1).saturating_sub(start);
        match *self {
            Self::Single { .. } => 1,
            Self::Range { start, end } => {
                let requested = u64::try_from(end - start + 1).unwrap_or(0);
                requested.min(available)
            }
            Self::Sweep { .. } => available,
        }
    }
}

impl fmt::Display for DiscoveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { unit } => write!(f, "unit {unit}"),
            Self::Range { start, end } => write!(f, "units {start}..={end}"),
            Self::Sweep { start } => write!(f, "units {start}.."),
        }
    }
}

/// `ceil(item_count / page_size)`.
#[must_use]
pub fn discovered_units(item_count: u64, page_size: u64) -> u64 {
    item_count.div_ceil(page_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_units_rounds_up() {
        assert_eq!(discovered_units(0, 24), 0);
        assert_eq!(discovered_units(24, 24), 1);
        assert_eq!(discovered_units(25, 24), 2);
        assert_eq!(discovered_units(5, 0), 5);
    }

    #[test]
    fn test_single_is_always_one_unit() {
        let scope = DiscoveryScope::Single { unit: 7 };
        assert_eq!(scope.total_units(0, 24), 1);
        assert_eq!(scope.total_units(1000, 24), 1);
    }

    #[test]
    fn test_range_truncates_to_discovered() {
        // 100 items / 24 = 5 units.
        let scope = DiscoveryScope::Range { start: 2, end: 10 };
        assert_eq!(scope.total_units(100, 24), 4);

        let inside = DiscoveryScope::Range { start: 2, end: 3 };
        assert_eq!(inside.total_units(100, 24), 2);
    }

    #[test]
    fn test_sweep_runs_to_last_unit() {
        let scope = DiscoveryScope::Sweep { start: 1 };
        assert_eq!(scope.total_units(100, 24), 5);

        let late = DiscoveryScope::Sweep { start: 5 };
        assert_eq!(late.total_units(100, 24), 1);

        let past_end = DiscoveryScope::Sweep { start: 9 };
        assert_eq!(past_end.total_units(100, 24), 0);
    }

    #[test]
    fn test_validate_rejects_bad_units() {
        assert!(DiscoveryScope::Sweep { start: 0 }.validate().is_err());
        assert!(DiscoveryScope::Range { start: 5, end: 4 }.validate().is_err());
        assert!(DiscoveryScope::Range { start: 4, end: 4 }.validate().is_ok());
    }

    #[test]
    fn test_from_units() {
        assert_eq!(
            DiscoveryScope::from_units(2, Some(3)),
            DiscoveryScope::Range { start: 2, end: 3 }
        );
        assert_eq!(DiscoveryScope::from_units(2, None), DiscoveryScope::Sweep { start: 2 });
    }
}
