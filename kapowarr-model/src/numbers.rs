use std::fmt;

/// An issue number in float normal form, or an inclusive range of them.
///
/// Range files (e.g. `Invincible 001-005`) cover multiple issues; single
/// files cover exactly one. Serialised as a bare number or a two-element
/// array, matching the API representation.
#[derive(
    Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize,
)]
#[serde(untagged)]
pub enum IssueRange {
    Single(f64),
    Range(f64, f64),
}

impl IssueRange {
    /// The first (or only) number covered.
    pub fn first(&self) -> f64 {
        match *self {
            IssueRange::Single(n) => n,
            IssueRange::Range(start, _) => start,
        }
    }

    /// The last (or only) number covered.
    pub fn last(&self) -> f64 {
        match *self {
            IssueRange::Single(n) => n,
            IssueRange::Range(_, end) => end,
        }
    }

    /// Both borders, collapsing a single number to `(n, n)`.
    pub fn as_range(&self) -> (f64, f64) {
        (self.first(), self.last())
    }

    pub fn is_range(&self) -> bool {
        matches!(self, IssueRange::Range(..))
    }

    pub fn contains(&self, number: f64) -> bool {
        let (start, end) = self.as_range();
        start <= number && number <= end
    }

    /// Whether two issues/ranges cover any common number.
    pub fn overlaps(&self, other: &IssueRange) -> bool {
        let (a_start, a_end) = self.as_range();
        let (b_start, b_end) = other.as_range();
        a_start <= b_end && b_start <= a_end
    }
}

impl From<f64> for IssueRange {
    fn from(value: f64) -> Self {
        IssueRange::Single(value)
    }
}

impl fmt::Display for IssueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IssueRange::Single(n) => write!(f, "{n}"),
            IssueRange::Range(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

/// A volume number, or an inclusive range of them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(untagged)]
pub enum VolumeRange {
    Single(i32),
    Range(i32, i32),
}

impl VolumeRange {
    pub fn first(&self) -> i32 {
        match *self {
            VolumeRange::Single(n) => n,
            VolumeRange::Range(start, _) => start,
        }
    }

    pub fn last(&self) -> i32 {
        match *self {
            VolumeRange::Single(n) => n,
            VolumeRange::Range(_, end) => end,
        }
    }

    pub fn as_range(&self) -> (i32, i32) {
        (self.first(), self.last())
    }

    pub fn is_range(&self) -> bool {
        matches!(self, VolumeRange::Range(..))
    }

    /// All covered numbers, for issue-lookup in volume-as-issue volumes.
    pub fn numbers(&self) -> impl Iterator<Item = i32> {
        let (start, end) = self.as_range();
        start..=end
    }

    /// The same borders as issue numbers.
    pub fn as_issue_range(&self) -> IssueRange {
        match *self {
            VolumeRange::Single(n) => IssueRange::Single(n as f64),
            VolumeRange::Range(start, end) => {
                IssueRange::Range(start as f64, end as f64)
            }
        }
    }
}

impl From<i32> for VolumeRange {
    fn from(value: i32) -> Self {
        VolumeRange::Single(value)
    }
}

impl fmt::Display for VolumeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            VolumeRange::Single(n) => write!(f, "{n}"),
            VolumeRange::Range(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_range_borders() {
        assert_eq!(IssueRange::Single(3.2).as_range(), (3.2, 3.2));
        assert_eq!(IssueRange::Range(1.0, 5.0).first(), 1.0);
        assert_eq!(IssueRange::Range(1.0, 5.0).last(), 5.0);
    }

    #[test]
    fn test_overlap() {
        let a = IssueRange::Range(1.0, 5.0);
        assert!(a.overlaps(&IssueRange::Single(3.0)));
        assert!(a.overlaps(&IssueRange::Range(5.0, 8.0)));
        assert!(!a.overlaps(&IssueRange::Single(6.0)));
        assert!(!a.overlaps(&IssueRange::Range(5.5, 8.0)));
    }

    #[test]
    fn test_serde_shape() {
        let single: IssueRange = serde_json::from_str("4.5").unwrap();
        assert_eq!(single, IssueRange::Single(4.5));
        let range: IssueRange = serde_json::from_str("[1.0, 5.0]").unwrap();
        assert_eq!(range, IssueRange::Range(1.0, 5.0));
    }
}
