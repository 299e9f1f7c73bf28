use std::{fmt, ops::RangeInclusive, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::LeaderError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An inclusive range of TCP ports, written `min-max`.
///
/// ## Examples
///
/// ```
/// use sectionleader::config::PortRange;
///
/// let range = "8000-9000".parse::<PortRange>().unwrap();
/// assert!(range.contains(8500));
/// assert_eq!(range.len(), 1001);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    min: u16,
    max: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortRange {
    /// Creates a range, rejecting `min > max` and port 0.
    pub fn new(min: u16, max: u16) -> Result<Self, LeaderError> {
        if min == 0 || min > max {
            return Err(LeaderError::InvalidPortRange(format!("{min}-{max}")));
        }

        Ok(Self { min, max })
    }

    pub(crate) const fn from_bounds((min, max): (u16, u16)) -> Self {
        Self { min, max }
    }

    /// The lowest port.
    pub fn min(&self) -> u16 {
        self.min
    }

    /// The highest port.
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    /// Always `false`; a range holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if `port` is inside the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    /// Returns `true` if the two ranges share a port.
    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Iterates the ports in ascending order.
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.min..=self.max
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for PortRange {
    type Err = LeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LeaderError::InvalidPortRange(s.to_string());
        let (min, max) = s.split_once('-').ok_or_else(invalid)?;
        let min = min.trim().parse().map_err(|_| invalid())?;
        let max = max.trim().parse().map_err(|_| invalid())?;
        Self::new(min, max)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
