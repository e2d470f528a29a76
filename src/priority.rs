use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority tiers for delivery orders in the dispatch queue
/// Higher values = served first when an agent lists eligible orders
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// low (1)
    Low = 1,
    /// standard / normal (2)
    #[default]
    Standard = 2,
    /// high (3)
    High = 3,
    /// urgent - time critical (4)
    Urgent = 4,
}

impl Priority {
    /// Get the numeric priority value
    pub fn value(self) -> u32 {
        self as u32
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "standard" | "normal" => Ok(Priority::Standard),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Urgent => "URGENT",
            Priority::High => "HIGH",
            Priority::Standard => "STANDARD",
            Priority::Low => "LOW",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_str() {
        assert_eq!("urgent".parse::<Priority>(), Ok(Priority::Urgent));
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("standard".parse::<Priority>(), Ok(Priority::Standard));
        assert_eq!("low".parse::<Priority>(), Ok(Priority::Low));

        // "normal" is what older order forms send
        assert_eq!(" normal ".parse::<Priority>(), Ok(Priority::Standard));

        assert_eq!("asap".parse::<Priority>(), Err("asap".to_string()));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Standard);
        assert!(Priority::Standard > Priority::Low);
        assert_eq!(Priority::default(), Priority::Standard);
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::Urgent.to_string(), "URGENT");
        assert_eq!(Priority::High.to_string(), "HIGH");
        assert_eq!(Priority::Standard.to_string(), "STANDARD");
        assert_eq!(Priority::Low.to_string(), "LOW");
    }
}
