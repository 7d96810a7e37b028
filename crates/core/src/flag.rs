use serde::{Deserialize, Serialize};
use std::fmt;

/// The budgeting API's fixed flag palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
}

impl FlagColor {
    pub const ALL: [FlagColor; 6] = [
        FlagColor::Red,
        FlagColor::Orange,
        FlagColor::Yellow,
        FlagColor::Green,
        FlagColor::Blue,
        FlagColor::Purple,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FlagColor::Red => "red",
            FlagColor::Orange => "orange",
            FlagColor::Yellow => "yellow",
            FlagColor::Green => "green",
            FlagColor::Blue => "blue",
            FlagColor::Purple => "purple",
        }
    }
}

impl fmt::Display for FlagColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlagColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        FlagColor::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| {
                let allowed: Vec<&str> = FlagColor::ALL.iter().map(|c| c.as_str()).collect();
                format!("Unknown flag color '{s}', expected one of: {}", allowed.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(FlagColor::from_str("Yellow").unwrap(), FlagColor::Yellow);
        assert_eq!(FlagColor::from_str(" BLUE ").unwrap(), FlagColor::Blue);
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = FlagColor::from_str("pink").unwrap_err();
        assert!(err.contains("purple"), "{err}");
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(FlagColor::Green.to_string(), "green");
    }
}
