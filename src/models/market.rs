//! Tracked markets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A tracked country with independent window, cache and archive state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Us,
    India,
}

impl Market {
    pub const ALL: [Market; 2] = [Market::Us, Market::India];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Us => "us",
            Market::India => "india",
        }
    }

    /// Name used in archive titles and provider queries.
    pub fn display_name(&self) -> &'static str {
        match self {
            Market::Us => "United States",
            Market::India => "India",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" | "usa" => Ok(Market::Us),
            "in" | "india" => Ok(Market::India),
            other => Err(format!("Unknown market '{}'", other)),
        }
    }
}

/// Market selection accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSelector {
    One(Market),
    All,
}

impl MarketSelector {
    pub fn markets(&self) -> Vec<Market> {
        match self {
            MarketSelector::One(market) => vec![*market],
            MarketSelector::All => Market::ALL.to_vec(),
        }
    }
}

impl FromStr for MarketSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(MarketSelector::All);
        }
        s.parse().map(MarketSelector::One)
    }
}
