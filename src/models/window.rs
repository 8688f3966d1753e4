//! The rolling last/current/next window.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::WeekDataset;

/// One of the three window positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Last,
    Current,
    Next,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Last, Slot::Current, Slot::Next];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Last => "last",
            Slot::Current => "current",
            Slot::Next => "next",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last" => Ok(Slot::Last),
            "current" => Ok(Slot::Current),
            "next" => Ok(Slot::Next),
            other => Err(format!("Unknown slot '{}'", other)),
        }
    }
}

/// Last, current and next week for one market. Missing slots are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeWindow {
    pub last: Option<WeekDataset>,
    pub current: Option<WeekDataset>,
    pub next: Option<WeekDataset>,
}

impl ThreeWindow {
    pub fn get(&self, slot: Slot) -> Option<&WeekDataset> {
        match slot {
            Slot::Last => self.last.as_ref(),
            Slot::Current => self.current.as_ref(),
            Slot::Next => self.next.as_ref(),
        }
    }

    pub fn set(&mut self, slot: Slot, dataset: WeekDataset) {
        match slot {
            Slot::Last => self.last = Some(dataset),
            Slot::Current => self.current = Some(dataset),
            Slot::Next => self.next = Some(dataset),
        }
    }

    /// All three slots present.
    pub fn is_complete(&self) -> bool {
        self.last.is_some() && self.current.is_some() && self.next.is_some()
    }

    /// Slots present and consecutive: last + 1 == current, current + 1 == next.
    pub fn is_adjacent(&self) -> bool {
        match (&self.last, &self.current, &self.next) {
            (Some(last), Some(current), Some(next)) => {
                last.id.succ() == current.id && current.id.succ() == next.id
            }
            _ => false,
        }
    }
}

/// How trustworthy a returned slot is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Fetched (or served from a valid cache entry) during the current week.
    Fresh,
    /// Older data kept because a fresh fetch failed.
    Stale,
    /// No payload at all.
    Unavailable,
}

/// A slot together with its freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub dataset: WeekDataset,
    pub freshness: Freshness,
}
