//! Selection strategies for pulling keys out of the backlog

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rule by which `Backlog::next` picks among pending keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Oldest pending key first, in strict arrival order
    #[default]
    Fifo,

    /// Any currently pending key, chosen uniformly
    Random,
}

impl SelectionStrategy {
    /// Returns the configuration string for this strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Self::Fifo),
            "random" => Ok(Self::Random),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}
