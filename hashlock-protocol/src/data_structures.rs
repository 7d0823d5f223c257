use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which chain acts as source (lock side) and destination (release side)
/// for one swap instance.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    SourceToDest,
    DestToSource,
}

impl SwapDirection {
    pub fn wire_name(&self) -> &'static str {
        match self {
            SwapDirection::SourceToDest => "source_to_dest",
            SwapDirection::DestToSource => "dest_to_source",
        }
    }
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized swap direction: {0}")]
pub struct DirectionParseError(pub String);

impl FromStr for SwapDirection {
    type Err = DirectionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "source_to_dest" => Ok(SwapDirection::SourceToDest),
            "dest_to_source" => Ok(SwapDirection::DestToSource),
            other => Err(DirectionParseError(other.to_string())),
        }
    }
}
