//! Roles distinguishing the two ends of a pipe.

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// One of the two ends of a pipe.
///
/// The tag carries no meaning beyond breaking symmetry: two ends sharing a
/// path derive opposite channel names from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// First end.
    Yin,
    /// Second end.
    Yang,
}

impl Role {
    /// Returns the other role.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Yin => Self::Yang,
            Self::Yang => Self::Yin,
        }
    }

    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yin => "yin",
            Self::Yang => "yang",
        }
    }

    /// Name of the channel this role writes into.
    #[must_use]
    pub const fn outgoing(self) -> &'static str {
        match self {
            Self::Yin => "yinToYang",
            Self::Yang => "yangToYin",
        }
    }

    /// Name of the channel this role reads from.
    #[must_use]
    pub const fn incoming(self) -> &'static str {
        self.opposite().outgoing()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yin" => Ok(Self::Yin),
            "yang" => Ok(Self::Yang),
            other => Err(Error::parse(format!("unknown role '{other}'"))),
        }
    }
}
