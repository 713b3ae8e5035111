//! Role-prefixed entity identifiers.
//!
//! Every participant carries a short printable tag: a one-character role
//! prefix (`C` = CA, `L` = Logger, `M` = Monitor) followed by a 1-based
//! decimal index, e.g. `M3`. The zero-based `index()` keys shard positions
//! and BLS share indices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Participant role, encoded as the identifier's first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Ca,
    Logger,
    Monitor,
}

impl Role {
    /// The identifier prefix character for this role.
    pub fn prefix(self) -> char {
        match self {
            Role::Ca => 'C',
            Role::Logger => 'L',
            Role::Monitor => 'M',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'C' => Some(Role::Ca),
            'L' => Some(Role::Logger),
            'M' => Some(Role::Monitor),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Ca => write!(f, "CA"),
            Role::Logger => write!(f, "Logger"),
            Role::Monitor => write!(f, "Monitor"),
        }
    }
}

/// A CTng entity identifier such as `C1`, `L2`, or `M17`.
///
/// Ordering is lexicographic on the underlying string, which is the order
/// used when listing threshold-signature contributors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CtngId(String);

impl CtngId {
    /// Build an identifier from a role and 1-based index.
    pub fn new(role: Role, ordinal: usize) -> Self {
        CtngId(format!("{}{}", role.prefix(), ordinal))
    }

    /// The role encoded in the prefix character.
    pub fn role(&self) -> crate::Result<Role> {
        self.0
            .chars()
            .next()
            .and_then(Role::from_prefix)
            .ok_or_else(|| CoreError::InvalidId(self.0.clone()))
    }

    /// Zero-based index: `parse(id[1..]) - 1`.
    ///
    /// Used as the shard position and BLS share index for monitors.
    pub fn index(&self) -> crate::Result<usize> {
        let digits = &self.0[1.min(self.0.len())..];
        let ordinal: usize = digits
            .parse()
            .map_err(|_| CoreError::InvalidId(self.0.clone()))?;
        if ordinal == 0 {
            return Err(CoreError::InvalidId(self.0.clone()));
        }
        Ok(ordinal - 1)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CtngId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CtngId {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = CtngId(s.to_owned());
        id.role()?;
        id.index()?;
        Ok(id)
    }
}
