use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier a connection is addressed by.
///
/// Supplied by the client at upgrade time (or derived from the peer address),
/// so two live connections may share one.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Use `requested` verbatim when it is non-empty, otherwise `fallback`.
    pub fn or_fallback(requested: Option<&str>, fallback: impl Into<String>) -> Self {
        match requested {
            Some(id) if !id.is_empty() => Self(id.to_owned()),
            _ => Self(fallback.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Process-unique key the hub assigns to each registration.
///
/// Unlike [`ClientId`] this never collides, so the registry is keyed by it.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ConnectionKey(u64);

impl ConnectionKey {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}
