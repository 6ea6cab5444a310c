//! Resource version tokens and the per-kind allocator.
//!
//! # Purpose
//! A [`ResourceVersion`] marks a point in one GVK's write history. It is used
//! for optimistic concurrency on writes and for resuming watches.
//!
//! # Key invariants
//! - Versions issued for one GVK are strictly increasing and never reused,
//!   even after the record they described is deleted.
//! - Callers only see an opaque string and may only compare two tokens; the
//!   numeric representation stays private to the storage backends.
//! - `0` is reserved and means "no particular version".
use crate::store::{StoreError, StoreResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    pub const ZERO: ResourceVersion = ResourceVersion(0);
    /// Largest version a backend can store (Postgres `BIGINT`).
    pub const MAX: ResourceVersion = ResourceVersion(i64::MAX as u64);

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse a client-supplied token.
    ///
    /// Only the canonical decimal form is accepted: no sign, no leading
    /// zeros, and nothing above [`ResourceVersion::MAX`].
    ///
    /// # Errors
    /// - [`StoreError::Invalid`] when the token is not one this server issued.
    pub fn parse(token: &str) -> StoreResult<Self> {
        let invalid = || StoreError::Invalid(format!("invalid resourceVersion {token:?}"));
        let digits = token.trim();
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || (digits.len() > 1 && digits.starts_with('0'))
        {
            return Err(invalid());
        }
        let raw = digits.parse::<u64>().map_err(|_| invalid())?;
        if raw > Self::MAX.0 {
            return Err(invalid());
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceVersion {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourceVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Monotonic counter for one GVK, used by in-process backends.
///
/// The allocator itself is not synchronized: the owning backend must call
/// [`VersionAllocator::next`] under the same lock that publishes the record,
/// so allocation and write form one atomic step.
#[derive(Debug, Default)]
pub struct VersionAllocator {
    last: u64,
}

impl VersionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> ResourceVersion {
        self.last += 1;
        ResourceVersion(self.last)
    }

    /// The newest version issued so far (`ZERO` before the first write).
    pub fn current(&self) -> ResourceVersion {
        ResourceVersion(self.last)
    }
}
