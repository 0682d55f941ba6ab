use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// Privacy classification of an indexed file.
///
/// Tiers are disjoint: every document lives in exactly one tier's partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyTier {
    Public,
    Personal,
    Private,
    Work,
}

impl PrivacyTier {
    pub const ALL: [PrivacyTier; 4] = [
        PrivacyTier::Public,
        PrivacyTier::Personal,
        PrivacyTier::Private,
        PrivacyTier::Work,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyTier::Public => "public",
            PrivacyTier::Personal => "personal",
            PrivacyTier::Private => "private",
            PrivacyTier::Work => "work",
        }
    }

    fn slot(self) -> usize {
        match self {
            PrivacyTier::Public => 0,
            PrivacyTier::Personal => 1,
            PrivacyTier::Private => 2,
            PrivacyTier::Work => 3,
        }
    }
}

impl fmt::Display for PrivacyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(PrivacyTier::Public),
            "personal" => Ok(PrivacyTier::Personal),
            "private" => Ok(PrivacyTier::Private),
            "work" => Ok(PrivacyTier::Work),
            other => Err(Error::Config(format!(
                "Unknown privacy tier '{}' (expected public, personal, private or work)",
                other
            ))),
        }
    }
}

/// Fixed-size map with one slot per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierMap<T>([T; 4]);

impl<T> TierMap<T> {
    pub fn from_fn(mut f: impl FnMut(PrivacyTier) -> T) -> Self {
        TierMap(PrivacyTier::ALL.map(|tier| f(tier)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PrivacyTier, &T)> {
        PrivacyTier::ALL.into_iter().zip(self.0.iter())
    }
}

impl TierMap<u64> {
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

impl<T> Index<PrivacyTier> for TierMap<T> {
    type Output = T;

    fn index(&self, tier: PrivacyTier) -> &T {
        &self.0[tier.slot()]
    }
}

impl<T> IndexMut<PrivacyTier> for TierMap<T> {
    fn index_mut(&mut self, tier: PrivacyTier) -> &mut T {
        &mut self.0[tier.slot()]
    }
}

/// Closed set of tiers a query may read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierSet(TierMap<bool>);

impl TierSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        TierSet(TierMap::from_fn(|_| true))
    }

    pub fn insert(&mut self, tier: PrivacyTier) {
        self.0[tier] = true;
    }

    pub fn contains(&self, tier: PrivacyTier) -> bool {
        self.0[tier]
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = PrivacyTier> + '_ {
        self.0.iter().filter(|(_, on)| **on).map(|(tier, _)| tier)
    }

    /// Parse a comma-separated tier list such as `"public,work"`.
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut set = TierSet::empty();
        for part in list.split(',').filter(|p| !p.trim().is_empty()) {
            set.insert(part.parse()?);
        }
        Ok(set)
    }
}

impl FromIterator<PrivacyTier> for TierSet {
    fn from_iter<I: IntoIterator<Item = PrivacyTier>>(iter: I) -> Self {
        let mut set = TierSet::empty();
        for tier in iter {
            set.insert(tier);
        }
        set
    }
}

impl fmt::Display for TierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(PrivacyTier::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}
