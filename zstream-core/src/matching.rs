//! Tiered name matching
//!
//! Names on the OBS side (and user-typed names on the HTTP side) drift from
//! their canonical form: operators rename scenes, change capitalization, or
//! add prefixes. A [`Ladder`] tries an ordered list of matchers against a
//! candidate set and returns the first hit of the first tier that matches
//! anything, so an exact match always beats a fuzzy one.

use std::fmt;

/// Which tier of a ladder produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    CaseInsensitive,
    Heuristic,
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::CaseInsensitive => write!(f, "case-insensitive"),
            Self::Heuristic => write!(f, "heuristic"),
        }
    }
}

type Matcher<'a, T> = Box<dyn Fn(&T) -> bool + Send + Sync + 'a>;

/// Ordered list of matcher strategies
pub struct Ladder<'a, T> {
    tiers: Vec<(MatchTier, Matcher<'a, T>)>,
}

impl<'a, T> Ladder<'a, T> {
    #[must_use]
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Append a tier; tiers are tried in insertion order
    #[must_use]
    pub fn tier(mut self, tier: MatchTier, matcher: impl Fn(&T) -> bool + Send + Sync + 'a) -> Self {
        self.tiers.push((tier, Box::new(matcher)));
        self
    }

    /// First candidate matched by the earliest tier that matches anything
    pub fn resolve<'c>(&self, candidates: &'c [T]) -> Option<(&'c T, MatchTier)> {
        self.tiers.iter().find_map(|(tier, matcher)| {
            candidates
                .iter()
                .find(|candidate| matcher(candidate))
                .map(|candidate| (candidate, *tier))
        })
    }

    /// Like [`Ladder::resolve`] without the tier
    pub fn find<'c>(&self, candidates: &'c [T]) -> Option<&'c T> {
        self.resolve(candidates).map(|(candidate, _)| candidate)
    }
}

impl<T> Default for Ladder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Unicode-aware case-insensitive equality
#[must_use]
pub fn eq_fold(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}
