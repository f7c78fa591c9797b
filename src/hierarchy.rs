//! Electoral level hierarchy.
//!
//! Levels are ordered from the least granular (rank 0) to the most granular
//! (the bottom rank). Agents at the bottom rank are subagents; every other
//! level supervises the level directly below it.
//!
//! Every predicate fails closed: an empty hierarchy or an unknown level name
//! never answers in a way that grants supervisor or subagent privileges.

use crate::store::LevelSource;
use anyhow::{Context, Result};
use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};
use thiserror::Error;
use tracing::{info, warn};

/// Number of ranks, counted from the top, that sign up with email.
pub const TOP_TIER_RANKS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("electoral level names must not be empty")]
    EmptyLevelName,
    #[error("duplicate electoral level: {0}")]
    DuplicateLevel(String),
}

/// Immutable snapshot of the ordered level names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectoralHierarchy {
    levels: Vec<String>,
}

impl ElectoralHierarchy {
    /// Build a hierarchy from level names ordered top to bottom.
    ///
    /// # Errors
    /// Returns an error if a name is blank or appears twice.
    pub fn new<I, S>(levels: I) -> Result<Self, HierarchyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for level in levels {
            let level: String = level.into();
            let level = level.trim().to_string();
            if level.is_empty() {
                return Err(HierarchyError::EmptyLevelName);
            }
            if !seen.insert(level.clone()) {
                return Err(HierarchyError::DuplicateLevel(level));
            }
            ordered.push(level);
        }
        Ok(Self { levels: ordered })
    }

    /// Parse a comma separated list such as `country,region,pollingStation`.
    ///
    /// # Errors
    /// Returns an error if a name is blank or appears twice.
    pub fn parse_list(raw: &str) -> Result<Self, HierarchyError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::new(raw.split(','))
    }

    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn rank_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|name| name == level)
    }

    #[must_use]
    pub fn bottom_rank(&self) -> Option<usize> {
        self.levels.len().checked_sub(1)
    }

    #[must_use]
    pub fn is_bottom_rank(&self, level: &str) -> bool {
        match (self.rank_of(level), self.bottom_rank()) {
            (Some(rank), Some(bottom)) => rank == bottom,
            _ => false,
        }
    }

    /// A known level above the bottom rank.
    #[must_use]
    pub fn is_supervisor_level(&self, level: &str) -> bool {
        match (self.rank_of(level), self.bottom_rank()) {
            (Some(rank), Some(bottom)) => rank < bottom,
            _ => false,
        }
    }

    /// One of the two highest ranks. These agents must sign up with email.
    #[must_use]
    pub fn is_top_tier(&self, level: &str) -> bool {
        self.rank_of(level).is_some_and(|rank| rank < TOP_TIER_RANKS)
    }

    /// The level supervised by `level`, if it is not the bottom rank.
    #[must_use]
    pub fn child_of(&self, level: &str) -> Option<&str> {
        let rank = self.rank_of(level)?;
        self.levels.get(rank + 1).map(String::as_str)
    }

    #[must_use]
    pub fn parent_of(&self, level: &str) -> Option<&str> {
        let rank = self.rank_of(level)?;
        let parent = rank.checked_sub(1)?;
        self.levels.get(parent).map(String::as_str)
    }

    #[must_use]
    pub fn is_direct_child(&self, child: &str, parent: &str) -> bool {
        self.child_of(parent) == Some(child)
    }
}

/// Read-mostly holder of the current hierarchy snapshot.
///
/// Readers clone an `Arc` and never hold the lock across an await point.
#[derive(Debug, Default)]
pub struct HierarchyCache {
    current: RwLock<Arc<ElectoralHierarchy>>,
}

impl HierarchyCache {
    #[must_use]
    pub fn new(hierarchy: ElectoralHierarchy) -> Self {
        Self {
            current: RwLock::new(Arc::new(hierarchy)),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ElectoralHierarchy> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, hierarchy: ElectoralHierarchy) {
        let next = Arc::new(hierarchy);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Re-read the level list from the store and swap the snapshot.
    ///
    /// # Errors
    /// Returns an error if the store query fails or the stored list is invalid.
    /// The previous snapshot stays in place on error.
    pub async fn reload<S>(&self, source: &S) -> Result<Arc<ElectoralHierarchy>>
    where
        S: LevelSource + ?Sized,
    {
        let levels = source
            .load_levels()
            .await
            .context("Failed to load electoral levels")?;
        let hierarchy =
            ElectoralHierarchy::new(levels).context("Stored electoral levels are invalid")?;
        if hierarchy.is_empty() {
            warn!("Electoral level list is empty; all role checks will deny");
        }
        info!(levels = ?hierarchy.levels(), "Electoral hierarchy loaded");
        self.replace(hierarchy);
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ElectoralHierarchy {
        match ElectoralHierarchy::new(["country", "region", "constituency", "pollingStation"]) {
            Ok(hierarchy) => hierarchy,
            Err(err) => panic!("sample hierarchy should be valid: {err}"),
        }
    }

    #[test]
    fn ranks_follow_list_order() {
        let hierarchy = sample();
        assert_eq!(hierarchy.rank_of("country"), Some(0));
        assert_eq!(hierarchy.rank_of("pollingStation"), Some(3));
        assert_eq!(hierarchy.rank_of("district"), None);
        assert_eq!(hierarchy.bottom_rank(), Some(3));
    }

    #[test]
    fn bottom_and_supervisor_levels() {
        let hierarchy = sample();
        assert!(hierarchy.is_bottom_rank("pollingStation"));
        assert!(!hierarchy.is_bottom_rank("constituency"));
        assert!(hierarchy.is_supervisor_level("constituency"));
        assert!(!hierarchy.is_supervisor_level("pollingStation"));
    }

    #[test]
    fn top_tier_is_first_two_ranks() {
        let hierarchy = sample();
        assert!(hierarchy.is_top_tier("country"));
        assert!(hierarchy.is_top_tier("region"));
        assert!(!hierarchy.is_top_tier("constituency"));
        assert!(!hierarchy.is_top_tier("unknown"));
    }

    #[test]
    fn parent_and_child_navigation() {
        let hierarchy = sample();
        assert_eq!(hierarchy.child_of("region"), Some("constituency"));
        assert_eq!(hierarchy.child_of("pollingStation"), None);
        assert_eq!(hierarchy.parent_of("region"), Some("country"));
        assert_eq!(hierarchy.parent_of("country"), None);
        assert!(hierarchy.is_direct_child("constituency", "region"));
        assert!(!hierarchy.is_direct_child("pollingStation", "region"));
        assert!(!hierarchy.is_direct_child("region", "region"));
    }

    #[test]
    fn empty_hierarchy_fails_closed() {
        let hierarchy = ElectoralHierarchy::default();
        assert!(!hierarchy.is_bottom_rank("pollingStation"));
        assert!(!hierarchy.is_supervisor_level("country"));
        assert!(!hierarchy.is_top_tier("country"));
        assert_eq!(hierarchy.child_of("country"), None);
    }

    #[test]
    fn rejects_duplicates_and_blanks() {
        assert_eq!(
            ElectoralHierarchy::new(["country", "country"]),
            Err(HierarchyError::DuplicateLevel("country".to_string()))
        );
        assert_eq!(
            ElectoralHierarchy::parse_list("country, ,region"),
            Err(HierarchyError::EmptyLevelName)
        );
    }

    #[test]
    fn parse_list_trims_names() -> Result<(), HierarchyError> {
        let hierarchy = ElectoralHierarchy::parse_list("country, region ,pollingStation")?;
        assert_eq!(hierarchy.levels(), ["country", "region", "pollingStation"]);
        assert!(ElectoralHierarchy::parse_list("  ")?.is_empty());
        Ok(())
    }

    #[test]
    fn cache_swaps_snapshots() {
        let cache = HierarchyCache::new(sample());
        let before = cache.snapshot();
        cache.replace(ElectoralHierarchy::default());
        assert_eq!(before.levels().len(), 4);
        assert!(cache.snapshot().is_empty());
    }
}
