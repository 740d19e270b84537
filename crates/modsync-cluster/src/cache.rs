//! Resource kind cache for dynamic API access.
//!
//! Discovery is expensive, so the resolved `ApiResource` and capabilities of
//! every group/version/kind the cluster serves are cached after the first run
//! and only refreshed when a lookup misses.

use std::collections::HashMap;

use kube::core::GroupVersionKind;
use kube::discovery::{verbs, ApiCapabilities, ApiResource, Discovery};
use parking_lot::RwLock;

/// A resolved kind: how to address it and what it supports.
pub type KindEntry = (ApiResource, ApiCapabilities);

#[derive(Default)]
struct Inner {
    by_gvk: HashMap<GroupVersionKind, KindEntry>,
    listable: Vec<KindEntry>,
    populated: bool,
}

/// A cache of discovered resource kinds.
#[derive(Default)]
pub struct KindCache {
    inner: RwLock<Inner>,
}

impl KindCache {
    /// Create a new empty kind cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a kind, if cached.
    #[must_use]
    pub fn get(&self, gvk: &GroupVersionKind) -> Option<KindEntry> {
        self.inner.read().by_gvk.get(gvk).cloned()
    }

    /// Kinds that support `list`, at their preferred version.
    #[must_use]
    pub fn listable(&self) -> Vec<KindEntry> {
        self.inner.read().listable.clone()
    }

    /// Whether discovery results have been loaded.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.inner.read().populated
    }

    /// Replace the cache contents with a fresh discovery run.
    ///
    /// Groups for which `skip` returns true are left out of the listable set
    /// but still resolve by kind.
    pub fn refresh(&self, discovery: &Discovery, skip: impl Fn(&str) -> bool) {
        let mut by_gvk = HashMap::new();
        let mut listable = Vec::new();

        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
                    by_gvk.insert(gvk, (ar, caps));
                }
            }

            if skip(group.name()) {
                continue;
            }
            for (ar, caps) in group.recommended_resources() {
                if caps.supports_operation(verbs::LIST) {
                    listable.push((ar, caps));
                }
            }
        }

        tracing::debug!(
            kinds = by_gvk.len(),
            listable = listable.len(),
            "Refreshed kind cache"
        );

        *self.inner.write() = Inner {
            by_gvk,
            listable,
            populated: true,
        };
    }

    /// Forget all cached kinds.
    pub fn clear(&self) {
        *self.inner.write() = Inner::default();
    }

    /// Get the number of cached kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_gvk.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_gvk.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache() {
        let cache = KindCache::new();
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");

        assert!(cache.is_empty());
        assert!(!cache.is_populated());
        assert!(cache.get(&gvk).is_none());
        assert!(cache.listable().is_empty());
    }

    #[test]
    fn clear_resets_population() {
        let cache = KindCache::new();
        cache.clear();

        assert_eq!(cache.len(), 0);
        assert!(!cache.is_populated());
    }
}
