//! Diff engine: partition desired and owned resources.
//!
//! ```text
//!   to_create = desired − actual
//!   to_update = desired ∩ actual
//!   to_delete = actual  − desired
//! ```
//!
//! Identities are compared on all five fields, once owned resources have been
//! re-keyed to the versions the render uses (see [`align_versions`]). The
//! sets are ordered, so the partition and any apply order derived from it are
//! deterministic.

use std::collections::BTreeSet;

use modsync_cluster::ClusterResource;
use modsync_core::ResourceIdentity;
use serde::{Deserialize, Serialize};

use crate::identity::DesiredResource;

/// The three-way split between what a render wants and what a module owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePartition {
    /// Desired but not present.
    pub to_create: BTreeSet<ResourceIdentity>,
    /// Desired and present; replaced in place.
    pub to_update: BTreeSet<ResourceIdentity>,
    /// Present but no longer desired.
    pub to_delete: BTreeSet<ResourceIdentity>,
}

impl ResourcePartition {
    /// Returns true if nothing needs to be created or deleted.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }

    /// Total number of identities across all three sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Returns true if all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition two identity sets.
#[must_use]
pub fn diff(
    desired: &BTreeSet<ResourceIdentity>,
    actual: &BTreeSet<ResourceIdentity>,
) -> ResourcePartition {
    ResourcePartition {
        to_create: desired.difference(actual).cloned().collect(),
        to_update: desired.intersection(actual).cloned().collect(),
        to_delete: actual.difference(desired).cloned().collect(),
    }
}

/// Re-key owned resources to the version the render addresses them by.
///
/// The cluster lists each kind at its preferred version, while a render may
/// use any served version of the group. An owned object matching a desired
/// one on group, kind, namespace and name takes the desired identity, so the
/// same object never lands in both `to_create` and `to_delete`.
#[must_use]
pub fn align_versions(
    desired: &[DesiredResource],
    mut owned: Vec<ClusterResource>,
) -> Vec<ClusterResource> {
    let exact: BTreeSet<&ResourceIdentity> = desired.iter().map(|d| &d.identity).collect();

    for resource in &mut owned {
        if exact.contains(&resource.identity) {
            continue;
        }
        if let Some(wanted) = desired
            .iter()
            .find(|d| d.identity.same_object(&resource.identity))
        {
            tracing::debug!(
                listed = %resource.identity,
                rendered = %wanted.identity,
                "Matched owned resource across API versions"
            );
            resource.identity = wanted.identity.clone();
        }
    }

    owned.sort_by(|a, b| a.identity.cmp(&b.identity));
    owned
}

/// Partition a resolved render against the resources a module owns.
#[must_use]
pub fn diff_resources(desired: &[DesiredResource], owned: &[ClusterResource]) -> ResourcePartition {
    let desired: BTreeSet<_> = desired.iter().map(|r| r.identity.clone()).collect();
    let actual: BTreeSet<_> = owned.iter().map(|r| r.identity.clone()).collect();
    diff(&desired, &actual)
}
