// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tag conventions and the tag-driven resource index.
//!
//! The provider's tag store is the fabric's only persistence: every
//! resource belonging to a cluster carries the cluster tags, the core
//! region is marked by a tag on its subnets, and all discovery is a tag
//! scan.  This keeps the fabric stateless and crash-safe at the cost of
//! scan latency; do not introduce a cached registry that could drift from
//! the tags.

use crate::cloud::{Cloud, Subnet};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use sye_fabric_common::Error;

/// Cluster-scope tag carrying the cluster id as its value.
pub const CLUSTER_ID_TAG: &str = "SyeClusterId";

/// The provider's conventional name tag.
pub const NAME_TAG: &str = "Name";

/// Per-cluster marker tag (`SyeCluster_<clusterId>`, empty value).
pub fn cluster_marker_tag(cluster_id: &str) -> String {
    format!("SyeCluster_{}", cluster_id)
}

/// Core-region marker tag (`SyeCore_<clusterId>`, empty value), applied to
/// every subnet of exactly one region.
pub fn core_marker_tag(cluster_id: &str) -> String {
    format!("SyeCore_{}", cluster_id)
}

/// The tags applied to every resource the fabric creates for a cluster.
pub fn standard_tags(cluster_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_ID_TAG.to_string(), cluster_id.to_string()),
        (cluster_marker_tag(cluster_id), String::new()),
    ])
}

/// Subnet naming convention: `<clusterId>-<availabilityZoneLetter>`, the
/// zone letter being the trailing character of the provider's AZ name.
pub fn subnet_name(cluster_id: &str, availability_zone: &str) -> String {
    match availability_zone.chars().last() {
        Some(letter) => format!("{}-{}", cluster_id, letter),
        None => cluster_id.to_string(),
    }
}

/// Read-only, cluster-scoped view of tagged resources across every region.
pub struct TagIndex<'a> {
    cloud: &'a dyn Cloud,
}

impl<'a> TagIndex<'a> {
    pub fn new(cloud: &'a dyn Cloud) -> TagIndex<'a> {
        TagIndex { cloud }
    }

    /// All of the cluster's subnets, grouped by region.  Regions with no
    /// footprint are omitted.
    pub async fn cluster_subnets(
        &self,
        cluster_id: &str,
    ) -> Result<BTreeMap<String, Vec<Subnet>>, Error> {
        let regions = self.cloud.regions().await?;
        let scans = regions.iter().map(|region_id| {
            let api = self.cloud.region(region_id);
            async move {
                let subnets = api.list_subnets(cluster_id).await?;
                Ok::<_, Error>((region_id.clone(), subnets))
            }
        });
        Ok(try_join_all(scans)
            .await?
            .into_iter()
            .filter(|(_, subnets)| !subnets.is_empty())
            .collect())
    }

    /// The subnets carrying the cluster's core-region marker, grouped by
    /// region.  A healthy cluster has at most one entry here.
    pub async fn core_marked_subnets(
        &self,
        cluster_id: &str,
    ) -> Result<BTreeMap<String, Vec<Subnet>>, Error> {
        let marker = core_marker_tag(cluster_id);
        let mut marked = BTreeMap::new();
        for (region_id, subnets) in self.cluster_subnets(cluster_id).await? {
            let with_marker: Vec<Subnet> = subnets
                .into_iter()
                .filter(|subnet| subnet.tags.contains_key(&marker))
                .collect();
            if !with_marker.is_empty() {
                marked.insert(region_id, with_marker);
            }
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(cluster_marker_tag("prod"), "SyeCluster_prod");
        assert_eq!(core_marker_tag("prod"), "SyeCore_prod");
        let tags = standard_tags("prod");
        assert_eq!(tags.get(CLUSTER_ID_TAG).map(String::as_str), Some("prod"));
        assert_eq!(tags.get("SyeCluster_prod").map(String::as_str), Some(""));
    }

    #[test]
    fn test_subnet_name_uses_zone_letter() {
        assert_eq!(subnet_name("prod", "eu-central-1a"), "prod-a");
        assert_eq!(subnet_name("prod", "us-east-1c"), "prod-c");
    }
}
