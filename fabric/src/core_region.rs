// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core-region discovery and election.
//!
//! Exactly one region per cluster acts as the IPv6 trust anchor for all
//! others.  The role is recorded only in the provider's tag store (the
//! core-region marker tag on that region's subnets) and discovered by
//! scanning tags, never cached.
//!
//! The provider offers no conditional write on tags, so two concurrent
//! elections can both tag themselves.  Election therefore re-scans after
//! tagging and resolves any conflict deterministically: the
//! lexicographically smallest region id wins, and the elector removes the
//! marker from every other region it observes.  Every racer computes the
//! same winner, so repeated invocations converge.  Once a single region
//! holds the marker it is never reassigned.

use crate::cloud::{Cloud, Subnet};
use crate::tags::{core_marker_tag, TagIndex};
use futures::future::try_join_all;
use slog::{debug, info, o, warn, Logger};
use std::collections::BTreeMap;
use sye_fabric_common::Error;

/// The region currently holding the cluster's core-region marker.
#[derive(Clone, Debug)]
pub struct CoreRegion {
    pub region_id: String,
    /// The marked subnets, i.e. all of the core region's subnets.
    pub subnets: Vec<Subnet>,
}

/// Discovers the cluster's core region, if any.  Never elects.
///
/// This is the read-only path used by teardown.  Finding the marker on more
/// than one region is a broken invariant this path must not guess about;
/// running `add_region` (whose election path converges conflicts) repairs
/// it.
pub async fn find_core_region(
    log: &Logger,
    cloud: &dyn Cloud,
    cluster_id: &str,
) -> Result<Option<CoreRegion>, Error> {
    let mut marked =
        TagIndex::new(cloud).core_marked_subnets(cluster_id).await?;
    if marked.len() > 1 {
        let regions: Vec<&String> = marked.keys().collect();
        return Err(Error::internal_error(&format!(
            "core region marker held by multiple regions: {:?}",
            regions
        )));
    }
    match marked.pop_first() {
        Some((region_id, subnets)) => {
            debug!(log, "discovered core region"; "core_region" => &region_id);
            Ok(Some(CoreRegion { region_id, subnets }))
        }
        None => Ok(None),
    }
}

/// Returns the cluster's core region, electing the candidate region if no
/// region holds the marker yet.
///
/// `candidate_subnets` are the subnets of the region currently being
/// provisioned; election applies the marker tag to each of them.  The
/// existing core region is returned unchanged regardless of which region is
/// being added — the marker is never rebalanced.
pub async fn ensure_core_region(
    log: &Logger,
    cloud: &dyn Cloud,
    cluster_id: &str,
    region_id: &str,
    candidate_subnets: &[Subnet],
) -> Result<CoreRegion, Error> {
    let log = log.new(o!("cluster_id" => cluster_id.to_string()));
    let index = TagIndex::new(cloud);

    let marked = index.core_marked_subnets(cluster_id).await?;
    match marked.len() {
        1 => return Ok(sole_entry(marked)),
        0 => (),
        _ => return resolve_conflict(&log, cloud, cluster_id, marked).await,
    }

    // No region holds the marker; elect the candidate.
    if candidate_subnets.is_empty() {
        return Err(Error::internal_error(
            "cannot elect a core region with no subnets",
        ));
    }
    let marker = BTreeMap::from([(core_marker_tag(cluster_id), String::new())]);
    let api = cloud.region(region_id);
    try_join_all(
        candidate_subnets
            .iter()
            .map(|subnet| api.create_tags(&subnet.id, &marker)),
    )
    .await?;
    info!(log, "elected core region"; "core_region" => region_id);

    // Verify the election: a concurrent elector may have raced us.
    let marked = index.core_marked_subnets(cluster_id).await?;
    if marked.len() > 1 {
        return resolve_conflict(&log, cloud, cluster_id, marked).await;
    }
    Ok(CoreRegion {
        region_id: region_id.to_string(),
        subnets: candidate_subnets.to_vec(),
    })
}

fn sole_entry(mut marked: BTreeMap<String, Vec<Subnet>>) -> CoreRegion {
    // Caller has checked marked.len() == 1.
    match marked.pop_first() {
        Some((region_id, subnets)) => CoreRegion { region_id, subnets },
        None => unreachable!("sole_entry called with an empty marker map"),
    }
}

/// Converges a contested election: the lexicographically smallest region id
/// keeps the marker; every other region's marker tags are removed.
async fn resolve_conflict(
    log: &Logger,
    cloud: &dyn Cloud,
    cluster_id: &str,
    mut marked: BTreeMap<String, Vec<Subnet>>,
) -> Result<CoreRegion, Error> {
    let marker = vec![core_marker_tag(cluster_id)];
    let Some((winner, winner_subnets)) = marked.pop_first() else {
        return Err(Error::internal_error(
            "resolve_conflict called with an empty marker map",
        ));
    };
    for (loser, subnets) in marked {
        warn!(
            log,
            "contested core region election; removing marker";
            "winner" => &winner,
            "loser" => &loser,
        );
        let api = cloud.region(&loser);
        try_join_all(
            subnets.iter().map(|subnet| api.delete_tags(&subnet.id, &marker)),
        )
        .await?;
    }
    Ok(CoreRegion { region_id: winner, subnets: winner_subnets })
}
