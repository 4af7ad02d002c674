// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Region teardown.
//!
//! [`delete_region`] reverses provisioning in dependency order: revoke this
//! region's trust rules on the core region first (the local half disappears
//! with the local `default` group), then security groups, subnets, the
//! internet gateway, the cluster-tagged route tables, and the virtual
//! network last.  Every step treats an already-absent object as success and
//! retries transient provider errors in place, so the operation can be
//! re-invoked safely after a partial failure — including for a region that
//! was never added at all.

use crate::cloud::Cloud;
use crate::core_region::find_core_region;
use crate::trust::{sync_trust, TrustOp};
use futures::future::try_join_all;
use slog::{debug, info, o, Logger};
use sye_fabric_common::backoff::retry_transient;
use sye_fabric_common::Error;

/// Removes `region_id`'s footprint from the cluster's network fabric.
/// Idempotent; deleting an absent region is a no-op.
pub async fn delete_region(
    log: &Logger,
    cloud: &dyn Cloud,
    cluster_id: &str,
    region_id: &str,
) -> Result<(), Error> {
    let log = log.new(o!(
        "cluster_id" => cluster_id.to_string(),
        "region" => region_id.to_string(),
    ));
    info!(log, "deleting region from cluster network");
    let api = cloud.region(region_id);
    let api = &*api;

    // Revoke the reverse-direction trust rules while this region's subnets
    // are still listable.  Discovery only; teardown never elects.
    let core = retry_transient(&log, "discover core region", || {
        find_core_region(&log, cloud, cluster_id)
    })
    .await?;
    match core {
        Some(core) if core.region_id != region_id => {
            retry_transient(&log, "revoke cross-region trust", || {
                sync_trust(
                    &log,
                    cloud,
                    cluster_id,
                    region_id,
                    &core,
                    TrustOp::Remove,
                )
            })
            .await?;
        }
        Some(_) => {
            debug!(log, "region is the core region; no reverse trust rules");
        }
        None => debug!(log, "cluster has no core region"),
    }

    let vpc = retry_transient(&log, "locate virtual network", || {
        api.find_vpc(cluster_id)
    })
    .await?;

    // Deleting the groups also deletes the subnet-scoped trust rules on the
    // local default group, completing the local half of the revocation.
    let group_count =
        retry_transient(&log, "delete security groups", || async move {
            let groups = api.list_security_groups(cluster_id).await?;
            try_join_all(groups.iter().map(|group| async move {
                ok_if_absent(api.delete_security_group(&group.id).await)
            }))
            .await?;
            Ok(groups.len())
        })
        .await?;
    debug!(log, "deleted security groups"; "count" => group_count);

    let subnet_count =
        retry_transient(&log, "delete subnets", || async move {
            let subnets = api.list_subnets(cluster_id).await?;
            try_join_all(subnets.iter().map(|subnet| async move {
                ok_if_absent(api.delete_subnet(&subnet.id).await)
            }))
            .await?;
            Ok(subnets.len())
        })
        .await?;
    debug!(log, "deleted subnets"; "count" => subnet_count);

    retry_transient(&log, "delete internet gateway", || async move {
        let Some(gateway) = api.find_internet_gateway(cluster_id).await?
        else {
            return Ok(());
        };
        if let Some(vpc_id) = &gateway.attached_vpc {
            ok_if_absent(
                api.detach_internet_gateway(&gateway.id, vpc_id).await,
            )?;
        }
        ok_if_absent(api.delete_internet_gateway(&gateway.id).await)
    })
    .await?;

    // Filtered by tag, not by exhaustive listing, so unrelated
    // infrastructure in the same account is never touched.
    retry_transient(&log, "delete route tables", || async move {
        for table in api.list_route_tables(cluster_id).await? {
            ok_if_absent(api.delete_route_table(&table.id).await)?;
        }
        Ok(())
    })
    .await?;

    if let Some(vpc) = &vpc {
        let vpc_id = &vpc.id;
        retry_transient(&log, "delete virtual network", || async move {
            ok_if_absent(api.delete_vpc(vpc_id).await)
        })
        .await?;
        debug!(log, "deleted virtual network"; "vpc_id" => vpc_id);
    }

    info!(log, "region deleted from cluster network");
    Ok(())
}

/// A missing object during teardown is success, not failure.
fn ok_if_absent(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(Error::ObjectNotFound { .. }) => Ok(()),
        other => other,
    }
}
