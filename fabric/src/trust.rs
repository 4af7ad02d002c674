// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-region trust synchronization.
//!
//! Every non-core region exchanges IPv6 trust with the core region's
//! `default` security group: the core admits each of the region's subnet
//! blocks, and the region admits each of the core's.  Rules are kept
//! one-per-subnet so a single region's footprint can be revoked without
//! disturbing the rules other regions depend on.
//!
//! Both directions are applied concurrently.  A failure of either half
//! leaves a recoverable partial state: re-running the synchronization
//! converges it, since granting an existing rule and revoking a missing one
//! are provider no-ops.

use crate::cloud::{
    Cloud, IngressRule, RegionApi, SecurityGroup, SecurityGroupRole,
};
use crate::core_region::CoreRegion;
use futures::future::try_join;
use slog::{debug, info, o, Logger};
use sye_fabric_common::Error;

/// Which way a trust synchronization moves: granting a region's rules or
/// revoking them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustOp {
    Add,
    Remove,
}

/// Synchronizes trust between `region_id` and the cluster's core region.
///
/// When the region is itself the core, no cross-region rules are needed:
/// the core trusts itself implicitly through its default group's broader
/// rule set.
pub async fn sync_trust(
    log: &Logger,
    cloud: &dyn Cloud,
    cluster_id: &str,
    region_id: &str,
    core: &CoreRegion,
    op: TrustOp,
) -> Result<(), Error> {
    if region_id == core.region_id {
        debug!(
            log,
            "region is the core region; no cross-region trust rules";
            "region" => region_id,
        );
        return Ok(());
    }
    let log = log.new(o!(
        "region" => region_id.to_string(),
        "core_region" => core.region_id.to_string(),
    ));

    let api = cloud.region(region_id);
    let core_api = cloud.region(&core.region_id);
    let local_subnets = api.list_subnets(cluster_id).await?;

    // One rule per remote subnet, in each direction.
    let rules_on_core: Vec<IngressRule> = local_subnets
        .iter()
        .map(|subnet| IngressRule::trust(subnet.ipv6_block))
        .collect();
    let rules_on_local: Vec<IngressRule> = core
        .subnets
        .iter()
        .map(|subnet| IngressRule::trust(subnet.ipv6_block))
        .collect();

    try_join(
        apply_half(&log, &*core_api, cluster_id, &rules_on_core, op),
        apply_half(&log, &*api, cluster_id, &rules_on_local, op),
    )
    .await?;

    info!(
        log,
        "synchronized cross-region trust";
        "op" => ?op,
        "rules_on_core" => rules_on_core.len(),
        "rules_on_local" => rules_on_local.len(),
    );
    Ok(())
}

/// Grants or revokes `rules` on one region's `default` security group.
async fn apply_half(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
    rules: &[IngressRule],
    op: TrustOp,
) -> Result<(), Error> {
    let Some(group) = default_security_group(api, cluster_id).await? else {
        return match op {
            TrustOp::Add => Err(Error::internal_error(&format!(
                "region {} has no default security group; \
                 is it fully provisioned?",
                api.region_id(),
            ))),
            // Nothing to revoke if the group is already gone.
            TrustOp::Remove => {
                debug!(
                    log,
                    "default security group absent; nothing to revoke";
                    "in_region" => api.region_id(),
                );
                Ok(())
            }
        };
    };
    match op {
        TrustOp::Add => api.authorize_ingress(&group.id, rules).await,
        TrustOp::Remove => api.revoke_ingress(&group.id, rules).await,
    }
}

async fn default_security_group(
    api: &dyn RegionApi,
    cluster_id: &str,
) -> Result<Option<SecurityGroup>, Error> {
    Ok(api
        .list_security_groups(cluster_id)
        .await?
        .into_iter()
        .find(|group| group.name == SecurityGroupRole::Default.name()))
}
