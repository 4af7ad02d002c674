// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Region provisioning.
//!
//! [`add_region`] builds one region's network footprint for a cluster:
//!
//! - a virtual network with a provider-assigned IPv6 /56, polled until the
//!   association is active;
//! - one subnet per availability zone, each with a derived IPv4 /20 and
//!   IPv6 /64, created in parallel;
//! - an internet gateway and a route table with default IPv4/IPv6 routes,
//!   associated with every subnet;
//! - the four fixed-purpose security groups, ensured concurrently with the
//!   subnet/routing chain;
//!
//! then resolves the cluster's core region and synchronizes cross-region
//! trust.  Every sub-step is describe-then-decide: an object that already
//! exists with the expected shape is success, so re-invoking `add_region`
//! after a partial failure converges without duplicating anything.

use crate::cloud::{
    Cloud, Ipv6AssociationState, RegionApi, SecurityGroupRole, Subnet, Vpc,
};
use crate::core_region::ensure_core_region;
use crate::tags::{self, standard_tags, NAME_TAG};
use crate::trust::{sync_trust, TrustOp};
use futures::future::{try_join, try_join_all};
use slog::{debug, info, o, warn, Logger};
use std::collections::BTreeMap;
use sye_fabric_common::backoff::{
    provider_async_policy, retry_notify, retry_transient, BackoffError,
};
use sye_fabric_common::{address, Error};

/// The network footprint created for one region, as reported back to the
/// caller.
#[derive(Clone, Debug)]
pub struct RegionNetwork {
    pub region_id: String,
    pub vpc: Vpc,
    pub subnets: Vec<Subnet>,
    pub internet_gateway_id: String,
    pub route_table_id: String,
    /// Security group role name to provider-assigned group id.
    pub security_groups: BTreeMap<String, String>,
    /// The cluster's core region after discovery-or-election.
    pub core_region_id: String,
}

/// Adds `region_id` to the cluster's network fabric.  Idempotent.
pub async fn add_region(
    log: &Logger,
    cloud: &dyn Cloud,
    cluster_id: &str,
    region_id: &str,
) -> Result<RegionNetwork, Error> {
    let log = log.new(o!(
        "cluster_id" => cluster_id.to_string(),
        "region" => region_id.to_string(),
    ));
    info!(log, "adding region to cluster network");
    let api = cloud.region(region_id);

    // Each step below is an idempotent describe-then-decide pass, so a
    // provider throttle anywhere inside it is absorbed by re-running the
    // whole step.
    let zones = retry_transient(&log, "list availability zones", || {
        api.list_availability_zones()
    })
    .await?;
    if zones.is_empty() {
        return Err(Error::internal_error(&format!(
            "region {} reports no availability zones",
            region_id
        )));
    }

    let vpc = retry_transient(&log, "ensure virtual network", || {
        ensure_vpc(&log, &*api, cluster_id)
    })
    .await?;
    let vpc = wait_for_ipv6_association(&log, &*api, &vpc).await?;

    // The security groups are independent of the subnet/routing chain.
    let ((subnets, gateway_id, route_table_id), security_groups) = try_join(
        retry_transient(&log, "ensure region network", || {
            ensure_network(&log, &*api, cluster_id, &vpc, &zones)
        }),
        retry_transient(&log, "ensure security groups", || {
            ensure_security_groups(&log, &*api, cluster_id, &vpc.id)
        }),
    )
    .await?;

    let core = retry_transient(&log, "resolve core region", || {
        ensure_core_region(&log, cloud, cluster_id, region_id, &subnets)
    })
    .await?;
    retry_transient(&log, "synchronize cross-region trust", || {
        sync_trust(&log, cloud, cluster_id, region_id, &core, TrustOp::Add)
    })
    .await?;

    info!(
        log,
        "region added to cluster network";
        "core_region" => &core.region_id,
        "subnets" => subnets.len(),
    );
    Ok(RegionNetwork {
        region_id: region_id.to_string(),
        vpc,
        subnets,
        internet_gateway_id: gateway_id,
        route_table_id,
        security_groups,
        core_region_id: core.region_id,
    })
}

async fn ensure_vpc(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
) -> Result<Vpc, Error> {
    if let Some(vpc) = api.find_vpc(cluster_id).await? {
        debug!(log, "virtual network already exists"; "vpc_id" => &vpc.id);
        return Ok(vpc);
    }
    let vpc = match api
        .create_vpc(*address::VPC_IPV4_BLOCK, &standard_tags(cluster_id))
        .await
    {
        Ok(vpc) => vpc,
        // Lost a creation race; the existing network is the one we want.
        Err(Error::ObjectAlreadyExists { .. }) => {
            api.find_vpc(cluster_id).await?.ok_or_else(|| {
                Error::internal_error(
                    "virtual network creation raced, but none is visible",
                )
            })?
        }
        Err(e) => return Err(e),
    };
    info!(log, "created virtual network"; "vpc_id" => &vpc.id);
    Ok(vpc)
}

/// Polls the virtual network until the provider reports its IPv6 block
/// association as active.  Association is asynchronous on the provider
/// side; subnet creation must not proceed until it completes.
async fn wait_for_ipv6_association(
    log: &Logger,
    api: &dyn RegionApi,
    vpc: &Vpc,
) -> Result<Vpc, Error> {
    if vpc.ipv6_state == Ipv6AssociationState::Associated {
        return Ok(vpc.clone());
    }
    let vpc_id = &vpc.id;
    let check = || async move {
        let observed = api.describe_vpc(vpc_id).await.map_err(|e| {
            if e.retryable() {
                BackoffError::transient(e)
            } else {
                BackoffError::permanent(e)
            }
        })?;
        match observed {
            Some(vpc) if vpc.ipv6_state == Ipv6AssociationState::Associated => {
                Ok(vpc)
            }
            Some(_) => Err(BackoffError::transient(Error::unavail(
                "ipv6 block association still pending",
            ))),
            None => Err(BackoffError::permanent(Error::not_found_by_id(
                sye_fabric_common::error::ResourceType::Vpc,
                vpc_id,
            ))),
        }
    };
    let log_pending = |error, delay| {
        warn!(
            log,
            "waiting for ipv6 block association";
            "vpc_id" => vpc_id,
            "retry_after" => ?delay,
            "error" => ?error,
        );
    };
    let vpc = retry_notify(provider_async_policy(), check, log_pending)
        .await
        .map_err(|e| match e {
            Error::ServiceUnavailable { .. } => Error::timed_out(&format!(
                "ipv6 block association on {} did not become active \
                 within the polling budget",
                vpc_id
            )),
            other => other,
        })?;
    debug!(
        log,
        "ipv6 block associated";
        "vpc_id" => &vpc.id,
        "ipv6_block" => ?vpc.ipv6_block,
    );
    Ok(vpc)
}

/// The subnet/routing chain: subnets, then gateway, then route table with
/// default routes, then the route-table associations.
async fn ensure_network(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
    vpc: &Vpc,
    zones: &[String],
) -> Result<(Vec<Subnet>, String, String), Error> {
    let subnets = ensure_subnets(log, api, cluster_id, vpc, zones).await?;
    let gateway_id = ensure_internet_gateway(log, api, cluster_id, vpc).await?;
    let route_table_id =
        ensure_route_table(log, api, cluster_id, vpc, &gateway_id).await?;
    try_join_all(subnets.iter().map(|subnet| {
        api.associate_route_table(&route_table_id, &subnet.id)
    }))
    .await?;
    Ok((subnets, gateway_id, route_table_id))
}

async fn ensure_subnets(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
    vpc: &Vpc,
    zones: &[String],
) -> Result<Vec<Subnet>, Error> {
    let cluster_block = vpc
        .ipv6_block
        .ok_or_else(|| {
            Error::internal_error(&format!(
                "virtual network {} has no ipv6 block after association",
                vpc.id
            ))
        })?
        .to_string();
    let existing = api.list_subnets(cluster_id).await?;

    // Zone subnets are independent of each other; create them in parallel,
    // zone index following the provider's ordering.
    let ensures = zones.iter().enumerate().map(|(index, zone)| {
        let existing = &existing;
        let cluster_block = &cluster_block;
        async move {
            let name = tags::subnet_name(cluster_id, zone);
            // Match by name within this network only; a stale same-named
            // subnet left behind in another network is never adopted.
            let subnet = match existing
                .iter()
                .find(|s| s.name == name && s.vpc_id == vpc.id)
            {
                Some(subnet) => {
                    debug!(
                        log,
                        "subnet already exists";
                        "subnet_id" => &subnet.id,
                        "availability_zone" => zone,
                    );
                    subnet.clone()
                }
                None => {
                    let index = u8::try_from(index).map_err(|_| {
                        Error::invalid_value(
                            "zone_index",
                            "more than 256 availability zones in region",
                        )
                    })?;
                    let ipv4_block = address::zone_ipv4_block(index)?;
                    let ipv6_block =
                        address::derive_zone_block(cluster_block, index)?;
                    let mut subnet_tags = standard_tags(cluster_id);
                    subnet_tags.insert(NAME_TAG.to_string(), name.clone());
                    let subnet = api
                        .create_subnet(
                            &vpc.id,
                            zone,
                            ipv4_block,
                            ipv6_block,
                            &subnet_tags,
                        )
                        .await?;
                    info!(
                        log,
                        "created subnet";
                        "subnet_id" => &subnet.id,
                        "availability_zone" => zone,
                        "ipv4_block" => %ipv4_block,
                        "ipv6_block" => %ipv6_block,
                    );
                    subnet
                }
            };
            // Applied on the existing path too, so a retry repairs a
            // previously-failed attribute change.
            api.map_public_ip_on_launch(&subnet.id, true).await?;
            Ok::<Subnet, Error>(subnet)
        }
    });
    let mut subnets = try_join_all(ensures).await?;
    subnets.sort_by(|a, b| a.availability_zone.cmp(&b.availability_zone));
    Ok(subnets)
}

async fn ensure_internet_gateway(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
    vpc: &Vpc,
) -> Result<String, Error> {
    let gateway = match api.find_internet_gateway(cluster_id).await? {
        Some(gateway) => {
            debug!(
                log,
                "internet gateway already exists";
                "gateway_id" => &gateway.id,
            );
            gateway
        }
        None => {
            let gateway = api
                .create_internet_gateway(&standard_tags(cluster_id))
                .await?;
            info!(log, "created internet gateway"; "gateway_id" => &gateway.id);
            gateway
        }
    };
    // Attaching is a no-op when already attached to this network.
    api.attach_internet_gateway(&gateway.id, &vpc.id).await?;
    Ok(gateway.id)
}

async fn ensure_route_table(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
    vpc: &Vpc,
    gateway_id: &str,
) -> Result<String, Error> {
    let route_table = match api
        .list_route_tables(cluster_id)
        .await?
        .into_iter()
        .find(|table| table.vpc_id == vpc.id)
    {
        Some(table) => {
            debug!(
                log,
                "route table already exists";
                "route_table_id" => &table.id,
            );
            table
        }
        None => {
            let table = api
                .create_route_table(&vpc.id, &standard_tags(cluster_id))
                .await?;
            info!(log, "created route table"; "route_table_id" => &table.id);
            table
        }
    };
    // Default routes for both families; recreating an existing route is a
    // provider no-op.
    api.create_route(&route_table.id, *address::DEFAULT_ROUTE_V4, gateway_id)
        .await?;
    api.create_route(&route_table.id, *address::DEFAULT_ROUTE_V6, gateway_id)
        .await?;
    Ok(route_table.id)
}

async fn ensure_security_groups(
    log: &Logger,
    api: &dyn RegionApi,
    cluster_id: &str,
    vpc_id: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let existing = api.list_security_groups(cluster_id).await?;
    let ensures = SecurityGroupRole::ALL.iter().map(|role| {
        let existing = &existing;
        async move {
            let group = match existing.iter().find(|group| {
                group.name == role.name() && group.vpc_id == vpc_id
            }) {
                Some(group) => {
                    debug!(
                        log,
                        "security group already exists";
                        "group" => role.name(),
                        "group_id" => &group.id,
                    );
                    group.clone()
                }
                None => {
                    let group = api
                        .create_security_group(
                            vpc_id,
                            role.name(),
                            &standard_tags(cluster_id),
                        )
                        .await?;
                    info!(
                        log,
                        "created security group";
                        "group" => role.name(),
                        "group_id" => &group.id,
                    );
                    group
                }
            };
            // Static rules already present are skipped by the provider.
            api.authorize_ingress(&group.id, &role.static_rules()).await?;
            Ok::<(String, String), Error>((role.name().to_string(), group.id))
        }
    });
    Ok(try_join_all(ensures).await?.into_iter().collect())
}
