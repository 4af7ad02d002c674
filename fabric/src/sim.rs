// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated cloud-provider implementation.
//!
//! An in-memory [`Cloud`] faithful to the provider semantics the fabric
//! relies on: tag-filtered listing, `ObjectNotFound` on deleting absent
//! objects, no-op duplicate rule grants, dependency checks on virtual
//! network deletion, and an IPv6 block association that only becomes
//! active after a configurable number of describe polls.  Failure
//! injection knobs let tests exercise partial-failure retry paths.

use crate::cloud::{
    Cloud, IngressRule, InternetGateway, Ipv6AssociationState, RegionApi,
    RouteTable, SecurityGroup, Subnet, Vpc,
};
use crate::tags::CLUSTER_ID_TAG;
use async_trait::async_trait;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use slog::{debug, o, Logger};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use sye_fabric_common::error::ResourceType;
use sye_fabric_common::Error;
use uuid::Uuid;

/// How many describe polls a new virtual network's IPv6 association takes
/// to become active, unless overridden.
const DEFAULT_ASSOCIATION_POLLS: u32 = 2;

struct SimVpc {
    ipv4_block: Ipv4Network,
    ipv6_block: Ipv6Network,
    polls_remaining: u32,
    tags: BTreeMap<String, String>,
}

struct SimSubnet {
    vpc_id: String,
    availability_zone: String,
    ipv4_block: Ipv4Network,
    ipv6_block: Ipv6Network,
    map_public_ip: bool,
    tags: BTreeMap<String, String>,
}

struct SimGateway {
    attached_vpc: Option<String>,
    tags: BTreeMap<String, String>,
}

struct SimRouteTable {
    vpc_id: String,
    routes: BTreeMap<String, String>,
    associations: BTreeSet<String>,
    tags: BTreeMap<String, String>,
}

struct SimSecurityGroup {
    vpc_id: String,
    name: String,
    ingress: Vec<IngressRule>,
    tags: BTreeMap<String, String>,
}

struct SimRegion {
    index: u16,
    zones: Vec<String>,
    next_vpc: u16,
    vpcs: HashMap<String, SimVpc>,
    subnets: HashMap<String, SimSubnet>,
    gateways: HashMap<String, SimGateway>,
    route_tables: HashMap<String, SimRouteTable>,
    security_groups: HashMap<String, SimSecurityGroup>,
    /// Fail this many upcoming route-table creations with a transient
    /// error.
    fail_route_table_creations: u32,
}

struct SimState {
    association_polls: u32,
    regions: HashMap<String, SimRegion>,
}

struct SimCloudInner {
    log: Logger,
    state: Mutex<SimState>,
}

/// An in-memory cloud provider.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimCloud {
    inner: Arc<SimCloudInner>,
}

impl SimCloud {
    /// Creates a provider offering the given regions, each with its
    /// availability zones.
    pub fn new(log: &Logger, regions: &[(&str, &[&str])]) -> SimCloud {
        let regions = regions
            .iter()
            .enumerate()
            .map(|(index, (region_id, zones))| {
                (
                    region_id.to_string(),
                    SimRegion {
                        index: index as u16,
                        zones: zones.iter().map(|z| z.to_string()).collect(),
                        next_vpc: 0,
                        vpcs: HashMap::new(),
                        subnets: HashMap::new(),
                        gateways: HashMap::new(),
                        route_tables: HashMap::new(),
                        security_groups: HashMap::new(),
                        fail_route_table_creations: 0,
                    },
                )
            })
            .collect();
        SimCloud {
            inner: Arc::new(SimCloudInner {
                log: log.new(o!("component" => "sim-cloud")),
                state: Mutex::new(SimState {
                    association_polls: DEFAULT_ASSOCIATION_POLLS,
                    regions,
                }),
            }),
        }
    }

    /// Overrides how many describe polls IPv6 association takes for
    /// networks created after this call.
    pub fn set_ipv6_association_polls(&self, polls: u32) {
        self.inner.state.lock().unwrap().association_polls = polls;
    }

    /// Makes the next `count` route-table creations in `region_id` fail
    /// with a transient error.
    pub fn inject_route_table_failures(&self, region_id: &str, count: u32) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(region) = state.regions.get_mut(region_id) {
            region.fail_route_table_creations = count;
        }
    }
}

#[async_trait]
impl Cloud for SimCloud {
    async fn regions(&self) -> Result<Vec<String>, Error> {
        let state = self.inner.state.lock().unwrap();
        let mut regions: Vec<String> = state.regions.keys().cloned().collect();
        regions.sort();
        Ok(regions)
    }

    fn region(&self, region_id: &str) -> Arc<dyn RegionApi> {
        Arc::new(SimRegionApi {
            inner: self.inner.clone(),
            region_id: region_id.to_string(),
        })
    }
}

struct SimRegionApi {
    inner: Arc<SimCloudInner>,
    region_id: String,
}

fn new_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..17])
}

fn vpc_view(id: &str, vpc: &SimVpc) -> Vpc {
    Vpc {
        id: id.to_string(),
        ipv4_block: vpc.ipv4_block,
        ipv6_block: Some(vpc.ipv6_block),
        ipv6_state: if vpc.polls_remaining == 0 {
            Ipv6AssociationState::Associated
        } else {
            Ipv6AssociationState::Associating
        },
    }
}

fn subnet_view(id: &str, subnet: &SimSubnet) -> Subnet {
    Subnet {
        id: id.to_string(),
        vpc_id: subnet.vpc_id.clone(),
        name: subnet
            .tags
            .get(crate::tags::NAME_TAG)
            .cloned()
            .unwrap_or_default(),
        availability_zone: subnet.availability_zone.clone(),
        ipv4_block: subnet.ipv4_block,
        ipv6_block: subnet.ipv6_block,
        tags: subnet.tags.clone(),
    }
}

fn tagged_with_cluster(
    tags: &BTreeMap<String, String>,
    cluster_id: &str,
) -> bool {
    tags.get(CLUSTER_ID_TAG).map(String::as_str) == Some(cluster_id)
}

impl SimRegionApi {
    fn with_region<T>(
        &self,
        f: impl FnOnce(&mut SimRegion, u32) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut state = self.inner.state.lock().unwrap();
        let association_polls = state.association_polls;
        let region =
            state.regions.get_mut(&self.region_id).ok_or_else(|| {
                Error::internal_error(&format!(
                    "unknown region {:?}",
                    self.region_id
                ))
            })?;
        f(region, association_polls)
    }
}

#[async_trait]
impl RegionApi for SimRegionApi {
    fn region_id(&self) -> &str {
        &self.region_id
    }

    async fn list_availability_zones(&self) -> Result<Vec<String>, Error> {
        self.with_region(|region, _| Ok(region.zones.clone()))
    }

    async fn find_vpc(&self, cluster_id: &str) -> Result<Option<Vpc>, Error> {
        self.with_region(|region, _| {
            Ok(region
                .vpcs
                .iter()
                .filter(|(_, vpc)| tagged_with_cluster(&vpc.tags, cluster_id))
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(id, vpc)| vpc_view(id, vpc)))
        })
    }

    async fn describe_vpc(&self, vpc_id: &str) -> Result<Option<Vpc>, Error> {
        self.with_region(|region, _| {
            let Some(vpc) = region.vpcs.get_mut(vpc_id) else {
                return Ok(None);
            };
            // Each describe is one poll toward association completing.
            vpc.polls_remaining = vpc.polls_remaining.saturating_sub(1);
            Ok(Some(vpc_view(vpc_id, vpc)))
        })
    }

    async fn create_vpc(
        &self,
        ipv4_block: Ipv4Network,
        tags: &BTreeMap<String, String>,
    ) -> Result<Vpc, Error> {
        let log = &self.inner.log;
        self.with_region(|region, association_polls| {
            let id = new_id("vpc");
            // A distinct, stable /56 per network: hextet 3's low byte is
            // left zero for the zone derivation.
            let block = Ipv6Network::new(
                Ipv6Addr::new(
                    0xfd12,
                    0x3456,
                    region.index,
                    region.next_vpc << 8,
                    0,
                    0,
                    0,
                    0,
                ),
                56,
            )
            .map_err(|e| {
                Error::internal_error(&format!("constructing sim /56: {}", e))
            })?;
            region.next_vpc += 1;
            region.vpcs.insert(
                id.clone(),
                SimVpc {
                    ipv4_block,
                    ipv6_block: block,
                    polls_remaining: association_polls,
                    tags: tags.clone(),
                },
            );
            debug!(
                log,
                "sim: created vpc";
                "vpc_id" => &id,
                "ipv6_block" => %block,
            );
            let vpc = &region.vpcs[&id];
            Ok(vpc_view(&id, vpc))
        })
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), Error> {
        self.with_region(|region, _| {
            if !region.vpcs.contains_key(vpc_id) {
                return Err(Error::not_found_by_id(ResourceType::Vpc, vpc_id));
            }
            let has_dependents = region
                .subnets
                .values()
                .any(|subnet| subnet.vpc_id == vpc_id)
                || region
                    .gateways
                    .values()
                    .any(|gw| gw.attached_vpc.as_deref() == Some(vpc_id))
                || region
                    .route_tables
                    .values()
                    .any(|table| table.vpc_id == vpc_id)
                || region
                    .security_groups
                    .values()
                    .any(|group| group.vpc_id == vpc_id);
            if has_dependents {
                return Err(Error::invalid_request(&format!(
                    "virtual network {} has dependent objects",
                    vpc_id
                )));
            }
            region.vpcs.remove(vpc_id);
            Ok(())
        })
    }

    async fn list_subnets(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<Subnet>, Error> {
        self.with_region(|region, _| {
            let mut subnets: Vec<Subnet> = region
                .subnets
                .iter()
                .filter(|(_, subnet)| {
                    tagged_with_cluster(&subnet.tags, cluster_id)
                })
                .map(|(id, subnet)| subnet_view(id, subnet))
                .collect();
            subnets.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(subnets)
        })
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        ipv4_block: Ipv4Network,
        ipv6_block: Ipv6Network,
        tags: &BTreeMap<String, String>,
    ) -> Result<Subnet, Error> {
        self.with_region(|region, _| {
            if !region.vpcs.contains_key(vpc_id) {
                return Err(Error::not_found_by_id(ResourceType::Vpc, vpc_id));
            }
            let conflict = region.subnets.values().any(|subnet| {
                subnet.vpc_id == vpc_id
                    && (subnet.ipv4_block == ipv4_block
                        || subnet.ipv6_block == ipv6_block)
            });
            if conflict {
                return Err(Error::already_exists(
                    ResourceType::Subnet,
                    &ipv4_block.to_string(),
                ));
            }
            let id = new_id("subnet");
            region.subnets.insert(
                id.clone(),
                SimSubnet {
                    vpc_id: vpc_id.to_string(),
                    availability_zone: availability_zone.to_string(),
                    ipv4_block,
                    ipv6_block,
                    map_public_ip: false,
                    tags: tags.clone(),
                },
            );
            Ok(subnet_view(&id, &region.subnets[&id]))
        })
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), Error> {
        self.with_region(|region, _| {
            if region.subnets.remove(subnet_id).is_none() {
                return Err(Error::not_found_by_id(
                    ResourceType::Subnet,
                    subnet_id,
                ));
            }
            // The provider drops route-table associations with the subnet.
            for table in region.route_tables.values_mut() {
                table.associations.remove(subnet_id);
            }
            Ok(())
        })
    }

    async fn map_public_ip_on_launch(
        &self,
        subnet_id: &str,
        enable: bool,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let subnet = region.subnets.get_mut(subnet_id).ok_or_else(|| {
                Error::not_found_by_id(ResourceType::Subnet, subnet_id)
            })?;
            subnet.map_public_ip = enable;
            Ok(())
        })
    }

    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let existing = resource_tags(region, resource_id)?;
            existing.extend(
                tags.iter().map(|(k, v)| (k.clone(), v.clone())),
            );
            Ok(())
        })
    }

    async fn delete_tags(
        &self,
        resource_id: &str,
        keys: &[String],
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let existing = resource_tags(region, resource_id)?;
            for key in keys {
                existing.remove(key);
            }
            Ok(())
        })
    }

    async fn find_internet_gateway(
        &self,
        cluster_id: &str,
    ) -> Result<Option<InternetGateway>, Error> {
        self.with_region(|region, _| {
            Ok(region
                .gateways
                .iter()
                .filter(|(_, gw)| tagged_with_cluster(&gw.tags, cluster_id))
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(id, gw)| InternetGateway {
                    id: id.clone(),
                    attached_vpc: gw.attached_vpc.clone(),
                }))
        })
    }

    async fn create_internet_gateway(
        &self,
        tags: &BTreeMap<String, String>,
    ) -> Result<InternetGateway, Error> {
        self.with_region(|region, _| {
            let id = new_id("igw");
            region.gateways.insert(
                id.clone(),
                SimGateway { attached_vpc: None, tags: tags.clone() },
            );
            Ok(InternetGateway { id, attached_vpc: None })
        })
    }

    async fn attach_internet_gateway(
        &self,
        gateway_id: &str,
        vpc_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            if !region.vpcs.contains_key(vpc_id) {
                return Err(Error::not_found_by_id(ResourceType::Vpc, vpc_id));
            }
            let gateway =
                region.gateways.get_mut(gateway_id).ok_or_else(|| {
                    Error::not_found_by_id(
                        ResourceType::InternetGateway,
                        gateway_id,
                    )
                })?;
            match &gateway.attached_vpc {
                Some(attached) if attached == vpc_id => Ok(()),
                Some(attached) => Err(Error::invalid_request(&format!(
                    "gateway {} is attached to {}",
                    gateway_id, attached
                ))),
                None => {
                    gateway.attached_vpc = Some(vpc_id.to_string());
                    Ok(())
                }
            }
        })
    }

    async fn detach_internet_gateway(
        &self,
        gateway_id: &str,
        vpc_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let gateway =
                region.gateways.get_mut(gateway_id).ok_or_else(|| {
                    Error::not_found_by_id(
                        ResourceType::InternetGateway,
                        gateway_id,
                    )
                })?;
            if gateway.attached_vpc.as_deref() != Some(vpc_id) {
                return Err(Error::not_found_by_id(
                    ResourceType::InternetGateway,
                    gateway_id,
                ));
            }
            gateway.attached_vpc = None;
            Ok(())
        })
    }

    async fn delete_internet_gateway(
        &self,
        gateway_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let Some(gateway) = region.gateways.get(gateway_id) else {
                return Err(Error::not_found_by_id(
                    ResourceType::InternetGateway,
                    gateway_id,
                ));
            };
            if gateway.attached_vpc.is_some() {
                return Err(Error::invalid_request(&format!(
                    "gateway {} is still attached",
                    gateway_id
                )));
            }
            region.gateways.remove(gateway_id);
            Ok(())
        })
    }

    async fn list_route_tables(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<RouteTable>, Error> {
        self.with_region(|region, _| {
            let mut tables: Vec<RouteTable> = region
                .route_tables
                .iter()
                .filter(|(_, table)| {
                    tagged_with_cluster(&table.tags, cluster_id)
                })
                .map(|(id, table)| RouteTable {
                    id: id.clone(),
                    vpc_id: table.vpc_id.clone(),
                })
                .collect();
            tables.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(tables)
        })
    }

    async fn create_route_table(
        &self,
        vpc_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<RouteTable, Error> {
        self.with_region(|region, _| {
            if region.fail_route_table_creations > 0 {
                region.fail_route_table_creations -= 1;
                return Err(Error::unavail(
                    "simulated provider throttle creating route table",
                ));
            }
            if !region.vpcs.contains_key(vpc_id) {
                return Err(Error::not_found_by_id(ResourceType::Vpc, vpc_id));
            }
            let id = new_id("rtb");
            region.route_tables.insert(
                id.clone(),
                SimRouteTable {
                    vpc_id: vpc_id.to_string(),
                    routes: BTreeMap::new(),
                    associations: BTreeSet::new(),
                    tags: tags.clone(),
                },
            );
            Ok(RouteTable { id, vpc_id: vpc_id.to_string() })
        })
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination: IpNetwork,
        gateway_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            if !region.gateways.contains_key(gateway_id) {
                return Err(Error::not_found_by_id(
                    ResourceType::InternetGateway,
                    gateway_id,
                ));
            }
            let table = region
                .route_tables
                .get_mut(route_table_id)
                .ok_or_else(|| {
                    Error::not_found_by_id(
                        ResourceType::RouteTable,
                        route_table_id,
                    )
                })?;
            table
                .routes
                .insert(destination.to_string(), gateway_id.to_string());
            Ok(())
        })
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            if !region.subnets.contains_key(subnet_id) {
                return Err(Error::not_found_by_id(
                    ResourceType::Subnet,
                    subnet_id,
                ));
            }
            let table = region
                .route_tables
                .get_mut(route_table_id)
                .ok_or_else(|| {
                    Error::not_found_by_id(
                        ResourceType::RouteTable,
                        route_table_id,
                    )
                })?;
            table.associations.insert(subnet_id.to_string());
            Ok(())
        })
    }

    async fn delete_route_table(
        &self,
        route_table_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let Some(table) = region.route_tables.get(route_table_id) else {
                return Err(Error::not_found_by_id(
                    ResourceType::RouteTable,
                    route_table_id,
                ));
            };
            if !table.associations.is_empty() {
                return Err(Error::invalid_request(&format!(
                    "route table {} still has subnet associations",
                    route_table_id
                )));
            }
            region.route_tables.remove(route_table_id);
            Ok(())
        })
    }

    async fn list_security_groups(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<SecurityGroup>, Error> {
        self.with_region(|region, _| {
            let mut groups: Vec<SecurityGroup> = region
                .security_groups
                .iter()
                .filter(|(_, group)| {
                    tagged_with_cluster(&group.tags, cluster_id)
                })
                .map(|(id, group)| SecurityGroup {
                    id: id.clone(),
                    name: group.name.clone(),
                    vpc_id: group.vpc_id.clone(),
                    ingress: group.ingress.clone(),
                })
                .collect();
            groups.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(groups)
        })
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<SecurityGroup, Error> {
        self.with_region(|region, _| {
            if !region.vpcs.contains_key(vpc_id) {
                return Err(Error::not_found_by_id(ResourceType::Vpc, vpc_id));
            }
            let duplicate = region
                .security_groups
                .values()
                .any(|group| group.vpc_id == vpc_id && group.name == name);
            if duplicate {
                return Err(Error::already_exists(
                    ResourceType::SecurityGroup,
                    name,
                ));
            }
            let id = new_id("sg");
            region.security_groups.insert(
                id.clone(),
                SimSecurityGroup {
                    vpc_id: vpc_id.to_string(),
                    name: name.to_string(),
                    ingress: Vec::new(),
                    tags: tags.clone(),
                },
            );
            Ok(SecurityGroup {
                id,
                name: name.to_string(),
                vpc_id: vpc_id.to_string(),
                ingress: Vec::new(),
            })
        })
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let group =
                region.security_groups.get_mut(group_id).ok_or_else(|| {
                    Error::not_found_by_id(
                        ResourceType::SecurityGroup,
                        group_id,
                    )
                })?;
            for rule in rules {
                if !group.ingress.contains(rule) {
                    group.ingress.push(*rule);
                }
            }
            Ok(())
        })
    }

    async fn revoke_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            let group =
                region.security_groups.get_mut(group_id).ok_or_else(|| {
                    Error::not_found_by_id(
                        ResourceType::SecurityGroup,
                        group_id,
                    )
                })?;
            group.ingress.retain(|rule| !rules.contains(rule));
            Ok(())
        })
    }

    async fn delete_security_group(
        &self,
        group_id: &str,
    ) -> Result<(), Error> {
        self.with_region(|region, _| {
            if region.security_groups.remove(group_id).is_none() {
                return Err(Error::not_found_by_id(
                    ResourceType::SecurityGroup,
                    group_id,
                ));
            }
            Ok(())
        })
    }
}

fn resource_tags<'a>(
    region: &'a mut SimRegion,
    resource_id: &str,
) -> Result<&'a mut BTreeMap<String, String>, Error> {
    if let Some(vpc) = region.vpcs.get_mut(resource_id) {
        return Ok(&mut vpc.tags);
    }
    if let Some(subnet) = region.subnets.get_mut(resource_id) {
        return Ok(&mut subnet.tags);
    }
    if let Some(gateway) = region.gateways.get_mut(resource_id) {
        return Ok(&mut gateway.tags);
    }
    if let Some(table) = region.route_tables.get_mut(resource_id) {
        return Ok(&mut table.tags);
    }
    if let Some(group) = region.security_groups.get_mut(resource_id) {
        return Ok(&mut group.tags);
    }
    Err(Error::not_found_by_id(ResourceType::Tag, resource_id))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::Protocol;
    use crate::tags::standard_tags;
    use sye_fabric_common::dev::test_setup_log;

    fn sim() -> SimCloud {
        let log = test_setup_log("sim");
        SimCloud::new(&log, &[("eu-test-1", &["eu-test-1a", "eu-test-1b"])])
    }

    #[tokio::test]
    async fn test_ipv6_association_takes_polls() {
        let cloud = sim();
        let api = cloud.region("eu-test-1");
        let vpc = api
            .create_vpc(
                *sye_fabric_common::address::VPC_IPV4_BLOCK,
                &standard_tags("c1"),
            )
            .await
            .unwrap();
        assert_eq!(vpc.ipv6_state, Ipv6AssociationState::Associating);
        let first = api.describe_vpc(&vpc.id).await.unwrap().unwrap();
        assert_eq!(first.ipv6_state, Ipv6AssociationState::Associating);
        let second = api.describe_vpc(&vpc.id).await.unwrap().unwrap();
        assert_eq!(second.ipv6_state, Ipv6AssociationState::Associated);
        // The assigned block is a /56.
        assert_eq!(vpc.ipv6_block.unwrap().prefix(), 56);
    }

    #[tokio::test]
    async fn test_duplicate_rules_and_absent_deletes() {
        let cloud = sim();
        let api = cloud.region("eu-test-1");
        let vpc = api
            .create_vpc(
                *sye_fabric_common::address::VPC_IPV4_BLOCK,
                &standard_tags("c1"),
            )
            .await
            .unwrap();
        let group = api
            .create_security_group(&vpc.id, "default", &standard_tags("c1"))
            .await
            .unwrap();

        let rule = IngressRule::any_v4(Protocol::Tcp, 22);
        api.authorize_ingress(&group.id, &[rule]).await.unwrap();
        api.authorize_ingress(&group.id, &[rule]).await.unwrap();
        let groups = api.list_security_groups("c1").await.unwrap();
        assert_eq!(groups[0].ingress.len(), 1);

        // Revoking an absent rule is a no-op; deleting an absent group is
        // ObjectNotFound.
        api.revoke_ingress(&group.id, &[rule]).await.unwrap();
        api.revoke_ingress(&group.id, &[rule]).await.unwrap();
        api.delete_security_group(&group.id).await.unwrap();
        assert!(matches!(
            api.delete_security_group(&group.id).await,
            Err(Error::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_vpc_dependency_check() {
        let cloud = sim();
        let api = cloud.region("eu-test-1");
        let vpc = api
            .create_vpc(
                *sye_fabric_common::address::VPC_IPV4_BLOCK,
                &standard_tags("c1"),
            )
            .await
            .unwrap();
        let group = api
            .create_security_group(&vpc.id, "default", &standard_tags("c1"))
            .await
            .unwrap();
        assert!(matches!(
            api.delete_vpc(&vpc.id).await,
            Err(Error::InvalidRequest { .. })
        ));
        api.delete_security_group(&group.id).await.unwrap();
        api.delete_vpc(&vpc.id).await.unwrap();
    }
}
