// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cloud-provider seam consumed by the fabric provisioner.
//!
//! The provisioner never holds provider credentials or SDK clients
//! directly; it drives everything through [`Cloud`] and the per-region
//! [`RegionApi`] handles.  The trait contract encodes the provider
//! semantics the orchestration relies on:
//!
//! - Existence probes (`find_*`, `list_*`) return an explicit empty result,
//!   never an error.  Errors are reserved for genuine provider failures.
//! - Deletion of an absent object reports `ObjectNotFound`; orchestrators
//!   decide whether that is success (it is, during teardown).
//! - `authorize_ingress` is a no-op for rules already present and
//!   `revoke_ingress` for rules already absent.  This per-resource
//!   idempotence is the only concurrency safety net the fabric assumes.

use async_trait::async_trait;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use sye_fabric_common::Error;

/// State of a virtual network's provider-assigned IPv6 block association.
///
/// Association is an asynchronous provider-side operation; the provisioner
/// must not create subnets until it reports [`Associated`].
///
/// [`Associated`]: Ipv6AssociationState::Associated
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ipv6AssociationState {
    Associating,
    Associated,
}

/// A region's virtual network.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Vpc {
    pub id: String,
    pub ipv4_block: Ipv4Network,
    /// The /56 assigned by the provider at creation time; not chosen by the
    /// caller.  `None` until the provider reports it.
    pub ipv6_block: Option<Ipv6Network>,
    pub ipv6_state: Ipv6AssociationState,
}

/// One per-availability-zone subnet within a region's virtual network.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Subnet {
    pub id: String,
    /// The virtual network this subnet belongs to.
    pub vpc_id: String,
    /// Symbolic name, `<clusterId>-<azLetter>`, carried as the provider's
    /// `Name` tag.
    pub name: String,
    pub availability_zone: String,
    pub ipv4_block: Ipv4Network,
    /// A /64 derived from the region's /56.
    pub ipv6_block: Ipv6Network,
    pub tags: BTreeMap<String, String>,
}

/// A security group and its current ingress rules.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    pub ingress: Vec<IngressRule>,
}

/// An internet gateway, possibly attached to a virtual network.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InternetGateway {
    pub id: String,
    pub attached_vpc: Option<String>,
}

/// A route table owned by a region's virtual network.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RouteTable {
    pub id: String,
    pub vpc_id: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    /// All protocols, no port restriction.  Used only by trust rules.
    All,
}

/// The source an ingress rule admits traffic from.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
pub enum RuleSource {
    /// Any IPv4 source (`0.0.0.0/0`).
    AnyIpv4,
    /// A single remote subnet's IPv6 block.
    Ipv6Block(Ipv6Network),
}

/// A security-group ingress rule.
///
/// The four static rules each group carries are distinguished from trust
/// rules by their source: static rules admit any source, trust rules are
/// scoped to one specific remote subnet's IPv6 block.  Trust rules are kept
/// one-per-subnet (never aggregated) so teardown can revoke a single
/// region's rules without disturbing the others'.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    /// Inclusive port range; `None` means no port restriction.
    pub ports: Option<(u16, u16)>,
    pub source: RuleSource,
}

impl IngressRule {
    /// A static rule admitting `protocol` traffic to one port from any IPv4
    /// source.
    pub fn any_v4(protocol: Protocol, port: u16) -> IngressRule {
        IngressRule {
            protocol,
            ports: Some((port, port)),
            source: RuleSource::AnyIpv4,
        }
    }

    /// A cross-region trust rule: all protocols, no port restriction,
    /// scoped to a single remote subnet's IPv6 block.
    pub fn trust(block: Ipv6Network) -> IngressRule {
        IngressRule {
            protocol: Protocol::All,
            ports: None,
            source: RuleSource::Ipv6Block(block),
        }
    }

    /// Whether this is a cross-region trust rule rather than one of the
    /// static rules.
    pub fn is_trust_rule(&self) -> bool {
        matches!(self.source, RuleSource::Ipv6Block(_))
    }

    /// Whether this rule is scoped to the given IPv6 block.
    pub fn references_block(&self, block: &Ipv6Network) -> bool {
        self.source == RuleSource::Ipv6Block(*block)
    }
}

/// The four fixed-purpose security groups created in every region.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityGroupRole {
    /// SSH plus the cross-region trust rules.
    Default,
    /// UDP media-relay ingress.
    EgressPitcher,
    /// HTTP/HTTPS ingress.
    FrontendBalancer,
    /// Management-UI ingress.
    PlayoutManagement,
}

impl SecurityGroupRole {
    pub const ALL: [SecurityGroupRole; 4] = [
        SecurityGroupRole::Default,
        SecurityGroupRole::EgressPitcher,
        SecurityGroupRole::FrontendBalancer,
        SecurityGroupRole::PlayoutManagement,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SecurityGroupRole::Default => "default",
            SecurityGroupRole::EgressPitcher => "egress-pitcher",
            SecurityGroupRole::FrontendBalancer => "frontend-balancer",
            SecurityGroupRole::PlayoutManagement => "playout-management",
        }
    }

    /// The fixed ingress rules this group is created with.  These exact
    /// values are load-bearing for compatibility with deployed clusters.
    pub fn static_rules(&self) -> Vec<IngressRule> {
        match self {
            SecurityGroupRole::Default => {
                vec![IngressRule::any_v4(Protocol::Tcp, 22)]
            }
            SecurityGroupRole::EgressPitcher => {
                vec![IngressRule::any_v4(Protocol::Udp, 2123)]
            }
            SecurityGroupRole::FrontendBalancer => vec![
                IngressRule::any_v4(Protocol::Tcp, 80),
                IngressRule::any_v4(Protocol::Tcp, 443),
            ],
            SecurityGroupRole::PlayoutManagement => vec![
                IngressRule::any_v4(Protocol::Tcp, 81),
                IngressRule::any_v4(Protocol::Tcp, 4433),
            ],
        }
    }
}

/// A cloud provider: a set of regions, each reachable through a
/// [`RegionApi`] handle.
#[async_trait]
pub trait Cloud: Send + Sync {
    /// Every region the provider offers, whether or not the cluster has a
    /// footprint there.  Cross-region discovery scans all of them.
    async fn regions(&self) -> Result<Vec<String>, Error>;

    /// A handle scoped to one region.
    fn region(&self, region_id: &str) -> Arc<dyn RegionApi>;
}

/// Describe/create/delete operations within a single cloud region.
///
/// All `cluster_id`-taking listing methods filter server-side by the
/// cluster tag; the fabric never invents resource ids.
#[async_trait]
pub trait RegionApi: Send + Sync {
    fn region_id(&self) -> &str;

    async fn list_availability_zones(&self) -> Result<Vec<String>, Error>;

    async fn find_vpc(&self, cluster_id: &str) -> Result<Option<Vpc>, Error>;
    async fn describe_vpc(&self, vpc_id: &str) -> Result<Option<Vpc>, Error>;
    /// Creates a virtual network with the given IPv4 block and an
    /// automatically assigned IPv6 /56, tagged at creation.
    async fn create_vpc(
        &self,
        ipv4_block: Ipv4Network,
        tags: &BTreeMap<String, String>,
    ) -> Result<Vpc, Error>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), Error>;

    async fn list_subnets(&self, cluster_id: &str)
        -> Result<Vec<Subnet>, Error>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        ipv4_block: Ipv4Network,
        ipv6_block: Ipv6Network,
        tags: &BTreeMap<String, String>,
    ) -> Result<Subnet, Error>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), Error>;
    /// Enables (or disables) auto-assignment of public IPv4 addresses on
    /// the subnet.  Idempotent.
    async fn map_public_ip_on_launch(
        &self,
        subnet_id: &str,
        enable: bool,
    ) -> Result<(), Error>;

    /// Adds (or overwrites) tags on an existing resource.
    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
    /// Removes tags by key; keys already absent are not an error.
    async fn delete_tags(
        &self,
        resource_id: &str,
        keys: &[String],
    ) -> Result<(), Error>;

    async fn find_internet_gateway(
        &self,
        cluster_id: &str,
    ) -> Result<Option<InternetGateway>, Error>;
    async fn create_internet_gateway(
        &self,
        tags: &BTreeMap<String, String>,
    ) -> Result<InternetGateway, Error>;
    /// Attaching a gateway already attached to the same network is a no-op.
    async fn attach_internet_gateway(
        &self,
        gateway_id: &str,
        vpc_id: &str,
    ) -> Result<(), Error>;
    async fn detach_internet_gateway(
        &self,
        gateway_id: &str,
        vpc_id: &str,
    ) -> Result<(), Error>;
    async fn delete_internet_gateway(
        &self,
        gateway_id: &str,
    ) -> Result<(), Error>;

    async fn list_route_tables(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<RouteTable>, Error>;
    async fn create_route_table(
        &self,
        vpc_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<RouteTable, Error>;
    /// Creating a route that already exists with the same target is a
    /// no-op.
    async fn create_route(
        &self,
        route_table_id: &str,
        destination: IpNetwork,
        gateway_id: &str,
    ) -> Result<(), Error>;
    /// Associating a subnet already associated with this table is a no-op.
    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<(), Error>;
    async fn delete_route_table(
        &self,
        route_table_id: &str,
    ) -> Result<(), Error>;

    async fn list_security_groups(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<SecurityGroup>, Error>;
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<SecurityGroup, Error>;
    /// Grants ingress rules; rules already present are skipped.
    async fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), Error>;
    /// Revokes ingress rules; rules already absent are skipped.
    async fn revoke_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), Error>;
    async fn delete_security_group(&self, group_id: &str)
        -> Result<(), Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    // The port/protocol table is an external compatibility surface; pin it.
    #[test]
    fn test_static_security_group_rules() {
        use Protocol::*;
        let expect = [
            ("default", vec![(Tcp, 22)]),
            ("egress-pitcher", vec![(Udp, 2123)]),
            ("frontend-balancer", vec![(Tcp, 80), (Tcp, 443)]),
            ("playout-management", vec![(Tcp, 81), (Tcp, 4433)]),
        ];
        for (role, (name, rules)) in
            SecurityGroupRole::ALL.iter().zip(expect.iter())
        {
            assert_eq!(role.name(), *name);
            let want: Vec<IngressRule> = rules
                .iter()
                .map(|(proto, port)| IngressRule::any_v4(*proto, *port))
                .collect();
            assert_eq!(role.static_rules(), want);
            assert!(role.static_rules().iter().all(|r| !r.is_trust_rule()));
        }
    }

    #[test]
    fn test_trust_rule_shape() {
        let block: Ipv6Network = "fd00:1122:3344:5501::/64".parse().unwrap();
        let rule = IngressRule::trust(block);
        assert_eq!(rule.protocol, Protocol::All);
        assert_eq!(rule.ports, None);
        assert!(rule.is_trust_rule());
        assert!(rule.references_block(&block));
        assert!(!rule
            .references_block(&"fd00:1122:3344:5502::/64".parse().unwrap()));
    }
}
