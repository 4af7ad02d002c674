// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end lifecycle tests for the fabric provisioner, driven against
//! the simulated cloud provider.

use std::collections::BTreeMap;
use sye_fabric::cloud::{Cloud, SecurityGroup, SecurityGroupRole, Subnet};
use sye_fabric::sim::SimCloud;
use sye_fabric::tags::{core_marker_tag, standard_tags, NAME_TAG};
use sye_fabric::{
    add_region, delete_region, ensure_core_region, find_core_region,
};
use sye_fabric_common::dev::test_setup_log;
use sye_fabric_common::Error;

const CLUSTER: &str = "mycluster";
const R1: &str = "eu-central-1";
const R2: &str = "us-east-1";
const R3: &str = "ap-south-1";

fn three_region_cloud(test_name: &str) -> (slog::Logger, SimCloud) {
    let log = test_setup_log(test_name);
    let cloud = SimCloud::new(
        &log,
        &[
            (R1, &["eu-central-1a", "eu-central-1b"]),
            (R2, &["us-east-1a", "us-east-1b", "us-east-1c"]),
            (R3, &["ap-south-1a"]),
        ],
    );
    (log, cloud)
}

async fn default_group(cloud: &SimCloud, region: &str) -> SecurityGroup {
    cloud
        .region(region)
        .list_security_groups(CLUSTER)
        .await
        .unwrap()
        .into_iter()
        .find(|group| group.name == SecurityGroupRole::Default.name())
        .expect("region has a default security group")
}

async fn cluster_subnets(cloud: &SimCloud, region: &str) -> Vec<Subnet> {
    cloud.region(region).list_subnets(CLUSTER).await.unwrap()
}

#[tokio::test]
async fn test_first_region_becomes_core_and_stays_core() {
    let (log, cloud) = three_region_cloud("first_region_becomes_core");

    let r1 = add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    assert_eq!(r1.core_region_id, R1);
    assert_eq!(r1.subnets.len(), 2);
    assert_eq!(r1.vpc.ipv4_block.to_string(), "10.0.0.0/16");

    let r2 = add_region(&log, &cloud, CLUSTER, R2).await.unwrap();
    assert_eq!(r2.core_region_id, R1);
    let r3 = add_region(&log, &cloud, CLUSTER, R3).await.unwrap();
    assert_eq!(r3.core_region_id, R1);

    // The marker is on every R1 subnet and nowhere else.
    let marker = core_marker_tag(CLUSTER);
    for subnet in cluster_subnets(&cloud, R1).await {
        assert!(subnet.tags.contains_key(&marker));
    }
    for region in [R2, R3] {
        for subnet in cluster_subnets(&cloud, region).await {
            assert!(!subnet.tags.contains_key(&marker));
        }
    }

    let core = find_core_region(&log, &cloud, CLUSTER).await.unwrap().unwrap();
    assert_eq!(core.region_id, R1);
    assert_eq!(core.subnets.len(), 2);
}

#[tokio::test]
async fn test_zone_blocks_derive_from_region_block() {
    let (log, cloud) = three_region_cloud("zone_blocks");
    let r2 = add_region(&log, &cloud, CLUSTER, R2).await.unwrap();

    let region_block = r2.vpc.ipv6_block.unwrap();
    for (index, subnet) in r2.subnets.iter().enumerate() {
        let expected = sye_fabric_common::address::derive_zone_block(
            &region_block.to_string(),
            index as u8,
        )
        .unwrap();
        assert_eq!(subnet.ipv6_block, expected);
        assert_eq!(
            subnet.ipv4_block,
            sye_fabric_common::address::zone_ipv4_block(index as u8).unwrap(),
        );
    }
    // Names follow <clusterId>-<azLetter>.
    let names: Vec<&str> =
        r2.subnets.iter().map(|subnet| subnet.name.as_str()).collect();
    assert_eq!(
        names,
        ["mycluster-a", "mycluster-b", "mycluster-c"]
    );
}

#[tokio::test]
async fn test_trust_rules_are_per_subnet_and_bidirectional() {
    let (log, cloud) = three_region_cloud("trust_rules");
    add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    add_region(&log, &cloud, CLUSTER, R2).await.unwrap();
    add_region(&log, &cloud, CLUSTER, R3).await.unwrap();

    // Core (R1) default group: one trust rule per non-core subnet.
    let core_group = default_group(&cloud, R1).await;
    let trust_rules: Vec<_> = core_group
        .ingress
        .iter()
        .filter(|rule| rule.is_trust_rule())
        .collect();
    assert_eq!(trust_rules.len(), 3 + 1); // R2's three subnets, R3's one
    for subnet in cluster_subnets(&cloud, R2).await {
        assert!(trust_rules
            .iter()
            .any(|rule| rule.references_block(&subnet.ipv6_block)));
    }

    // Non-core regions admit the core's subnets, not each other's.
    let r2_group = default_group(&cloud, R2).await;
    let r2_trust: Vec<_> =
        r2_group.ingress.iter().filter(|rule| rule.is_trust_rule()).collect();
    assert_eq!(r2_trust.len(), 2); // R1's two subnets
    for subnet in cluster_subnets(&cloud, R1).await {
        assert!(r2_trust
            .iter()
            .any(|rule| rule.references_block(&subnet.ipv6_block)));
    }
    // The core region itself carries no trust rules for itself.
    let core_blocks: Vec<_> = cluster_subnets(&cloud, R1)
        .await
        .iter()
        .map(|subnet| subnet.ipv6_block)
        .collect();
    for rule in trust_rules {
        for block in &core_blocks {
            assert!(!rule.references_block(block));
        }
    }
}

#[tokio::test]
async fn test_deleting_non_core_region_revokes_only_its_rules() {
    let (log, cloud) = three_region_cloud("delete_non_core");
    add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    add_region(&log, &cloud, CLUSTER, R2).await.unwrap();
    add_region(&log, &cloud, CLUSTER, R3).await.unwrap();

    let r2_blocks: Vec<_> = cluster_subnets(&cloud, R2)
        .await
        .iter()
        .map(|subnet| subnet.ipv6_block)
        .collect();
    let r3_blocks: Vec<_> = cluster_subnets(&cloud, R3)
        .await
        .iter()
        .map(|subnet| subnet.ipv6_block)
        .collect();

    delete_region(&log, &cloud, CLUSTER, R2).await.unwrap();

    // R2's footprint is gone entirely.
    assert!(cloud.region(R2).find_vpc(CLUSTER).await.unwrap().is_none());
    assert!(cluster_subnets(&cloud, R2).await.is_empty());

    // The core kept R3's trust rules and lost exactly R2's.
    let core_group = default_group(&cloud, R1).await;
    for block in &r2_blocks {
        assert!(!core_group
            .ingress
            .iter()
            .any(|rule| rule.references_block(block)));
    }
    for block in &r3_blocks {
        assert!(core_group
            .ingress
            .iter()
            .any(|rule| rule.references_block(block)));
    }

    // The core marker did not move.
    let core = find_core_region(&log, &cloud, CLUSTER).await.unwrap().unwrap();
    assert_eq!(core.region_id, R1);
}

#[tokio::test]
async fn test_add_region_is_idempotent() {
    let (log, cloud) = three_region_cloud("idempotent_add");

    let first = add_region(&log, &cloud, CLUSTER, R2).await.unwrap();
    let second = add_region(&log, &cloud, CLUSTER, R2).await.unwrap();
    assert_eq!(first.vpc.id, second.vpc.id);
    assert_eq!(first.internet_gateway_id, second.internet_gateway_id);
    assert_eq!(first.route_table_id, second.route_table_id);

    let api = cloud.region(R2);
    assert_eq!(api.list_subnets(CLUSTER).await.unwrap().len(), 3);
    assert_eq!(api.list_route_tables(CLUSTER).await.unwrap().len(), 1);
    let groups = api.list_security_groups(CLUSTER).await.unwrap();
    assert_eq!(groups.len(), 4);
    for group in &groups {
        let role = SecurityGroupRole::ALL
            .iter()
            .find(|role| role.name() == group.name)
            .unwrap();
        // No duplicated static rules.
        assert_eq!(group.ingress, role.static_rules());
    }
}

#[tokio::test]
async fn test_add_region_absorbs_transient_throttling() {
    let (log, cloud) = three_region_cloud("absorbs_throttling");
    cloud.inject_route_table_failures(R2, 2);

    // The throttled creations are retried internally; the caller sees one
    // successful, fully-converged invocation with no duplicated objects.
    let network = add_region(&log, &cloud, CLUSTER, R2).await.unwrap();
    assert_eq!(network.subnets.len(), 3);
    let api = cloud.region(R2);
    assert_eq!(api.list_subnets(CLUSTER).await.unwrap().len(), 3);
    assert_eq!(api.list_route_tables(CLUSTER).await.unwrap().len(), 1);
    assert_eq!(api.list_security_groups(CLUSTER).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_same_named_subnet_in_another_network_is_not_adopted() {
    let (log, cloud) = three_region_cloud("foreign_subnet_name");
    let first = add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    let api = cloud.region(R1);

    // A leftover subnet from an older deployment: cluster tags and name
    // match, but it lives in a different virtual network.
    let decoy_vpc = api
        .create_vpc(
            *sye_fabric_common::address::VPC_IPV4_BLOCK,
            &standard_tags("othercluster"),
        )
        .await
        .unwrap();
    let mut decoy_tags = standard_tags(CLUSTER);
    decoy_tags
        .insert(NAME_TAG.to_string(), format!("{}-a", CLUSTER));
    api.create_subnet(
        &decoy_vpc.id,
        "eu-central-1a",
        "10.0.0.0/20".parse().unwrap(),
        "fdff:ffff:ffff:ff00::/64".parse().unwrap(),
        &decoy_tags,
    )
    .await
    .unwrap();

    // With the real zone-a subnet gone, provisioning must recreate it in
    // the cluster's own network rather than adopt the decoy.
    api.delete_subnet(&first.subnets[0].id).await.unwrap();
    let second = add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    assert_eq!(second.subnets.len(), 2);
    for subnet in &second.subnets {
        assert_eq!(subnet.vpc_id, first.vpc.id);
    }
    let region_block = first.vpc.ipv6_block.unwrap();
    assert_eq!(
        second.subnets[0].ipv6_block,
        sye_fabric_common::address::derive_zone_block(
            &region_block.to_string(),
            0,
        )
        .unwrap(),
    );
}

#[tokio::test]
async fn test_delete_of_absent_region_is_a_noop() {
    let (log, cloud) = three_region_cloud("delete_absent");
    delete_region(&log, &cloud, CLUSTER, R3).await.unwrap();

    // Also fine when the cluster exists elsewhere.
    add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    delete_region(&log, &cloud, CLUSTER, R3).await.unwrap();
    let core = find_core_region(&log, &cloud, CLUSTER).await.unwrap().unwrap();
    assert_eq!(core.region_id, R1);
}

#[tokio::test]
async fn test_contested_election_resolves_to_smallest_region() {
    let (log, cloud) = three_region_cloud("contested_election");
    add_region(&log, &cloud, CLUSTER, R1).await.unwrap();
    add_region(&log, &cloud, CLUSTER, R2).await.unwrap();

    // Simulate a racing elector that marked R2 before observing R1.
    let marker =
        BTreeMap::from([(core_marker_tag(CLUSTER), String::new())]);
    let r2_subnets = cluster_subnets(&cloud, R2).await;
    let api = cloud.region(R2);
    for subnet in &r2_subnets {
        api.create_tags(&subnet.id, &marker).await.unwrap();
    }

    // Discovery alone refuses to guess.
    assert!(matches!(
        find_core_region(&log, &cloud, CLUSTER).await,
        Err(Error::InternalError { .. })
    ));

    // The election path converges: smallest region id wins, the loser's
    // marker is rolled back.
    let core =
        ensure_core_region(&log, &cloud, CLUSTER, R2, &r2_subnets)
            .await
            .unwrap();
    assert_eq!(core.region_id, R1);
    let marker_key = core_marker_tag(CLUSTER);
    for subnet in cluster_subnets(&cloud, R2).await {
        assert!(!subnet.tags.contains_key(&marker_key));
    }
    let core = find_core_region(&log, &cloud, CLUSTER).await.unwrap().unwrap();
    assert_eq!(core.region_id, R1);
}
