// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-region network fabric provisioner.
//!
//! This crate builds a cluster's private network across an arbitrary number
//! of cloud regions: per-region virtual networks with provider-assigned
//! IPv6 /56 blocks, one subnet per availability zone (with /64s derived
//! from the region block), an internet gateway and default routes, four
//! fixed-purpose security groups — and a cluster-wide core-region invariant
//! under which exactly one region acts as the IPv6 trust anchor for all
//! others.
//!
//! The cloud provider is reached exclusively through the traits in
//! [`cloud`]; all discovery is tag-driven (see [`tags`]) so that repeated
//! invocations are idempotent even across process restarts.  There is no
//! local registry that could drift from the provider's tag store.
//!
//! Adding a region runs [`provision::add_region`]: provision the region's
//! network, discover-or-elect the cluster's core region, then synchronize
//! cross-region trust rules.  Removing one runs
//! [`teardown::delete_region`], which reverses provisioning in dependency
//! order after revoking this region's footprint on the core region.

pub mod cloud;
pub mod core_region;
pub mod provision;
pub mod sim;
pub mod tags;
pub mod teardown;
pub mod trust;

pub use core_region::{ensure_core_region, find_core_region, CoreRegion};
pub use provision::{add_region, RegionNetwork};
pub use teardown::delete_region;
pub use trust::{sync_trust, TrustOp};
