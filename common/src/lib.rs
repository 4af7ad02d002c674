// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities shared by the network fabric provisioner components.
//!
//! This crate carries the pieces every other crate in the workspace agrees
//! on: the IPv6 address-block arithmetic used to carve a cluster's /56 into
//! per-zone /64s, the error taxonomy used across provider calls, and the
//! retry policies used around genuinely asynchronous provider operations.
//! There is no I/O here.

pub mod address;
pub mod backoff;
pub mod dev;
pub mod error;

pub use error::Error;
