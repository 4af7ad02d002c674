// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the fabric provisioner.

use serde::Deserialize;
use serde::Serialize;

/// An error that can be generated while driving the cloud provider.
///
/// Existence probes never produce `ObjectNotFound`: describe-style calls
/// return an explicit empty result and the caller branches on it.  The
/// lookup variants here are reserved for operations that *require* the
/// object (deleting it, mutating it), where absence is meaningful to the
/// caller — teardown, for instance, treats `ObjectNotFound` from a delete
/// as success.
///
/// General best practices for error design apply here.  Where possible, we
/// want to reuse existing variants rather than inventing new ones to
/// distinguish cases that no programmatic consumer needs to distinguish.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object required by this operation was not found.
    #[error("Object (of type {type_name:?}) not found: {lookup_type:?}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// An object already exists with the specified name or identifier.
    #[error("Object (of type {type_name:?}) already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The specified input field is not valid.
    #[error("Invalid Value: {label}, {message}")]
    InvalidValue { label: String, message: String },
    /// The provider (or part of it) is unavailable; likely transient.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
    /// A bounded poll of an asynchronous provider operation exceeded its
    /// retry ceiling.
    #[error("Timed Out: {internal_message}")]
    TimedOut { internal_message: String },
    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
}

/// The kinds of cloud resources the fabric manages.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ResourceType {
    AvailabilityZone,
    Vpc,
    Subnet,
    InternetGateway,
    RouteTable,
    SecurityGroup,
    SecurityGroupRule,
    Tag,
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific name was requested
    ByName(String),
    /// a specific provider-assigned id was requested
    ById(String),
    /// a specific tag was requested
    ByTag(String),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably
    /// be retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidValue { .. }
            | Error::TimedOut { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object
    /// name.
    pub fn not_found_by_name(type_name: ResourceType, name: &str) -> Error {
        LookupType::ByName(name.to_owned()).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object
    /// id.
    pub fn not_found_by_id(type_name: ResourceType, id: &str) -> Error {
        LookupType::ById(id.to_owned()).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectAlreadyExists`] error for the given
    /// object.
    pub fn already_exists(type_name: ResourceType, object_name: &str) -> Error {
        Error::ObjectAlreadyExists {
            type_name,
            object_name: object_name.to_owned(),
        }
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should
    /// not happen but that we cannot reasonably handle at runtime (e.g.,
    /// finding the core-region marker on more than one region).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific
    /// message
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::InvalidValue`] error for the named input field.
    pub fn invalid_value(label: &str, message: &str) -> Error {
        Error::InvalidValue {
            label: label.to_owned(),
            message: message.to_owned(),
        }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry.  Logic errors or other problems indicating that a
    /// retry would not work should probably be an InternalError (if it's a
    /// provider problem) or InvalidRequest (if it's a caller problem)
    /// instead.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }

    /// Generates an [`Error::TimedOut`] error with the specific message
    pub fn timed_out(message: &str) -> Error {
        Error::TimedOut { internal_message: message.to_owned() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::unavail("throttled").retryable());
        assert!(!Error::timed_out("gave up").retryable());
        assert!(
            !Error::not_found_by_id(ResourceType::Vpc, "vpc-123").retryable()
        );
        assert!(!Error::invalid_value("zone_index", "out of range")
            .retryable());
    }

    #[test]
    fn test_serialization_round_trip() {
        let error = Error::already_exists(ResourceType::Subnet, "mycluster-a");
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(serde_json::from_str::<Error>(&json).unwrap(), error);
    }
}
