//! The rscidm server library. This implements the identity store of the CMS: credentials,
//! verifiable identities (emails, tokens, external ids) attached to resources, and the lookups
//! used by authentication and account management.

#![deny(warnings)]
#![recursion_limit = "512"]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate rusqlite;

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate lazy_static;

pub mod access;
pub mod be;
pub mod config;
pub mod constants;
pub mod identity;
pub mod idm;
pub mod notify;
pub mod plugins;
pub mod properties;
pub mod testkit;
pub(crate) mod utils;

/// A prelude of imports that should be imported by all other rscidm modules to
/// help make imports cleaner.
pub mod prelude {
    pub use rscidm_proto::internal::OperationError;
    pub use serde_json::Value as JsonValue;
    pub use sketching::{
        admin_debug, admin_error, admin_info, admin_warn, request_error, request_info,
        request_trace, request_warn, security_access, security_critical, security_error,
        security_info, tagged_event, EventTag,
    };
    pub use time::OffsetDateTime;

    pub use crate::access::{AccessControls, AclAction, AclObject, Caller, CallerType};
    pub use crate::constants::*;
    pub use crate::identity::{IdentityId, IdentityProps, IdentityRecord, ResourceId};
    pub use crate::idm::keyrules::{KeyRule, KeyRules};
    pub use crate::idm::server::IdentityStore;
    pub use crate::notify::{IdentityEvent, IdentityNotifier};
    pub use crate::plugins::{PasswordMatch, PasswordMatcher};
    pub use crate::properties::ResourceProperties;
}
