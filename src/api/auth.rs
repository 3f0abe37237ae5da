//! Authorization oracle.
//!
//! Authentication and the permission engine live outside this service; the
//! REST layer only consults an opaque oracle with a fixed action set before
//! every operation. The shipped oracle allows everything.

use crate::errors::{Error, Result};
use crate::models::{Bucket, MultipartObject, ObjectVersion};

/// The fixed set of authorizable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LocationUpdate,
    BucketRead,
    BucketReadVersions,
    BucketUpdate,
    BucketListMultiparts,
    ObjectRead,
    ObjectReadVersion,
    ObjectDelete,
    ObjectDeleteVersion,
    MultipartRead,
    MultipartDelete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::LocationUpdate => "location-update",
            Action::BucketRead => "bucket-read",
            Action::BucketReadVersions => "bucket-read-versions",
            Action::BucketUpdate => "bucket-update",
            Action::BucketListMultiparts => "bucket-listmultiparts",
            Action::ObjectRead => "object-read",
            Action::ObjectReadVersion => "object-read-version",
            Action::ObjectDelete => "object-delete",
            Action::ObjectDeleteVersion => "object-delete-version",
            Action::MultipartRead => "multipart-read",
            Action::MultipartDelete => "multipart-delete",
        }
    }
}

/// The entity an action applies to.
#[derive(Debug)]
pub enum AuthTarget<'a> {
    Bucket(&'a Bucket),
    Object(&'a ObjectVersion),
    Multipart(&'a MultipartObject),
}

/// The caller's identity as presented to the oracle. Extracted from the
/// `x-depot-principal` header; `None` means anonymous.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub id: Option<String>,
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Opaque authorization decision point.
pub trait AuthorizationOracle: Send + Sync {
    fn authorize(
        &self,
        principal: &Principal,
        action: Action,
        target: Option<&AuthTarget<'_>>,
    ) -> Decision;
}

/// Default oracle: every action is allowed.
pub struct AllowAll;

impl AuthorizationOracle for AllowAll {
    fn authorize(&self, _: &Principal, _: Action, _: Option<&AuthTarget<'_>>) -> Decision {
        Decision::Allow
    }
}

/// Consult the oracle, converting a denial into the appropriate error.
///
/// `hidden` denials report 404 to hide the target's existence; visible
/// denials report 401 for anonymous callers and 403 otherwise.
pub fn check_permission(
    oracle: &dyn AuthorizationOracle,
    principal: &Principal,
    action: Action,
    target: Option<&AuthTarget<'_>>,
    hidden: bool,
) -> Result<()> {
    match oracle.authorize(principal, action, target) {
        Decision::Allow => Ok(()),
        Decision::Deny => Err(Error::PermissionDenied {
            hidden,
            authenticated: principal.is_authenticated(),
        }),
    }
}
