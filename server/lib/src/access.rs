//! Who is asking, and what they may do. The store itself holds no policy: the embedding
//! application supplies an [`AccessControls`] implementation and the store consults it at the
//! points where an operation acts on someone else's resource.

use std::fmt;

use crate::identity::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerType {
    /// The system itself. Bypasses every access check.
    Internal,
    /// An authenticated user, acting as the resource that represents them.
    User(ResourceId),
    Anonymous,
}

/// The calling context of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub origin: CallerType,
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.origin {
            CallerType::Internal => write!(f, "Internal"),
            CallerType::User(rsc_id) => write!(f, "User( {rsc_id} )"),
            CallerType::Anonymous => write!(f, "Anonymous"),
        }
    }
}

impl Caller {
    pub fn from_internal() -> Self {
        Caller {
            origin: CallerType::Internal,
        }
    }

    pub fn from_user(rsc_id: ResourceId) -> Self {
        Caller {
            origin: CallerType::User(rsc_id),
        }
    }

    pub fn anonymous() -> Self {
        Caller {
            origin: CallerType::Anonymous,
        }
    }

    /// Elevate to the internal context, for work done on behalf of the caller that they
    /// could not do themselves.
    pub fn sudo(&self) -> Self {
        Caller::from_internal()
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.origin, CallerType::Internal)
    }

    pub fn get_rsc_id(&self) -> Option<ResourceId> {
        match self.origin {
            CallerType::User(rsc_id) => Some(rsc_id),
            CallerType::Internal | CallerType::Anonymous => None,
        }
    }

    /// Is this the user the resource represents?
    pub fn is_rsc(&self, rsc_id: ResourceId) -> bool {
        self.get_rsc_id() == Some(rsc_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    Use,
    View,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclObject<'a> {
    Module(&'a str),
    Resource(ResourceId),
}

pub trait AccessControls: Send + Sync {
    fn is_allowed(&self, caller: &Caller, action: AclAction, object: AclObject<'_>) -> bool;

    fn can_edit(&self, caller: &Caller, rsc_id: ResourceId) -> bool {
        self.is_allowed(caller, AclAction::Update, AclObject::Resource(rsc_id))
    }
}
