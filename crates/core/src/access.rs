//! Role checks for the operations that are not plain learning.

use std::fmt;

use thiserror::Error;

use crate::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Learner,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Learner => "learner",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "learner" => Some(Self::Learner),
            _ => None,
        }
    }

    /// Admins can do everything; learners can only learn.
    #[must_use]
    pub fn grants(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Learner => matches!(capability, Capability::Learn),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Learn,
    ManageContent,
    GradeSubmissions,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Learn => "learn",
            Capability::ManageContent => "manage content",
            Capability::GradeSubmissions => "grade submissions",
        };
        f.write_str(name)
    }
}

/// The user on whose behalf a service call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    #[must_use]
    pub fn learner(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Learner,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("user {user} is not allowed to {capability}")]
    Forbidden { user: UserId, capability: Capability },
}

/// # Errors
///
/// Returns `AccessError::Forbidden` if the actor's role lacks `capability`.
pub fn authorize(actor: &Actor, capability: Capability) -> Result<(), AccessError> {
    if actor.role.grants(capability) {
        Ok(())
    } else {
        Err(AccessError::Forbidden {
            user: actor.user_id,
            capability,
        })
    }
}
