use serde::Deserialize;

use crate::error::TorError;
use crate::types::{PositionId, UserId};

/// Identity supplied by the session provider for one request.
///
/// Carries only what the token asserts. The service resolves the user and
/// position records into an [`crate::org::Actor`] before any decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub position_id: Option<PositionId>,
    pub is_override_authority: bool,
}

impl Session {
    /// Construct from validated JWT claims at the server boundary.
    /// Core logic never reads raw tokens.
    pub fn from_claims(claims: &SessionClaims) -> Result<Self, TorError> {
        let user_id = claims
            .sub
            .ok_or_else(|| TorError::Unauthenticated("missing sub claim".into()))?;
        Ok(Self {
            user_id: UserId(user_id),
            position_id: claims.position_id.map(PositionId),
            is_override_authority: claims.is_super_admin.unwrap_or(false),
        })
    }

    /// Construct explicitly for in-process callers and tests.
    pub fn in_process(user_id: UserId, position_id: Option<PositionId>) -> Self {
        Self {
            user_id,
            position_id,
            is_override_authority: false,
        }
    }

    pub fn with_override(mut self) -> Self {
        self.is_override_authority = true;
        self
    }
}

/// JWT claims shape issued by the login flow.
#[derive(Debug, Deserialize)]
pub struct SessionClaims {
    pub sub: Option<i64>,
    #[serde(default, alias = "positionId")]
    pub position_id: Option<i64>,
    #[serde(default, alias = "isSuperAdmin")]
    pub is_super_admin: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}
