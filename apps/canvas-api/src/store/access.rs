use async_trait::async_trait;

use crate::error::ApiError;

/// What a user may do with a canvas. Ordered: `Edit` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    Read,
    Edit,
}

/// Abstraction over the platform's canvas permission rules.
///
/// The canvas core only asks what a user may do with a canvas; it never
/// edits permissions itself.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn access_level(&self, user_id: &str, canvas_id: &str) -> Result<AccessLevel, ApiError>;
}

/// Grants every authenticated user edit access. Used in single-tenant
/// deployments where canvas sharing is unrestricted.
pub struct AllowAllAccess;

#[async_trait]
impl AccessPolicy for AllowAllAccess {
    async fn access_level(
        &self,
        _user_id: &str,
        _canvas_id: &str,
    ) -> Result<AccessLevel, ApiError> {
        Ok(AccessLevel::Edit)
    }
}
