//! Port Interfaces
//!
//! Interfaces toward the external collaborators the hub consumes but
//! does not own. Credential issuance and validation live outside the
//! hub; it only needs an opaque credential resolved to a stable user
//! identity before any ledger operation.
//!
//! The durable-store port lives with the ledger in the domain layer;
//! its adapters are under `infrastructure::persistence`.

use async_trait::async_trait;

use crate::domain::ledger::UserId;

// =============================================================================
// Identity
// =============================================================================

/// Identity resolution failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    /// The credential could not be resolved to a user.
    #[error("invalid credential")]
    InvalidCredential,
}

/// Port for the identity collaborator.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve an opaque caller credential to a stable user identity.
    async fn resolve(&self, credential: &str) -> Result<UserId, IdentityError>;
}

/// Pass-through resolver: the opaque token *is* the stable identity.
///
/// Stands in for the real authentication collaborator; anything
/// non-empty resolves.
#[derive(Debug, Default)]
pub struct OpaqueTokenIdentity;

impl OpaqueTokenIdentity {
    /// Create the resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityResolver for OpaqueTokenIdentity {
    async fn resolve(&self, credential: &str) -> Result<UserId, IdentityError> {
        let trimmed = credential.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::InvalidCredential);
        }
        Ok(trimmed.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
