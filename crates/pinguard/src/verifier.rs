//! Credential predicate supplied by the host application

use async_trait::async_trait;

use crate::record::Identity;

/// Checks a candidate PIN for an identity
///
/// The comparison scheme belongs to the host (hashing, remote check, secure
/// element). Implementations should compare in constant time.
#[async_trait]
pub trait PinVerifier: Send + Sync {
    /// Whether `candidate` is the identity's PIN
    async fn verify_pin(&self, identity: &Identity, candidate: &str) -> bool;
}

#[async_trait]
impl<F> PinVerifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn verify_pin(&self, _identity: &Identity, candidate: &str) -> bool {
        self(candidate)
    }
}
