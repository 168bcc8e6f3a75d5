//! gate::lease
//!
//! Scoped store access.
//!
//! A [`Lease`] wraps the [`Token`] from a successful acquire. Releasing it
//! explicitly reports the outcome; dropping it (early return, panic, or a
//! cancelled request future) still enqueues the release, so every
//! successful acquire is paired with exactly one release.
//!
//! # Example
//!
//! ```ignore
//! let lease = arbiter.lease().await?;
//! let outcome = handler().await;
//! lease.release().await?;
//! ```

use tracing::warn;

use super::arbiter::{ArbiterError, GateArbiter, Token};

/// Scoped store access.
#[derive(Debug)]
#[must_use = "dropping a lease releases it immediately"]
pub struct Lease {
    arbiter: GateArbiter,
    token: Option<Token>,
}

impl Lease {
    pub(crate) fn new(arbiter: GateArbiter, token: Token) -> Self {
        Self {
            arbiter,
            token: Some(token),
        }
    }

    /// Serial number of the underlying token.
    pub fn token_id(&self) -> Option<u64> {
        self.token.as_ref().map(Token::id)
    }

    /// Release and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::StoreCloseFailed`] if this was the last holder
    /// and closing the store failed.
    pub async fn release(mut self) -> Result<(), ArbiterError> {
        match self.token.take() {
            Some(token) => self.arbiter.release(token).await,
            None => Ok(()),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            warn!(
                token = token.id(),
                "lease dropped before release; releasing in background"
            );
            self.arbiter.release_detached(token);
        }
    }
}
