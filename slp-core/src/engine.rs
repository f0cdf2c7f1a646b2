//! Token issuance protocol.
//!
//! ## Issuance
//! 1. Advance the counter store exactly once (unconditional, never retried)
//! 2. Encode the commitment over trigger and new counter value
//! 3. Tag the commitment with the integrity primitive
//! 4. Hand the token to the caller
//!
//! Step 1 consumes a counter value even when steps 2–3 fail: the counter
//! records issuance *attempts*, so a failed seal leaves an auditable gap
//! rather than a reusable value.

use crate::counter::CounterStore;
use crate::crypto::{IntegrityPrimitive, SigningError};
use crate::dormancy::DormancyPolicy;
use crate::error::SlpError;
use crate::token::{commitment_for, Token, MAX_TAG_LEN, TOKEN_VERSION};
use crate::types::Trigger;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct AttestationEngine {
    store: Arc<dyn CounterStore>,
    primitive: Arc<dyn IntegrityPrimitive>,
    dormancy: Arc<dyn DormancyPolicy>,
}

impl AttestationEngine {
    pub fn new(
        store: Arc<dyn CounterStore>,
        primitive: Arc<dyn IntegrityPrimitive>,
        dormancy: Arc<dyn DormancyPolicy>,
    ) -> Self {
        Self {
            store,
            primitive,
            dormancy,
        }
    }

    /// Issue a token for `trigger`.
    pub fn generate_token(&self, trigger: &Trigger) -> Result<Token, SlpError> {
        let counter = self.store.increment()?;
        self.dormancy.record_issuance();

        match self.seal(trigger, counter) {
            Ok(token) => {
                tracing::info!(
                    trigger = %trigger.trigger_type,
                    counter,
                    "Issued liveness token"
                );
                Ok(token)
            }
            Err(e) => {
                tracing::error!(
                    trigger = %trigger.trigger_type,
                    counter,
                    "Counter advanced but token could not be sealed: {}",
                    e
                );
                Err(e.into())
            }
        }
    }

    fn seal(&self, trigger: &Trigger, counter: u64) -> Result<Token, SigningError> {
        let message = commitment_for(trigger, counter)
            .map_err(|e| SigningError::MessageEncoding(e.to_string()))?;
        let tag = self.primitive.tag(&message)?;
        if tag.len() > MAX_TAG_LEN {
            return Err(SigningError::TagTooLarge(tag.len()));
        }

        Ok(Token {
            version: TOKEN_VERSION,
            trigger_type: trigger.trigger_type,
            timestamp: trigger.timestamp,
            sensor_data: trigger.sensor_data.clone(),
            counter,
            algorithm: self.primitive.algorithm(),
            key_id: self.primitive.key_id(),
            tag,
        })
    }

    /// Current counter value.
    pub fn counter(&self) -> Result<u64, SlpError> {
        Ok(self.store.read()?)
    }

    /// Whether the counter store is usable. Never errors.
    pub fn check_integrity(&self) -> bool {
        self.store.check_integrity()
    }

    /// Advisory idle check; not part of any token commitment.
    pub fn verify_dormancy(&self) -> bool {
        let dormant = self.dormancy.is_dormant();
        tracing::debug!(dormant, "Verified dormancy status");
        dormant
    }
}

impl fmt::Debug for AttestationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationEngine")
            .field("algorithm", &self.primitive.algorithm())
            .field("key_id", &self.primitive.key_id().to_string())
            .finish_non_exhaustive()
    }
}
