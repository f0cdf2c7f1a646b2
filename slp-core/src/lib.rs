//! # SLP Core
//!
//! Issues short-lived "proof of physical event" tokens bound to a durable
//! monotonic counter.
//!
//! ## Key Features
//! - **Durable counter**: atomic read/increment, fsync + atomic rename, 0600 record
//! - **Anti-rollback**: every token embeds a strictly increasing counter value
//! - **Pluggable integrity**: Ed25519, HMAC-SHA256, or a hardware-rooted primitive
//! - **Canonical CBOR tokens**: verifiers rebuild the committed bytes exactly
//!
//! ```no_run
//! use slp_core::{Context, HmacSha256, SlpConfig, Trigger, TriggerType};
//!
//! let ctx = Context::initialize(&SlpConfig::default(), HmacSha256::generate())?;
//! let token = ctx.generate_token(&Trigger::now(TriggerType::GpsGeofence))?;
//! println!("{} (counter now {})", token, ctx.get_counter()?);
//! # Ok::<(), slp_core::SlpError>(())
//! ```

pub mod config;
pub mod context;
pub mod counter;
pub mod crypto;
pub mod dormancy;
pub mod engine;
pub mod error;
pub mod serialization;
pub mod token;
pub mod types;

pub use config::{CorruptionPolicy, SlpConfig};
pub use context::{Context, ContextBuilder};
pub use counter::{CounterError, CounterStore, FileCounterStore, StoreOptions};
pub use crypto::{
    Ed25519Signer, HmacSha256, IntegrityPrimitive, KeyFingerprint, SigningError, TagVerifier,
};
pub use dormancy::{AssumeDormant, DormancyPolicy, IdleWindow};
pub use engine::AttestationEngine;
pub use error::{ErrorKind, InitError, SlpError};
pub use token::{Token, VerifyError, TOKEN_VERSION};
pub use types::*;

/// Re-export for convenience
pub use ed25519_dalek::{SigningKey, VerifyingKey};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(env!("CARGO_PKG_VERSION"), "0.1.0");
    }
}
