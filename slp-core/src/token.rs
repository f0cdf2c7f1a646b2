//! Liveness-proof token and its commitment encoding.
//!
//! A token commits to the trigger and to the counter value reached by the
//! issuance that produced it. The integrity tag covers the commitment bytes
//! below, which a verifier rebuilds from the token fields alone:
//!
//! ```text
//! [10] domain separator "SLP-TOKEN\0"
//! [1]  token version
//! [1]  trigger type tag
//! [8]  timestamp, IEEE-754 bits, big-endian (NaN canonicalised)
//! [4]  sensor data length, big-endian u32
//! [n]  sensor data
//! [8]  counter, big-endian u64
//! ```
//!
//! Sensor data is capped at [`MAX_SENSOR_DATA_LEN`] and tags at
//! [`MAX_TAG_LEN`], so every token the engine seals fits the CBOR wire bound.

use crate::crypto::TagVerifier;
use crate::serialization::{from_canonical_cbor, to_canonical_cbor, SerializationError};
use crate::types::{KeyId, TagAlgorithm, Trigger, TriggerType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Token version (for schema evolution)
pub const TOKEN_VERSION: u8 = 1;

/// Largest sensor payload a token may carry.
pub const MAX_SENSOR_DATA_LEN: usize = 1 << 20;

/// Largest integrity tag a primitive may produce.
pub const MAX_TAG_LEN: usize = 512;

const COMMITMENT_DOMAIN: &[u8] = b"SLP-TOKEN\0";

/// Fixed-width encoding of a timestamp. Every NaN maps to one bit pattern.
pub fn canonical_timestamp_bits(timestamp: f64) -> u64 {
    if timestamp.is_nan() {
        f64::NAN.to_bits()
    } else {
        timestamp.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    #[error("Sensor data too large: {0} bytes")]
    SensorDataTooLarge(usize),
}

/// Build the exact byte sequence covered by a token's integrity tag.
pub fn encode_commitment(
    version: u8,
    trigger_type: TriggerType,
    timestamp: f64,
    sensor_data: &[u8],
    counter: u64,
) -> Result<Vec<u8>, CommitmentError> {
    if sensor_data.len() > MAX_SENSOR_DATA_LEN {
        return Err(CommitmentError::SensorDataTooLarge(sensor_data.len()));
    }
    let sensor_len = u32::try_from(sensor_data.len())
        .map_err(|_| CommitmentError::SensorDataTooLarge(sensor_data.len()))?;

    let mut buf = Vec::with_capacity(COMMITMENT_DOMAIN.len() + 1 + 1 + 8 + 4 + sensor_data.len() + 8);
    buf.extend_from_slice(COMMITMENT_DOMAIN);
    buf.push(version);
    buf.push(trigger_type.tag());
    buf.extend_from_slice(&canonical_timestamp_bits(timestamp).to_be_bytes());
    buf.extend_from_slice(&sensor_len.to_be_bytes());
    buf.extend_from_slice(sensor_data);
    buf.extend_from_slice(&counter.to_be_bytes());
    Ok(buf)
}

/// Commitment for `trigger` at counter value `counter` under the current version.
pub fn commitment_for(trigger: &Trigger, counter: u64) -> Result<Vec<u8>, CommitmentError> {
    encode_commitment(
        TOKEN_VERSION,
        trigger.trigger_type,
        trigger.timestamp,
        &trigger.sensor_data,
        counter,
    )
}

// Timestamps travel as their bit pattern: canonical CBOR carries no floats.
mod timestamp_bits {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(timestamp: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        super::canonical_timestamp_bits(*timestamp).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(f64::from_bits(bits))
    }
}

/// A signed proof that a physical trigger happened at a given counter state.
///
/// Created once per issuance and never retained by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Token {
    /// Schema version
    pub version: u8,

    /// Event that woke the device
    pub trigger_type: TriggerType,

    /// Caller-supplied event time
    #[serde(with = "timestamp_bits")]
    pub timestamp: f64,

    /// Opaque sensor evidence
    #[serde(with = "serde_bytes")]
    pub sensor_data: Vec<u8>,

    /// Counter value after this issuance's increment
    pub counter: u64,

    /// Primitive that produced `tag`
    pub algorithm: TagAlgorithm,

    /// Fingerprint of the tagging key
    pub key_id: KeyId,

    /// Integrity tag over the commitment bytes
    #[serde(with = "serde_bytes")]
    pub tag: Vec<u8>,
}

impl Token {
    /// Rebuild the committed bytes from this token's fields.
    pub fn commitment(&self) -> Result<Vec<u8>, CommitmentError> {
        encode_commitment(
            self.version,
            self.trigger_type,
            self.timestamp,
            &self.sensor_data,
            self.counter,
        )
    }

    /// Check version, algorithm and integrity tag.
    pub fn verify(&self, verifier: &dyn TagVerifier) -> Result<(), VerifyError> {
        if self.version != TOKEN_VERSION {
            return Err(VerifyError::UnsupportedVersion(self.version));
        }
        if self.algorithm != verifier.algorithm() {
            return Err(VerifyError::AlgorithmMismatch {
                token: self.algorithm,
                verifier: verifier.algorithm(),
            });
        }

        let message = self
            .commitment()
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if verifier.verify_tag(&message, &self.tag) {
            Ok(())
        } else {
            Err(VerifyError::InvalidTag)
        }
    }

    /// Reject a token whose counter does not move past `last_seen`.
    ///
    /// A verifier keeps the highest counter it accepted per device; anything
    /// at or below it is a replay or a rolled-back store.
    pub fn check_freshness(&self, last_seen: u64) -> Result<(), VerifyError> {
        if self.counter > last_seen {
            Ok(())
        } else {
            Err(VerifyError::Rollback {
                counter: self.counter,
                last_seen,
            })
        }
    }

    /// Serialize to canonical CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        to_canonical_cbor(self)
    }

    /// Deserialize from canonical CBOR bytes.
    ///
    /// Only the exact encoding [`Token::to_bytes`] produces is accepted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        from_canonical_cbor(bytes)
    }
}

/// Human-readable form, e.g. `SLP-TOKEN-GPS_GEOFENCE-42-1a2b3c4d`.
///
/// For logs and demos only; verifiers parse [`Token::to_bytes`].
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.tag[..self.tag.len().min(4)];
        write!(
            f,
            "SLP-TOKEN-{}-{}-{}",
            self.trigger_type,
            self.counter,
            hex::encode(prefix)
        )
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Unsupported token version: {0}")]
    UnsupportedVersion(u8),

    #[error("Token tagged with {token}, verifier expects {verifier}")]
    AlgorithmMismatch {
        token: TagAlgorithm,
        verifier: TagAlgorithm,
    },

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid integrity tag")]
    InvalidTag,

    #[error("Counter rollback: token counter {counter} is not above {last_seen}")]
    Rollback { counter: u64, last_seen: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Signer, HmacSha256, IntegrityPrimitive};
    use proptest::prelude::*;

    fn sealed(primitive: &dyn IntegrityPrimitive, trigger: &Trigger, counter: u64) -> Token {
        let tag = primitive.tag(&commitment_for(trigger, counter).unwrap()).unwrap();
        Token {
            version: TOKEN_VERSION,
            trigger_type: trigger.trigger_type,
            timestamp: trigger.timestamp,
            sensor_data: trigger.sensor_data.clone(),
            counter,
            algorithm: primitive.algorithm(),
            key_id: primitive.key_id(),
            tag,
        }
    }

    fn gps_trigger() -> Trigger {
        Trigger::new(TriggerType::GpsGeofence, 123456789.0).with_sensor_data(vec![1, 2, 3])
    }

    #[test]
    fn test_commitment_layout() {
        let bytes = commitment_for(&gps_trigger(), 7).unwrap();

        assert_eq!(&bytes[..10], b"SLP-TOKEN\0");
        assert_eq!(bytes[10], TOKEN_VERSION);
        assert_eq!(bytes[11], TriggerType::GpsGeofence.tag());
        assert_eq!(&bytes[12..20], &123456789.0f64.to_bits().to_be_bytes());
        assert_eq!(&bytes[20..24], &3u32.to_be_bytes());
        assert_eq!(&bytes[24..27], &[1, 2, 3]);
        assert_eq!(&bytes[27..], &7u64.to_be_bytes());
    }

    #[test]
    fn test_nan_timestamps_share_encoding() {
        let quiet = Trigger::new(TriggerType::Vibration, f64::NAN);
        let other = Trigger::new(TriggerType::Vibration, f64::from_bits(0x7ff8_0000_0000_0001));
        assert_eq!(commitment_for(&quiet, 1).unwrap(), commitment_for(&other, 1).unwrap());
    }

    #[test]
    fn test_ed25519_token_verifies() {
        let signer = Ed25519Signer::generate();
        let token = sealed(&signer, &gps_trigger(), 1);

        assert!(token.verify(&signer.verifying_key()).is_ok());
    }

    #[test]
    fn test_tampered_counter_fails() {
        let mac = HmacSha256::generate();
        let mut token = sealed(&mac, &gps_trigger(), 5);
        token.counter = 6;

        assert!(matches!(token.verify(&mac), Err(VerifyError::InvalidTag)));
    }

    #[test]
    fn test_tampered_sensor_data_fails() {
        let mac = HmacSha256::generate();
        let mut token = sealed(&mac, &gps_trigger(), 5);
        token.sensor_data.push(4);

        assert!(matches!(token.verify(&mac), Err(VerifyError::InvalidTag)));
    }

    #[test]
    fn test_algorithm_mismatch() {
        let signer = Ed25519Signer::generate();
        let token = sealed(&signer, &gps_trigger(), 1);

        let mac = HmacSha256::generate();
        assert!(matches!(
            token.verify(&mac),
            Err(VerifyError::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mac = HmacSha256::generate();
        let mut token = sealed(&mac, &gps_trigger(), 1);
        token.version = 2;

        assert!(matches!(token.verify(&mac), Err(VerifyError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_freshness() {
        let mac = HmacSha256::generate();
        let token = sealed(&mac, &gps_trigger(), 10);

        assert!(token.check_freshness(9).is_ok());
        assert!(matches!(
            token.check_freshness(10),
            Err(VerifyError::Rollback { counter: 10, last_seen: 10 })
        ));
        assert!(token.check_freshness(11).is_err());
    }

    #[test]
    fn test_wire_roundtrip_preserves_verification() {
        let signer = Ed25519Signer::generate();
        let token = sealed(&signer, &gps_trigger(), 42);

        let bytes = token.to_bytes().unwrap();
        let decoded = Token::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, token);
        assert!(decoded.verify(&signer.verifying_key()).is_ok());
    }

    #[test]
    fn test_large_sensor_payload_roundtrips() {
        let mac = HmacSha256::generate();
        let trigger = Trigger::new(TriggerType::Vibration, 1.5).with_sensor_data(vec![0xab; 600_000]);
        let token = sealed(&mac, &trigger, 3);

        let bytes = token.to_bytes().unwrap();
        // byte strings, not arrays of integers
        assert!(bytes.len() < 600_000 + 1024);

        let decoded = Token::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, token);
        assert!(decoded.verify(&mac).is_ok());
    }

    #[test]
    fn test_largest_sensor_payload_fits_wire_bound() {
        let mac = HmacSha256::generate();
        let trigger = Trigger::new(TriggerType::Vibration, 1.5)
            .with_sensor_data(vec![0xff; MAX_SENSOR_DATA_LEN]);
        let mut token = sealed(&mac, &trigger, u64::MAX);
        token.tag = vec![0xff; MAX_TAG_LEN];

        let bytes = token.to_bytes().unwrap();
        assert_eq!(Token::from_bytes(&bytes).unwrap(), token);
    }

    #[test]
    fn test_oversized_sensor_data_rejected() {
        let trigger = Trigger::new(TriggerType::Vibration, 1.5)
            .with_sensor_data(vec![0; MAX_SENSOR_DATA_LEN + 1]);
        assert_eq!(
            commitment_for(&trigger, 1),
            Err(CommitmentError::SensorDataTooLarge(MAX_SENSOR_DATA_LEN + 1))
        );
    }

    fn rewrite_map(bytes: &[u8], edit: impl FnOnce(&mut Vec<(ciborium::Value, ciborium::Value)>)) -> Vec<u8> {
        let value: ciborium::Value = ciborium::from_reader(bytes).unwrap();
        let ciborium::Value::Map(mut entries) = value else {
            panic!("token should encode as a map");
        };
        edit(&mut entries);
        let mut out = Vec::new();
        ciborium::into_writer(&ciborium::Value::Map(entries), &mut out).unwrap();
        out
    }

    #[test]
    fn test_reordered_fields_rejected() {
        let mac = HmacSha256::generate();
        let bytes = sealed(&mac, &gps_trigger(), 9).to_bytes().unwrap();

        let reordered = rewrite_map(&bytes, |entries| entries.reverse());
        assert!(Token::from_bytes(&reordered).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mac = HmacSha256::generate();
        let bytes = sealed(&mac, &gps_trigger(), 9).to_bytes().unwrap();

        let extended = rewrite_map(&bytes, |entries| {
            entries.push((ciborium::Value::Text("extra".into()), ciborium::Value::Integer(7u8.into())));
        });
        assert!(Token::from_bytes(&extended).is_err());
    }

    #[test]
    fn test_non_canonical_nan_timestamp_rejected() {
        let mac = HmacSha256::generate();
        let token = sealed(&mac, &Trigger::new(TriggerType::Vibration, f64::NAN), 9);
        let bytes = token.to_bytes().unwrap();

        let other_nan = 0x7ff8_0000_0000_0001u64;
        let rewritten = rewrite_map(&bytes, |entries| {
            for (key, value) in entries.iter_mut() {
                if key.as_text() == Some("timestamp") {
                    *value = ciborium::Value::Integer(other_nan.into());
                }
            }
        });
        assert_ne!(rewritten, bytes);
        assert!(Token::from_bytes(&rewritten).is_err());
    }

    #[test]
    fn test_display() {
        let mut token = sealed(&HmacSha256::generate(), &gps_trigger(), 42);
        token.tag = vec![0x1a, 0x2b, 0x3c, 0x4d, 0x5e];
        assert_eq!(token.to_string(), "SLP-TOKEN-GPS_GEOFENCE-42-1a2b3c4d");
    }

    proptest! {
        #[test]
        fn prop_sensor_data_is_unambiguous(
            a in proptest::collection::vec(any::<u8>(), 0..64),
            b in proptest::collection::vec(any::<u8>(), 0..64),
            counter: u64,
        ) {
            prop_assume!(a != b);
            let ta = Trigger::new(TriggerType::NfcHandshake, 1.0).with_sensor_data(a);
            let tb = Trigger::new(TriggerType::NfcHandshake, 1.0).with_sensor_data(b);
            prop_assert_ne!(commitment_for(&ta, counter).unwrap(), commitment_for(&tb, counter).unwrap());
        }

        #[test]
        fn prop_counter_is_bound(c1: u64, c2: u64) {
            prop_assume!(c1 != c2);
            let trigger = Trigger::new(TriggerType::ManualInteraction, 0.0);
            prop_assert_ne!(commitment_for(&trigger, c1).unwrap(), commitment_for(&trigger, c2).unwrap());
        }
    }
}
