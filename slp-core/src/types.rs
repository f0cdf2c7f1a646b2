//! Core types used across the liveness-proof system.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 hash (32 bytes)
pub type Hash256 = [u8; 32];

/// Physical event that woke the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// User unlocked the screen
    ManualInteraction,
    /// Device entered a delivery zone
    GpsGeofence,
    /// Physical NFC tap
    NfcHandshake,
    /// Kinetic impact
    Vibration,
}

impl TriggerType {
    /// Wire tag used in the token commitment. Values are frozen.
    pub fn tag(self) -> u8 {
        match self {
            TriggerType::ManualInteraction => 0,
            TriggerType::GpsGeofence => 1,
            TriggerType::NfcHandshake => 2,
            TriggerType::Vibration => 3,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::ManualInteraction => write!(f, "MANUAL_INTERACTION"),
            TriggerType::GpsGeofence => write!(f, "GPS_GEOFENCE"),
            TriggerType::NfcHandshake => write!(f, "NFC_HANDSHAKE"),
            TriggerType::Vibration => write!(f, "VIBRATION"),
        }
    }
}

/// A wake-up event reported by the caller.
///
/// `timestamp` is caller-supplied (wall clock or monotonic, seconds) and is
/// committed as-is; the core never interprets it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub trigger_type: TriggerType,
    pub timestamp: f64,
    pub sensor_data: Vec<u8>,
}

impl Trigger {
    pub fn new(trigger_type: TriggerType, timestamp: f64) -> Self {
        Self {
            trigger_type,
            timestamp,
            sensor_data: Vec::new(),
        }
    }

    /// Trigger stamped with the current UTC time in fractional seconds.
    pub fn now(trigger_type: TriggerType) -> Self {
        let micros = Utc::now().timestamp_micros();
        Self::new(trigger_type, micros as f64 / 1_000_000.0)
    }

    pub fn with_sensor_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.sensor_data = data.into();
        self
    }
}

/// Integrity primitive that produced a token tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagAlgorithm {
    /// Ed25519 signature, verifiable with the public key alone
    Ed25519,
    /// HMAC-SHA256 keyed by a secret shared with the verifier
    HmacSha256,
}

impl fmt::Display for TagAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagAlgorithm::Ed25519 => write!(f, "Ed25519"),
            TagAlgorithm::HmacSha256 => write!(f, "HMAC-SHA256"),
        }
    }
}

/// Short fingerprint of the key behind a tag, so verifiers can pick a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(pub [u8; 8]);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
