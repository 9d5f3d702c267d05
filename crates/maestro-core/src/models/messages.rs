// Envelope carried on the per-workflow streaming topic.
//
// Two kinds travel over the bus: BLOCK messages holding Avro-encoded records
// with their inline schema, and SIGNAL messages carrying end-of-stream or
// interruption markers.

use crate::error::{MaestroError, Result};

pub const MESSAGE_TYPE_BLOCK: &str = "BLOCK";
pub const MESSAGE_TYPE_SIGNAL: &str = "SIGNAL";

/// Serializer tag for BLOCK payloads.
pub const SERVO_AVRO: &str = "AVRO";

/// Placeholder for unset envelope fields, fixed by the wire schema.
pub const UNDEFINED: &str = "undefined";

/// End-of-stream and interruption markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The producing task will emit no further records.
    PoissonPill,
    /// The workflow is being torn down; downstream tasks must fail.
    Interruption,
}

impl SignalKind {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            SignalKind::PoissonPill => b"POISSON_PILL",
            SignalKind::Interruption => b"INTERRUPTION",
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            b"POISSON_PILL" => Some(SignalKind::PoissonPill),
            b"INTERRUPTION" => Some(SignalKind::Interruption),
            _ => None,
        }
    }
}

/// The fixed-schema envelope wrapping everything on a workflow topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub message_type: String,
    pub key: String,
    pub data: Vec<u8>,
    pub servo: String,
    /// Inline JSON schema describing `data`, for BLOCK messages.
    pub schem: String,
}

impl BusMessage {
    /// A data block keyed `"<task>.<record>"` with its inline schema.
    pub fn block(key: impl Into<String>, data: Vec<u8>, schem: impl Into<String>) -> Self {
        Self {
            message_type: MESSAGE_TYPE_BLOCK.to_string(),
            key: key.into(),
            data,
            servo: SERVO_AVRO.to_string(),
            schem: schem.into(),
        }
    }

    /// An end-of-stream or interruption signal.
    pub fn signal(kind: SignalKind) -> Self {
        Self {
            message_type: MESSAGE_TYPE_SIGNAL.to_string(),
            key: UNDEFINED.to_string(),
            data: kind.as_bytes().to_vec(),
            servo: UNDEFINED.to_string(),
            schem: UNDEFINED.to_string(),
        }
    }

    pub fn is_signal(&self) -> bool {
        self.message_type == MESSAGE_TYPE_SIGNAL
    }

    pub fn is_block(&self) -> bool {
        self.message_type == MESSAGE_TYPE_BLOCK
    }

    /// Decode the signal carried by a SIGNAL message.
    pub fn signal_kind(&self) -> Result<SignalKind> {
        SignalKind::from_bytes(&self.data).ok_or_else(|| {
            MaestroError::bus(format!(
                "unrecognized signal {:?}",
                String::from_utf8_lossy(&self.data)
            ))
        })
    }
}
