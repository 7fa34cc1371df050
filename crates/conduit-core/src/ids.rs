//! Identifier codec: fixed-width binary ids for request contexts and requests.
//!
//! These layouts ARE the persisted format. Every byte is significant and the
//! same inputs must produce the same id on every replica:
//!
//!   ContextId = tx_hash[32] ‖ msg_index[8, BE]                                (40 bytes)
//!   RequestId = context_id[40] ‖ batch_counter[8, BE] ‖ request_height[8, BE]
//!               ‖ batch_index[2, BE]                                          (58 bytes)
//!
//! The layouts use zerocopy's byte-order wrappers, so every field has
//! alignment 1 and the structs carry no padding. There is no unsafe code here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, I16, I64, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::ServiceError;

pub const TX_HASH_LEN: usize = 32;
pub const CONTEXT_ID_LEN: usize = 40;
pub const REQUEST_ID_LEN: usize = 58;

// ── Layouts ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct ContextIdLayout {
    tx_hash: [u8; TX_HASH_LEN],
    msg_index: I64<BigEndian>,
}

assert_eq_size!(ContextIdLayout, [u8; CONTEXT_ID_LEN]);

#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct RequestIdLayout {
    context_id: [u8; CONTEXT_ID_LEN],
    batch_counter: U64<BigEndian>,
    request_height: I64<BigEndian>,
    batch_index: I16<BigEndian>,
}

assert_eq_size!(RequestIdLayout, [u8; REQUEST_ID_LEN]);

// ── ContextId ─────────────────────────────────────────────────────────────────

/// Identity of a request context. Generated once at creation, never changes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId([u8; CONTEXT_ID_LEN]);

impl ContextId {
    /// `tx_hash ‖ msg_index`. Unique as long as (tx_hash, msg_index) is.
    pub fn generate(tx_hash: [u8; TX_HASH_LEN], msg_index: i64) -> Self {
        let layout = ContextIdLayout {
            tx_hash,
            msg_index: I64::new(msg_index),
        };
        let mut out = [0u8; CONTEXT_ID_LEN];
        out.copy_from_slice(layout.as_bytes());
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ServiceError> {
        let arr: [u8; CONTEXT_ID_LEN] = bytes.try_into().map_err(|_| {
            ServiceError::InvalidContextId(format!(
                "length must be {CONTEXT_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Decode the hex text form. Either case is accepted.
    pub fn from_hex(s: &str) -> Result<Self, ServiceError> {
        let bytes = hex::decode(s)
            .map_err(|e| ServiceError::InvalidContextId(format!("malformed hex {s:?}: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Recover `(tx_hash, msg_index)`.
    pub fn split(&self) -> ([u8; TX_HASH_LEN], i64) {
        // Length is fixed by construction, so the read cannot fail.
        let layout = ContextIdLayout::read_from(&self.0[..]).unwrap_or_else(ContextIdLayout::new_zeroed);
        (layout.tx_hash, layout.msg_index.get())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// See [`ContextId::generate`].
pub fn generate_context_id(tx_hash: [u8; TX_HASH_LEN], msg_index: i64) -> ContextId {
    ContextId::generate(tx_hash, msg_index)
}

/// Split raw context id bytes; fails unless exactly 40 bytes long.
pub fn split_context_id(bytes: &[u8]) -> Result<([u8; TX_HASH_LEN], i64), ServiceError> {
    Ok(ContextId::from_slice(bytes)?.split())
}

// ── RequestId ─────────────────────────────────────────────────────────────────

/// Identity of one provider invocation within one batch of a context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId([u8; REQUEST_ID_LEN]);

/// The four fields packed into a [`RequestId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestIdParts {
    pub context_id: ContextId,
    pub batch_counter: u64,
    pub request_height: i64,
    pub batch_index: i16,
}

impl RequestId {
    pub fn generate(
        context_id: &ContextId,
        batch_counter: u64,
        request_height: i64,
        batch_index: i16,
    ) -> Self {
        let layout = RequestIdLayout {
            context_id: context_id.0,
            batch_counter: U64::new(batch_counter),
            request_height: I64::new(request_height),
            batch_index: I16::new(batch_index),
        };
        let mut out = [0u8; REQUEST_ID_LEN];
        out.copy_from_slice(layout.as_bytes());
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ServiceError> {
        let arr: [u8; REQUEST_ID_LEN] = bytes.try_into().map_err(|_| {
            ServiceError::InvalidRequestId(format!(
                "length must be {REQUEST_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, ServiceError> {
        let bytes = hex::decode(s)
            .map_err(|e| ServiceError::InvalidRequestId(format!("malformed hex {s:?}: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn parts(&self) -> RequestIdParts {
        let layout = RequestIdLayout::read_from(&self.0[..]).unwrap_or_else(RequestIdLayout::new_zeroed);
        RequestIdParts {
            context_id: ContextId(layout.context_id),
            batch_counter: layout.batch_counter.get(),
            request_height: layout.request_height.get(),
            batch_index: layout.batch_index.get(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        let mut ctx = [0u8; CONTEXT_ID_LEN];
        ctx.copy_from_slice(&self.0[..CONTEXT_ID_LEN]);
        ContextId(ctx)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// See [`RequestId::generate`].
pub fn generate_request_id(
    context_id: &ContextId,
    batch_counter: u64,
    request_height: i64,
    batch_index: i16,
) -> RequestId {
    RequestId::generate(context_id, batch_counter, request_height, batch_index)
}

/// Split raw request id bytes; fails unless exactly 58 bytes long.
pub fn split_request_id(bytes: &[u8]) -> Result<RequestIdParts, ServiceError> {
    Ok(RequestId::from_slice(bytes)?.parts())
}

/// Parse the external hex representation of a request id.
pub fn convert_request_id(s: &str) -> Result<RequestId, ServiceError> {
    RequestId::from_hex(s)
}

// ── Text forms ────────────────────────────────────────────────────────────────

macro_rules! hex_text_form {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.to_hex())
            }
        }

        impl FromStr for $ty {
            type Err = ServiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_text_form!(ContextId);
hex_text_form!(RequestId);
