//! Persisted records for request contexts, requests, responses and the registry.
//!
//! JSON field names are part of the persisted format. Do not rename them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::coins::{Coins, BPS_DENOMINATOR};
use crate::error::ServiceError;
use crate::ids::{ContextId, RequestId};

/// Result code of a successful response.
pub const RESULT_CODE_OK: u16 = 200;

// ── Address ───────────────────────────────────────────────────────────────────

/// Opaque account address. Equality is plain string equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ── States ────────────────────────────────────────────────────────────────────

/// Lifecycle of a request context. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestContextState {
    Running = 0x00,
    Paused = 0x01,
    Completed = 0x02,
}

/// Progress of the batch currently owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BatchState {
    Running = 0x00,
    Completed = 0x01,
}

/// Byte and string forms for a unit-only state enum. String spellings are
/// persisted; parsing is case-insensitive.
macro_rules! coded_state {
    ($ty:ident, $what:literal, { $($variant:ident = $byte:literal, $text:literal;)+ }) => {
        impl $ty {
            pub fn as_u8(self) -> u8 {
                self as u8
            }

            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($byte => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!("'{s}' is not a valid {}", $what)),
                }
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

coded_state!(RequestContextState, "request context state", {
    Running = 0x00, "running";
    Paused = 0x01, "paused";
    Completed = 0x02, "completed";
});

coded_state!(BatchState, "request context batch state", {
    Running = 0x00, "running";
    Completed = 0x01, "completed";
});

// ── RequestContext ────────────────────────────────────────────────────────────

/// One logical, possibly repeating, service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub id: ContextId,
    pub service_name: String,
    pub providers: Vec<Address>,
    pub consumer: Address,
    pub service_fee_cap: Coins,
    pub input: String,
    /// Owner of the callbacks. Empty for contexts created directly by a consumer.
    pub module_name: String,
    pub timeout: i64,
    pub super_mode: bool,
    pub repeated: bool,
    pub repeated_frequency: u64,
    pub repeated_total: i64,
    pub batch_counter: u64,
    /// Requests issued by the current batch, counted against the provider list
    /// it started with. An update to `providers` takes effect from the next
    /// batch and leaves these counters alone.
    pub batch_request_count: u16,
    pub batch_response_count: u16,
    pub batch_response_threshold: u16,
    pub response_threshold: u16,
    pub batch_state: BatchState,
    pub state: RequestContextState,
    /// Height at which the next batch is scheduled; 0 when none is pending.
    #[serde(default)]
    pub next_batch_height: i64,
}

impl RequestContext {
    pub fn is_completed(&self) -> bool {
        self.state == RequestContextState::Completed
    }

    /// Blocks between batch starts: the configured frequency, or the timeout when 0.
    pub fn effective_frequency(&self) -> i64 {
        if self.repeated_frequency == 0 {
            self.timeout
        } else {
            i64::try_from(self.repeated_frequency).unwrap_or(i64::MAX)
        }
    }

    /// Whether the batch just finished was the last one this context may issue.
    pub fn batches_exhausted(&self) -> bool {
        if !self.repeated {
            return true;
        }
        self.repeated_total >= 0 && self.batch_counter >= self.repeated_total as u64
    }

    pub fn threshold_reached(&self) -> bool {
        self.batch_response_count >= self.batch_response_threshold
    }
}

// ── Requests & responses ──────────────────────────────────────────────────────

/// Per (context, batch, provider) escrow record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactRequest {
    pub request_context_id: ContextId,
    pub request_context_batch_counter: u64,
    pub provider: Address,
    pub service_fee: Coins,
    pub request_height: i64,
    pub expiration_height: i64,
}

/// Full detail of one provider invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub service_name: String,
    pub provider: Address,
    pub consumer: Address,
    pub input: String,
    pub service_fee: Coins,
    pub super_mode: bool,
    pub request_height: i64,
    pub expiration_height: i64,
    pub request_context_id: ContextId,
    pub request_context_batch_counter: u64,
}

/// Result envelope a provider attaches to its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

impl ResponseResult {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(raw).map_err(|e| {
            ServiceError::InvalidResponseResult(format!("failed to unmarshal the result: {e}"))
        })
    }

    pub fn is_ok(&self) -> bool {
        self.code == RESULT_CODE_OK
    }
}

/// One provider's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub provider: Address,
    pub consumer: Address,
    pub result: ResponseResult,
    pub output: String,
    pub request_context_id: ContextId,
    pub request_context_batch_counter: u64,
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub author: Address,
    pub author_description: String,
    pub schemas: String,
}

/// Volume discount: once a consumer has sent `volume` requests to a provider,
/// later requests cost `discount_bps / 10_000` of the list price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionByVolume {
    pub volume: u64,
    pub discount_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub price: Coins,
    #[serde(default)]
    pub promotions_by_volume: Vec<PromotionByVolume>,
}

impl Pricing {
    /// Parse and check a pricing document.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let pricing: Pricing = serde_json::from_str(raw)
            .map_err(|e| ServiceError::InvalidPricing(format!("failed to unmarshal pricing: {e}")))?;
        for (i, promo) in pricing.promotions_by_volume.iter().enumerate() {
            if promo.volume == 0 {
                return Err(ServiceError::InvalidPricing(format!(
                    "promotion[{i}]: volume must be greater than 0"
                )));
            }
            if promo.discount_bps as u128 > BPS_DENOMINATOR {
                return Err(ServiceError::InvalidPricing(format!(
                    "promotion[{i}]: discount {} exceeds {BPS_DENOMINATOR} bps",
                    promo.discount_bps
                )));
            }
        }
        if pricing
            .promotions_by_volume
            .windows(2)
            .any(|w| w[0].volume >= w[1].volume)
        {
            return Err(ServiceError::InvalidPricing(
                "promotions must be in strictly increasing volume order".into(),
            ));
        }
        Ok(pricing)
    }

    /// Fee for a consumer that has already sent `volume` requests to this provider.
    pub fn fee_for_volume(&self, volume: u64) -> Coins {
        match self
            .promotions_by_volume
            .iter()
            .rev()
            .find(|p| volume >= p.volume)
        {
            Some(promo) => self.price.mul_bps(promo.discount_bps),
            None => self.price.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub service_name: String,
    pub provider: Address,
    pub deposit: Coins,
    pub pricing: Pricing,
    pub min_resp_time: u64,
    pub available: bool,
    /// Height at which the binding was last disabled; 0 while available.
    pub disabled_height: i64,
}
