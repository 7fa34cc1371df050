//! Operation payloads accepted by the engine.
//!
//! Each message carries `validate_basic`, the stateless checks run before any
//! store access. Stateful checks (ownership, registry lookups) live in the keeper.

use serde::{Deserialize, Serialize};

use crate::coins::Coins;
use crate::error::ServiceError;
use crate::ids::{ContextId, RequestId};
use crate::types::{Address, ResponseResult};
use crate::validation::{
    validate_address, validate_deposit, validate_description, validate_min_resp_time,
    validate_output, validate_pricing, validate_request, validate_request_context_updating,
    validate_schemas, validate_service_name, validate_tags,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineService {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author: Address,
    #[serde(default)]
    pub author_description: String,
    pub schemas: String,
}

impl DefineService {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("author", &self.author)?;
        validate_service_name(&self.name)?;
        validate_description("description", &self.description)?;
        validate_description("author description", &self.author_description)?;
        validate_tags(&self.tags)?;
        validate_schemas(&self.schemas)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindService {
    pub service_name: String,
    pub provider: Address,
    pub deposit: Coins,
    /// Raw pricing document, see [`crate::types::Pricing`].
    pub pricing: String,
    pub min_resp_time: u64,
}

impl BindService {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("provider", &self.provider)?;
        validate_service_name(&self.service_name)?;
        validate_deposit(&self.deposit)?;
        validate_min_resp_time(self.min_resp_time)?;
        validate_pricing(&self.pricing).map(|_| ())
    }
}

/// Empty deposit, empty pricing, and zero response time each mean "unchanged".
/// A non-empty deposit is added to the existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServiceBinding {
    pub service_name: String,
    pub provider: Address,
    #[serde(default)]
    pub deposit: Coins,
    #[serde(default)]
    pub pricing: String,
    #[serde(default)]
    pub min_resp_time: u64,
}

impl UpdateServiceBinding {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("provider", &self.provider)?;
        validate_service_name(&self.service_name)?;
        if !self.deposit.is_empty() {
            validate_deposit(&self.deposit)?;
        }
        if !self.pricing.is_empty() {
            validate_pricing(&self.pricing)?;
        }
        Ok(())
    }
}

/// Names one binding. Used by disable and refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRef {
    pub service_name: String,
    pub provider: Address,
}

impl BindingRef {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("provider", &self.provider)?;
        validate_service_name(&self.service_name)
    }
}

pub type DisableServiceBinding = BindingRef;
pub type RefundServiceDeposit = BindingRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableServiceBinding {
    pub service_name: String,
    pub provider: Address,
    /// Optional top-up added before the minimum-deposit check.
    #[serde(default)]
    pub deposit: Coins,
}

impl EnableServiceBinding {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("provider", &self.provider)?;
        validate_service_name(&self.service_name)?;
        if !self.deposit.is_empty() {
            validate_deposit(&self.deposit)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetWithdrawAddress {
    pub provider: Address,
    pub withdraw_address: Address,
}

impl SetWithdrawAddress {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("provider", &self.provider)?;
        validate_address("withdrawal address", &self.withdraw_address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallService {
    pub service_name: String,
    pub providers: Vec<Address>,
    pub consumer: Address,
    pub input: String,
    pub service_fee_cap: Coins,
    pub timeout: i64,
    #[serde(default)]
    pub super_mode: bool,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub repeated_frequency: u64,
    #[serde(default)]
    pub repeated_total: i64,
    pub response_threshold: u16,
    /// Callback owner; empty for a plain consumer call.
    #[serde(default)]
    pub module_name: String,
}

impl CallService {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("consumer", &self.consumer)?;
        validate_request(
            &self.service_name,
            &self.service_fee_cap,
            &self.providers,
            &self.input,
            self.timeout,
            self.repeated,
            self.repeated_frequency,
            self.repeated_total,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondService {
    pub request_id: RequestId,
    pub provider: Address,
    /// Raw `{"code":…,"message":…}` document.
    pub result: String,
    #[serde(default)]
    pub output: String,
}

impl RespondService {
    /// Checks the envelope and returns the parsed result.
    pub fn validate_basic(&self) -> Result<ResponseResult, ServiceError> {
        validate_address("provider", &self.provider)?;
        let result = ResponseResult::parse(&self.result)?;
        validate_output(result.code, &self.output)?;
        Ok(result)
    }
}

/// Pause, start, and kill all carry the same payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContextRef {
    pub request_context_id: ContextId,
    pub consumer: Address,
}

impl RequestContextRef {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("consumer", &self.consumer)
    }
}

pub type PauseRequestContext = RequestContextRef;
pub type StartRequestContext = RequestContextRef;
pub type KillRequestContext = RequestContextRef;

/// Zero and empty fields mean "unchanged". Applies from the next batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequestContext {
    pub request_context_id: ContextId,
    #[serde(default)]
    pub providers: Vec<Address>,
    #[serde(default)]
    pub service_fee_cap: Coins,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub repeated_frequency: u64,
    #[serde(default)]
    pub repeated_total: i64,
    pub consumer: Address,
}

impl UpdateRequestContext {
    pub fn validate_basic(&self) -> Result<(), ServiceError> {
        validate_address("consumer", &self.consumer)?;
        validate_request_context_updating(
            &self.providers,
            &self.service_fee_cap,
            self.timeout,
            self.repeated_frequency,
            self.repeated_total,
        )
    }
}
