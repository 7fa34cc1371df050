//! Validation rules: pure predicates over request, context and registry parameters.
//!
//! Every function returns `Ok(())` or the specific [`ServiceError`] kind for the
//! first rule that fails. Nothing here touches storage.

use std::collections::HashSet;

use crate::coins::{is_valid_denom, Coins};
use crate::error::ServiceError;
use crate::ids::{CONTEXT_ID_LEN, REQUEST_ID_LEN};
use crate::types::{Address, Pricing, RESULT_CODE_OK};

pub const MAX_NAME_LENGTH: usize = 70;
pub const MAX_DESCRIPTION_LENGTH: usize = 280;
pub const MAX_TAGS_NUM: usize = 10;
pub const MAX_TAG_LENGTH: usize = 70;
pub const MAX_PROVIDERS_NUM: usize = 10;

// ── Names, descriptions, tags ─────────────────────────────────────────────────

/// `^[A-Za-z][A-Za-z0-9_-]*$`, at most 70 bytes.
pub fn validate_service_name(name: &str) -> Result<(), ServiceError> {
    let mut chars = name.chars();
    let well_formed = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !well_formed || name.len() > MAX_NAME_LENGTH {
        return Err(ServiceError::InvalidServiceName(name.to_string()));
    }
    Ok(())
}

pub fn validate_description(field: &str, description: &str) -> Result<(), ServiceError> {
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(ServiceError::InvalidDescription(format!(
            "invalid {field} length; got: {}, max: {MAX_DESCRIPTION_LENGTH}",
            description.len()
        )));
    }
    Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<(), ServiceError> {
    if tags.len() > MAX_TAGS_NUM {
        return Err(ServiceError::InvalidTags(format!(
            "invalid tags size; got: {}, max: {MAX_TAGS_NUM}",
            tags.len()
        )));
    }
    if has_duplicate(tags.iter().map(String::as_str)) {
        return Err(ServiceError::InvalidTags("duplicate tag".into()));
    }
    for (i, tag) in tags.iter().enumerate() {
        if tag.is_empty() {
            return Err(ServiceError::InvalidTags(format!(
                "invalid tag[{i}] length: tag must not be empty"
            )));
        }
        if tag.len() > MAX_TAG_LENGTH {
            return Err(ServiceError::InvalidTags(format!(
                "invalid tag[{i}] length; got: {}, max: {MAX_TAG_LENGTH}",
                tag.len()
            )));
        }
    }
    Ok(())
}

/// A JSON object carrying both an `input` and an `output` schema.
pub fn validate_schemas(schemas: &str) -> Result<(), ServiceError> {
    let value: serde_json::Value = serde_json::from_str(schemas)
        .map_err(|e| ServiceError::InvalidSchemas(format!("schemas are not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ServiceError::InvalidSchemas("schemas must be a JSON object".into()))?;
    for key in ["input", "output"] {
        if !obj.contains_key(key) {
            return Err(ServiceError::InvalidSchemas(format!("{key} schema missing")));
        }
    }
    Ok(())
}

// ── Addresses ─────────────────────────────────────────────────────────────────

/// Non-empty address; `role` names it in the error ("provider", "consumer", ...).
pub fn validate_address(role: &str, address: &Address) -> Result<(), ServiceError> {
    if address.is_empty() {
        return Err(ServiceError::InvalidAddress(format!("{role} missing")));
    }
    Ok(())
}

fn check_duplicate_providers(providers: &[Address]) -> Result<(), ServiceError> {
    if has_duplicate(providers.iter().map(Address::as_str)) {
        return Err(ServiceError::InvalidProviders(
            "there exists duplicate providers".into(),
        ));
    }
    Ok(())
}

/// 1..=10 providers, no duplicates, none empty.
pub fn validate_providers(providers: &[Address]) -> Result<(), ServiceError> {
    if providers.is_empty() {
        return Err(ServiceError::InvalidProviders("providers missing".into()));
    }
    validate_providers_can_empty(providers)
}

/// As [`validate_providers`] but an empty list means "leave unchanged".
pub fn validate_providers_can_empty(providers: &[Address]) -> Result<(), ServiceError> {
    if providers.len() > MAX_PROVIDERS_NUM {
        return Err(ServiceError::InvalidProviders(format!(
            "total number of the providers must not be greater than {MAX_PROVIDERS_NUM}"
        )));
    }
    for p in providers {
        validate_address("provider", p)?;
    }
    check_duplicate_providers(providers)
}

// ── Coins ─────────────────────────────────────────────────────────────────────

/// Non-empty, every amount strictly positive.
pub fn validate_deposit(deposit: &Coins) -> Result<(), ServiceError> {
    if !deposit.is_all_positive() {
        return Err(ServiceError::InvalidDeposit(format!("invalid deposit: {deposit}")));
    }
    Ok(())
}

/// A well-formed, non-negative coin set. Parsing already enforces denomination
/// syntax; this catches sets assembled by hand from raw `Coin` values.
pub fn validate_service_fee_cap(cap: &Coins) -> Result<(), ServiceError> {
    if cap.iter().any(|c| !is_valid_denom(&c.denom)) {
        return Err(ServiceError::InvalidCoins(format!("invalid service fee cap: {cap}")));
    }
    Ok(())
}

pub fn validate_withdraw_amount(amount: &Coins) -> Result<(), ServiceError> {
    validate_service_fee_cap(amount)
}

pub fn validate_min_resp_time(min_resp_time: u64) -> Result<(), ServiceError> {
    if min_resp_time == 0 {
        return Err(ServiceError::InvalidMinRespTime(
            "minimum response time must be greater than 0".into(),
        ));
    }
    Ok(())
}

pub fn validate_pricing(raw: &str) -> Result<Pricing, ServiceError> {
    Pricing::parse(raw)
}

// ── Payloads ──────────────────────────────────────────────────────────────────

pub fn validate_input(input: &str) -> Result<(), ServiceError> {
    if input.is_empty() {
        return Err(ServiceError::InvalidRequestInput("input missing".into()));
    }
    if serde_json::from_str::<serde_json::Value>(input).is_err() {
        return Err(ServiceError::InvalidRequestInput("input is not valid JSON".into()));
    }
    Ok(())
}

/// Code 200 needs a non-empty JSON output; every other code needs no output.
pub fn validate_output(code: u16, output: &str) -> Result<(), ServiceError> {
    if code == RESULT_CODE_OK && output.is_empty() {
        return Err(ServiceError::InvalidResponse(
            "output must be specified when the result code is 200".into(),
        ));
    }
    if code != RESULT_CODE_OK && !output.is_empty() {
        return Err(ServiceError::InvalidResponse(
            "output should not be specified when the result code is not 200".into(),
        ));
    }
    if !output.is_empty() && serde_json::from_str::<serde_json::Value>(output).is_err() {
        return Err(ServiceError::InvalidResponse("output is not valid JSON".into()));
    }
    Ok(())
}

// ── Ids ───────────────────────────────────────────────────────────────────────

pub fn validate_request_id(bytes: &[u8]) -> Result<(), ServiceError> {
    if bytes.len() != REQUEST_ID_LEN {
        return Err(ServiceError::InvalidRequestId(format!(
            "length of the request ID must be {REQUEST_ID_LEN} in bytes"
        )));
    }
    Ok(())
}

pub fn validate_context_id(bytes: &[u8]) -> Result<(), ServiceError> {
    if bytes.len() != CONTEXT_ID_LEN {
        return Err(ServiceError::InvalidContextId(format!(
            "length of the request context ID must be {CONTEXT_ID_LEN} in bytes"
        )));
    }
    Ok(())
}

// ── Scheduling parameters ─────────────────────────────────────────────────────

/// Timing rules for a new call.
pub fn validate_schedule(
    timeout: i64,
    repeated: bool,
    repeated_frequency: u64,
    repeated_total: i64,
) -> Result<(), ServiceError> {
    if timeout <= 0 {
        return Err(ServiceError::InvalidTimeout(format!(
            "timeout [{timeout}] must be greater than 0"
        )));
    }
    if repeated {
        if repeated_frequency > 0 && repeated_frequency < timeout as u64 {
            return Err(ServiceError::InvalidRepeatedFrequency(format!(
                "repeated frequency [{repeated_frequency}] must not be less than timeout [{timeout}]"
            )));
        }
        if repeated_total < -1 || repeated_total == 0 {
            return Err(ServiceError::InvalidRepeatedTotal(format!(
                "repeated total number [{repeated_total}] must be greater than 0 or equal to -1"
            )));
        }
    }
    Ok(())
}

/// 1 ≤ threshold ≤ number of providers.
pub fn validate_response_threshold(threshold: u16, providers: usize) -> Result<(), ServiceError> {
    if threshold < 1 || threshold as usize > providers {
        return Err(ServiceError::InvalidThreshold(format!(
            "response threshold [{threshold}] must be between 1 and the number of providers [{providers}]"
        )));
    }
    Ok(())
}

/// Everything a new call must satisfy before any state is touched.
#[allow(clippy::too_many_arguments)]
pub fn validate_request(
    service_name: &str,
    service_fee_cap: &Coins,
    providers: &[Address],
    input: &str,
    timeout: i64,
    repeated: bool,
    repeated_frequency: u64,
    repeated_total: i64,
) -> Result<(), ServiceError> {
    validate_service_name(service_name)?;
    validate_service_fee_cap(service_fee_cap)?;
    validate_providers(providers)?;
    validate_input(input)?;
    validate_schedule(timeout, repeated, repeated_frequency, repeated_total)
}

/// Update rules: zero or empty fields mean "no change".
pub fn validate_request_context_updating(
    providers: &[Address],
    service_fee_cap: &Coins,
    timeout: i64,
    repeated_frequency: u64,
    repeated_total: i64,
) -> Result<(), ServiceError> {
    validate_providers_can_empty(providers)?;
    if !service_fee_cap.is_empty() {
        validate_service_fee_cap(service_fee_cap)?;
    }
    if timeout < 0 {
        return Err(ServiceError::InvalidTimeout(format!(
            "timeout must not be less than 0: {timeout}"
        )));
    }
    if timeout != 0 && repeated_frequency != 0 && repeated_frequency < timeout as u64 {
        return Err(ServiceError::InvalidRepeatedFrequency(format!(
            "frequency [{repeated_frequency}] must not be less than timeout [{timeout}]"
        )));
    }
    if repeated_total < -1 {
        return Err(ServiceError::InvalidRepeatedTotal(format!(
            "repeated total number must not be less than -1: {repeated_total}"
        )));
    }
    Ok(())
}

fn has_duplicate<'a>(items: impl IntoIterator<Item = &'a str>) -> bool {
    let mut seen = HashSet::new();
    items.into_iter().any(|s| !seen.insert(s))
}
