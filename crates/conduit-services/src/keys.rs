//! Store key layout.
//!
//! One prefix byte per record kind. Request-scoped keys embed the request id,
//! whose first 48 bytes are `context_id ‖ batch_counter`, so a prefix scan on
//! that pair returns one batch in index order. Heights are big-endian so index
//! scans run in height order.

use conduit_core::ids::{ContextId, RequestId};
use conduit_core::types::Address;

pub const SERVICE_DEFINITION: u8 = 0x01;
pub const SERVICE_BINDING: u8 = 0x02;
pub const WITHDRAW_ADDRESS: u8 = 0x03;
pub const REQUEST_CONTEXT: u8 = 0x04;
pub const REQUEST: u8 = 0x05;
pub const ACTIVE_REQUEST: u8 = 0x06;
pub const RESPONSE: u8 = 0x07;
pub const EXPIRATION_QUEUE: u8 = 0x08;
pub const EARNED_FEES: u8 = 0x09;
pub const BATCH_QUEUE: u8 = 0x0a;
pub const REQUEST_VOLUME: u8 = 0x0b;

const SEP: u8 = 0x00;

fn key(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let len = 1 + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    out.push(prefix);
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

pub fn service_definition(name: &str) -> Vec<u8> {
    key(SERVICE_DEFINITION, &[name.as_bytes()])
}

pub fn service_binding(service_name: &str, provider: &Address) -> Vec<u8> {
    key(
        SERVICE_BINDING,
        &[service_name.as_bytes(), &[SEP], provider.as_str().as_bytes()],
    )
}

/// Every binding of one service.
pub fn service_bindings(service_name: &str) -> Vec<u8> {
    key(SERVICE_BINDING, &[service_name.as_bytes(), &[SEP]])
}

pub fn withdraw_address(provider: &Address) -> Vec<u8> {
    key(WITHDRAW_ADDRESS, &[provider.as_str().as_bytes()])
}

pub fn request_context(id: &ContextId) -> Vec<u8> {
    key(REQUEST_CONTEXT, &[id.as_bytes()])
}

pub fn request(id: &RequestId) -> Vec<u8> {
    key(REQUEST, &[id.as_bytes()])
}

pub fn active_request(id: &RequestId) -> Vec<u8> {
    key(ACTIVE_REQUEST, &[id.as_bytes()])
}

pub fn response(id: &RequestId) -> Vec<u8> {
    key(RESPONSE, &[id.as_bytes()])
}

/// `prefix ‖ context_id ‖ batch_counter`: scans one batch of a request-scoped kind.
pub fn batch_scope(prefix: u8, context_id: &ContextId, batch_counter: u64) -> Vec<u8> {
    key(prefix, &[context_id.as_bytes(), &batch_counter.to_be_bytes()])
}

/// `prefix ‖ context_id`: every batch of a request-scoped kind.
pub fn context_scope(prefix: u8, context_id: &ContextId) -> Vec<u8> {
    key(prefix, &[context_id.as_bytes()])
}

pub fn expiration(height: i64, id: &RequestId) -> Vec<u8> {
    key(EXPIRATION_QUEUE, &[&height.to_be_bytes(), id.as_bytes()])
}

pub fn expirations_at(height: i64) -> Vec<u8> {
    key(EXPIRATION_QUEUE, &[&height.to_be_bytes()])
}

pub fn earned_fees(provider: &Address) -> Vec<u8> {
    key(EARNED_FEES, &[provider.as_str().as_bytes()])
}

pub fn batch_queue(height: i64, id: &ContextId) -> Vec<u8> {
    key(BATCH_QUEUE, &[&height.to_be_bytes(), id.as_bytes()])
}

pub fn batches_at(height: i64) -> Vec<u8> {
    key(BATCH_QUEUE, &[&height.to_be_bytes()])
}

pub fn request_volume(consumer: &Address, provider: &Address) -> Vec<u8> {
    key(
        REQUEST_VOLUME,
        &[consumer.as_str().as_bytes(), &[SEP], provider.as_str().as_bytes()],
    )
}

/// Strip the one-byte prefix and the fixed-width height from a queue key.
pub fn queue_suffix(key: &[u8]) -> &[u8] {
    key.get(9..).unwrap_or_default()
}
