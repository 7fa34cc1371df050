//! Error kinds shared by every Conduit crate.
//!
//! One variant per rejection category. The payload is a human-readable detail
//! that names the offending value; callers match on the variant, never the text.

/// Every way a service operation can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid service name: {0}")]
    InvalidServiceName(String),
    #[error("invalid description: {0}")]
    InvalidDescription(String),
    #[error("invalid tags: {0}")]
    InvalidTags(String),
    #[error("invalid schemas: {0}")]
    InvalidSchemas(String),
    #[error("invalid coins: {0}")]
    InvalidCoins(String),
    #[error("invalid deposit: {0}")]
    InvalidDeposit(String),
    #[error("invalid minimum response time: {0}")]
    InvalidMinRespTime(String),
    #[error("invalid pricing: {0}")]
    InvalidPricing(String),
    #[error("invalid providers: {0}")]
    InvalidProviders(String),
    #[error("invalid request input: {0}")]
    InvalidRequestInput(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid response result: {0}")]
    InvalidResponseResult(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid repeated frequency: {0}")]
    InvalidRepeatedFrequency(String),
    #[error("invalid repeated total: {0}")]
    InvalidRepeatedTotal(String),
    #[error("invalid response threshold: {0}")]
    InvalidThreshold(String),
    #[error("invalid request id: {0}")]
    InvalidRequestId(String),
    #[error("invalid request context id: {0}")]
    InvalidContextId(String),

    // ── Registry ─────────────────────────────────────────────────────────────
    #[error("unknown service definition: {0}")]
    UnknownServiceDefinition(String),
    #[error("service definition already exists: {0}")]
    ServiceDefinitionExists(String),
    #[error("unknown service binding: {0}")]
    UnknownServiceBinding(String),
    #[error("service binding already exists: {0}")]
    ServiceBindingExists(String),
    #[error("insufficient deposit: {0}")]
    InsufficientDeposit(String),
    #[error("service binding is available: {0}")]
    BindingAvailable(String),
    #[error("service binding is unavailable: {0}")]
    BindingUnavailable(String),
    #[error("deposit still locked: {0}")]
    DepositLocked(String),

    // ── Request contexts ─────────────────────────────────────────────────────
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unknown request context: {0}")]
    UnknownRequestContext(String),
    #[error("unknown request: {0}")]
    UnknownRequest(String),
    #[error("duplicate response: {0}")]
    DuplicateResponse(String),
    #[error("request context completed: {0}")]
    RequestContextCompleted(String),
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    // ── Collaborators ────────────────────────────────────────────────────────
    #[error("ledger: {0}")]
    Ledger(String),
    #[error("store: {0}")]
    Store(String),
    /// Persisted state that cannot be decoded or violates an invariant.
    /// The current event must be abandoned.
    #[error("corrupted state: {0}")]
    Corrupted(String),
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
