//! conduit-core: identifiers, records, validation rules, and configuration.
//! All other Conduit crates depend on this one.

pub mod coins;
pub mod config;
pub mod error;
pub mod ids;
pub mod msgs;
pub mod types;
pub mod validation;

pub use coins::{Coin, Coins};
pub use error::{Result, ServiceError};
pub use ids::{ContextId, RequestId, RequestIdParts};
pub use types::{
    Address, BatchState, CompactRequest, Pricing, Request, RequestContext, RequestContextState,
    Response, ResponseResult, ServiceBinding, ServiceDefinition,
};
