//! conduit-services: the service engine: registry, request contexts,
//! batch dispatch, and the storage and ledger seams they run on.

pub mod batch;
pub mod callbacks;
pub mod context;
pub mod keeper;
pub mod keys;
pub mod ledger;
pub mod registry;
pub mod store;

pub use callbacks::{CallbackRegistry, ResponseSink, StateSink};
pub use keeper::{Keeper, TxContext};
pub use ledger::{Ledger, LedgerError, MemoryLedger};
pub use store::{CacheStore, KvStore, MemoryStore, StoreError};
