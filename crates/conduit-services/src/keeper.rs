//! The keeper: the engine's public entry points.
//!
//! Every mutating operation takes the backing store, the ledger, and the
//! transaction context explicitly. Writes are staged in a [`CacheStore`] and
//! flushed only when the operation returns `Ok`; ledger moves made by a
//! failed operation are reversed. Module callbacks fire after the flush.

use conduit_core::coins::Coins;
use conduit_core::config::EngineConfig;
use conduit_core::ids::{ContextId, RequestId, TX_HASH_LEN};
use conduit_core::msgs::{
    BindService, CallService, DefineService, DisableServiceBinding, EnableServiceBinding,
    KillRequestContext, PauseRequestContext, RefundServiceDeposit, RespondService,
    SetWithdrawAddress, StartRequestContext, UpdateRequestContext, UpdateServiceBinding,
};
use conduit_core::types::{
    Address, Request, RequestContext, Response, ServiceBinding, ServiceDefinition,
};
use conduit_core::{Result, ServiceError};

use crate::callbacks::{CallbackRegistry, Notification};
use crate::keys;
use crate::ledger::{JournaledLedger, Ledger};
use crate::store::{flush, get_json, put_json, scan_json, CacheStore, KvStore};

/// Where an operation sits in the replicated log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxContext {
    pub height: i64,
    pub tx_hash: [u8; TX_HASH_LEN],
    pub msg_index: i64,
}

impl TxContext {
    pub fn new(height: i64, tx_hash: [u8; TX_HASH_LEN], msg_index: i64) -> Self {
        Self {
            height,
            tx_hash,
            msg_index,
        }
    }

    /// Block-level context with no originating transaction (end-of-block work).
    pub fn at(height: i64) -> Self {
        Self::new(height, [0u8; TX_HASH_LEN], 0)
    }
}

/// One operation in flight: staged store, ledger, and queued notifications.
pub(crate) struct Txn<'a> {
    pub(crate) store: &'a mut dyn KvStore,
    pub(crate) ledger: &'a mut dyn Ledger,
    pub(crate) config: &'a EngineConfig,
    pub(crate) tx: TxContext,
    notifications: Vec<Notification>,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(
        store: &'a mut dyn KvStore,
        ledger: &'a mut dyn Ledger,
        config: &'a EngineConfig,
        tx: TxContext,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            tx,
            notifications: Vec::new(),
        }
    }

    pub(crate) fn height(&self) -> i64 {
        self.tx.height
    }

    pub(crate) fn context(&self, id: &ContextId) -> Result<RequestContext> {
        get_json(&*self.store, &keys::request_context(id))?
            .ok_or_else(|| ServiceError::UnknownRequestContext(id.to_string()))
    }

    pub(crate) fn save_context(&mut self, ctx: &RequestContext) -> Result<()> {
        put_json(self.store, &keys::request_context(&ctx.id), ctx)?;
        Ok(())
    }

    pub(crate) fn notify_response(
        &mut self,
        ctx: &RequestContext,
        outputs: Vec<String>,
        error: Option<&str>,
    ) {
        if ctx.module_name.is_empty() {
            return;
        }
        self.notifications.push(Notification::Response {
            module: ctx.module_name.clone(),
            context_id: ctx.id,
            outputs,
            error: error.map(str::to_string),
        });
    }

    pub(crate) fn notify_state(&mut self, ctx: &RequestContext, cause: &str) {
        if ctx.module_name.is_empty() {
            return;
        }
        self.notifications.push(Notification::State {
            module: ctx.module_name.clone(),
            context_id: ctx.id,
            cause: cause.to_string(),
        });
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

/// The service engine. Holds configuration and module callbacks; all state
/// lives in the store handed to each call.
#[derive(Clone, Default)]
pub struct Keeper {
    config: EngineConfig,
    callbacks: CallbackRegistry,
}

impl Keeper {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    fn execute<T>(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        op: impl FnOnce(&mut Txn<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut journal = JournaledLedger::new(ledger);
        let staged = {
            let mut cache = CacheStore::new(&*store);
            let mut txn = Txn::new(&mut cache, &mut journal, &self.config, tx);
            match op(&mut txn) {
                Ok(out) => {
                    let notifications = txn.take_notifications();
                    drop(txn);
                    Ok((out, cache.into_writes(), notifications))
                }
                Err(e) => Err(e),
            }
        };
        let committed = staged.and_then(|(out, writes, notifications)| {
            flush(store, writes)?;
            Ok((out, notifications))
        });
        match committed {
            Ok((out, notifications)) => {
                self.callbacks.deliver(notifications);
                Ok(out)
            }
            Err(e) => {
                if let Err(undo) = journal.rollback() {
                    tracing::error!(error = %e, rollback = %undo, "ledger rollback failed");
                    return Err(ServiceError::Corrupted(format!(
                        "ledger rollback failed after `{e}`: {undo}"
                    )));
                }
                Err(e)
            }
        }
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    pub fn define_service(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &DefineService,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.define_service(msg))
    }

    pub fn bind_service(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &BindService,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.bind_service(msg))
    }

    pub fn update_service_binding(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &UpdateServiceBinding,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.update_service_binding(msg))
    }

    pub fn disable_service_binding(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &DisableServiceBinding,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.disable_service_binding(msg))
    }

    pub fn enable_service_binding(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &EnableServiceBinding,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.enable_service_binding(msg))
    }

    pub fn refund_service_deposit(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &RefundServiceDeposit,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.refund_service_deposit(msg))
    }

    pub fn set_withdraw_address(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &SetWithdrawAddress,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.set_withdraw_address(msg))
    }

    // ── Request contexts ─────────────────────────────────────────────────────

    /// Create a context and expand its first batch. Returns the new id.
    pub fn call_service(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &CallService,
    ) -> Result<ContextId> {
        self.execute(store, ledger, tx, |t| t.create_request_context(msg))
    }

    pub fn respond_service(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &RespondService,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.respond(msg))
    }

    pub fn pause_request_context(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &PauseRequestContext,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.pause_request_context(msg))
    }

    pub fn start_request_context(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &StartRequestContext,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.start_request_context(msg))
    }

    pub fn kill_request_context(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &KillRequestContext,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.kill_request_context(msg))
    }

    pub fn update_request_context(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        tx: TxContext,
        msg: &UpdateRequestContext,
    ) -> Result<()> {
        self.execute(store, ledger, tx, |t| t.update_request_context(msg))
    }

    // ── Block hooks ──────────────────────────────────────────────────────────

    /// Refund and drop every unanswered request expiring at `height`, timing
    /// out the batches they belonged to. Call once per height, in order.
    pub fn process_expired_requests(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        height: i64,
    ) -> Result<()> {
        self.execute(store, ledger, TxContext::at(height), |t| {
            t.process_expired_requests()
        })
    }

    /// End-of-block work: the expiry sweep, then batches scheduled for `height`.
    pub fn end_block(
        &self,
        store: &mut dyn KvStore,
        ledger: &mut dyn Ledger,
        height: i64,
    ) -> Result<()> {
        self.execute(store, ledger, TxContext::at(height), |t| {
            t.process_expired_requests()?;
            t.start_scheduled_batches()
        })
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn service_definition(
        &self,
        store: &dyn KvStore,
        name: &str,
    ) -> Result<Option<ServiceDefinition>> {
        Ok(get_json(store, &keys::service_definition(name))?)
    }

    pub fn service_binding(
        &self,
        store: &dyn KvStore,
        service_name: &str,
        provider: &Address,
    ) -> Result<Option<ServiceBinding>> {
        Ok(get_json(store, &keys::service_binding(service_name, provider))?)
    }

    /// Every binding of `service_name`, ordered by provider.
    pub fn service_bindings(
        &self,
        store: &dyn KvStore,
        service_name: &str,
    ) -> Result<Vec<ServiceBinding>> {
        Ok(scan_json(store, &keys::service_bindings(service_name))?)
    }

    /// Where `provider`'s earnings are paid; the provider itself when unset.
    pub fn withdraw_address(&self, store: &dyn KvStore, provider: &Address) -> Result<Address> {
        Ok(get_json(store, &keys::withdraw_address(provider))?.unwrap_or_else(|| provider.clone()))
    }

    /// Cumulative fees paid to `provider`, net of tax.
    pub fn earned_fees(&self, store: &dyn KvStore, provider: &Address) -> Result<Coins> {
        Ok(get_json(store, &keys::earned_fees(provider))?.unwrap_or_default())
    }

    pub fn request_context(
        &self,
        store: &dyn KvStore,
        id: &ContextId,
    ) -> Result<Option<RequestContext>> {
        Ok(get_json(store, &keys::request_context(id))?)
    }

    pub fn request(&self, store: &dyn KvStore, id: &RequestId) -> Result<Option<Request>> {
        Ok(get_json(store, &keys::request(id))?)
    }

    pub fn response(&self, store: &dyn KvStore, id: &RequestId) -> Result<Option<Response>> {
        Ok(get_json(store, &keys::response(id))?)
    }

    /// Requests of one batch, in batch-index order. Kept until the context's
    /// next batch starts.
    pub fn requests_of_batch(
        &self,
        store: &dyn KvStore,
        id: &ContextId,
        batch_counter: u64,
    ) -> Result<Vec<Request>> {
        Ok(scan_json(store, &keys::batch_scope(keys::REQUEST, id, batch_counter))?)
    }

    pub fn responses_of_batch(
        &self,
        store: &dyn KvStore,
        id: &ContextId,
        batch_counter: u64,
    ) -> Result<Vec<Response>> {
        Ok(scan_json(store, &keys::batch_scope(keys::RESPONSE, id, batch_counter))?)
    }

    /// Whether `id` is still waiting for its provider.
    pub fn is_request_active(&self, store: &dyn KvStore, id: &RequestId) -> Result<bool> {
        Ok(store.get(&keys::active_request(id))?.is_some())
    }
}
