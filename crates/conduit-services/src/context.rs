//! Request-context state machine.
//!
//! ```text
//!   RUNNING ──pause──▶ PAUSED ──start──▶ RUNNING
//!      │                  │
//!      └──kill / last batch done──▶ COMPLETED (terminal)
//! ```
//!
//! Batches run inside a context: `BatchState::Running` while requests are out,
//! `BatchState::Completed` once the threshold is met or the batch times out.
//! Pausing never interrupts a running batch; it only stops the next one.

use conduit_core::ids::ContextId;
use conduit_core::msgs::{CallService, RequestContextRef, UpdateRequestContext};
use conduit_core::types::{BatchState, RequestContext, RequestContextState};
use conduit_core::validation::validate_response_threshold;
use conduit_core::{Result, ServiceError};

use crate::batch::BatchOrigin;
use crate::callbacks::{CAUSE_COMPLETED, CAUSE_KILLED};
use crate::keeper::Txn;
use crate::keys;

impl Txn<'_> {
    /// Load a context the caller owns and may still change.
    fn owned_context(&self, msg: &RequestContextRef) -> Result<RequestContext> {
        msg.validate_basic()?;
        let ctx = self.context(&msg.request_context_id)?;
        if ctx.consumer != msg.consumer {
            return Err(ServiceError::Unauthorized(format!(
                "{} is not the consumer of {}",
                msg.consumer, ctx.id
            )));
        }
        if ctx.is_completed() {
            return Err(ServiceError::RequestContextCompleted(ctx.id.to_string()));
        }
        Ok(ctx)
    }

    fn check_timeout_bound(&self, timeout: i64) -> Result<()> {
        if timeout > self.config.max_request_timeout {
            return Err(ServiceError::InvalidTimeout(format!(
                "timeout [{timeout}] must not be greater than the max request timeout [{}]",
                self.config.max_request_timeout
            )));
        }
        Ok(())
    }

    pub(crate) fn create_request_context(&mut self, msg: &CallService) -> Result<ContextId> {
        msg.validate_basic()?;
        validate_response_threshold(msg.response_threshold, msg.providers.len())?;
        self.check_timeout_bound(msg.timeout)?;
        if self.definition(&msg.service_name)?.is_none() {
            return Err(ServiceError::UnknownServiceDefinition(msg.service_name.clone()));
        }

        let id = ContextId::generate(self.tx.tx_hash, self.tx.msg_index);
        if self.store.get(&keys::request_context(&id))?.is_some() {
            return Err(ServiceError::InvalidContextId(format!("{id} already exists")));
        }

        let mut ctx = RequestContext {
            id,
            service_name: msg.service_name.clone(),
            providers: msg.providers.clone(),
            consumer: msg.consumer.clone(),
            service_fee_cap: msg.service_fee_cap.clone(),
            input: msg.input.clone(),
            module_name: msg.module_name.clone(),
            timeout: msg.timeout,
            super_mode: msg.super_mode,
            repeated: msg.repeated,
            repeated_frequency: msg.repeated_frequency,
            repeated_total: msg.repeated_total,
            batch_counter: 0,
            batch_request_count: 0,
            batch_response_count: 0,
            batch_response_threshold: 0,
            response_threshold: msg.response_threshold,
            batch_state: BatchState::Completed,
            state: RequestContextState::Running,
            next_batch_height: 0,
        };
        tracing::info!(
            context_id = %id,
            service = %ctx.service_name,
            consumer = %ctx.consumer,
            repeated = ctx.repeated,
            "request context created"
        );

        self.start_batch(&mut ctx, BatchOrigin::Created)?;
        self.save_context(&ctx)?;
        Ok(id)
    }

    pub(crate) fn pause_request_context(&mut self, msg: &RequestContextRef) -> Result<()> {
        let mut ctx = self.owned_context(msg)?;
        if ctx.state != RequestContextState::Running {
            return Err(ServiceError::InvalidStateTransition(format!(
                "cannot pause a {} request context",
                ctx.state
            )));
        }
        ctx.state = RequestContextState::Paused;
        self.cancel_scheduled_batch(&mut ctx)?;
        self.save_context(&ctx)?;
        tracing::info!(context_id = %ctx.id, batch = ctx.batch_counter, "request context paused");
        Ok(())
    }

    pub(crate) fn start_request_context(&mut self, msg: &RequestContextRef) -> Result<()> {
        let mut ctx = self.owned_context(msg)?;
        if ctx.state != RequestContextState::Paused {
            return Err(ServiceError::InvalidStateTransition(format!(
                "cannot start a {} request context",
                ctx.state
            )));
        }
        ctx.state = RequestContextState::Running;
        tracing::info!(context_id = %ctx.id, batch = ctx.batch_counter, "request context resumed");
        if ctx.batch_state == BatchState::Completed {
            if ctx.batches_exhausted() {
                self.on_batch_completed(&mut ctx)?;
            } else {
                self.start_batch(&mut ctx, BatchOrigin::Resumed)?;
            }
        }
        self.save_context(&ctx)
    }

    pub(crate) fn kill_request_context(&mut self, msg: &RequestContextRef) -> Result<()> {
        let mut ctx = self.owned_context(msg)?;

        let active = self.active_entries(&keys::context_scope(keys::ACTIVE_REQUEST, &ctx.id))?;
        let refunded = active.len();
        for (request_id, compact) in &active {
            self.release_request(&ctx, request_id, compact)?;
        }

        self.cancel_scheduled_batch(&mut ctx)?;
        ctx.state = RequestContextState::Completed;
        ctx.batch_state = BatchState::Completed;
        self.save_context(&ctx)?;
        self.notify_state(&ctx, CAUSE_KILLED);
        tracing::info!(context_id = %ctx.id, batch = ctx.batch_counter, refunded, "request context killed");
        Ok(())
    }

    pub(crate) fn update_request_context(&mut self, msg: &UpdateRequestContext) -> Result<()> {
        msg.validate_basic()?;
        let mut ctx = self.owned_context(&RequestContextRef {
            request_context_id: msg.request_context_id,
            consumer: msg.consumer.clone(),
        })?;

        if !ctx.repeated && (msg.repeated_frequency != 0 || msg.repeated_total != 0) {
            return Err(ServiceError::InvalidStateTransition(format!(
                "{} is not repeated; frequency and total cannot change",
                ctx.id
            )));
        }
        if !msg.providers.is_empty() {
            if msg.providers.len() < ctx.response_threshold as usize {
                return Err(ServiceError::InvalidProviders(format!(
                    "{} providers cannot meet the response threshold [{}]",
                    msg.providers.len(),
                    ctx.response_threshold
                )));
            }
            ctx.providers = msg.providers.clone();
        }
        if !msg.service_fee_cap.is_empty() {
            ctx.service_fee_cap = msg.service_fee_cap.clone();
        }
        if msg.timeout > 0 {
            self.check_timeout_bound(msg.timeout)?;
            ctx.timeout = msg.timeout;
        }
        if msg.repeated_frequency > 0 {
            ctx.repeated_frequency = msg.repeated_frequency;
        }
        if msg.repeated_total != 0 {
            if msg.repeated_total > 0 && (msg.repeated_total as u64) < ctx.batch_counter {
                return Err(ServiceError::InvalidRepeatedTotal(format!(
                    "repeated total [{}] must not be less than the batches already run [{}]",
                    msg.repeated_total, ctx.batch_counter
                )));
            }
            ctx.repeated_total = msg.repeated_total;
        }
        if ctx.repeated && ctx.repeated_frequency > 0 && ctx.repeated_frequency < ctx.timeout as u64 {
            return Err(ServiceError::InvalidRepeatedFrequency(format!(
                "repeated frequency [{}] must not be less than timeout [{}]",
                ctx.repeated_frequency, ctx.timeout
            )));
        }

        tracing::info!(context_id = %ctx.id, "request context updated");
        // A total lowered to the batches already run ends the context now.
        if ctx.batch_state == BatchState::Completed && ctx.batches_exhausted() {
            self.on_batch_completed(&mut ctx)?;
        }
        self.save_context(&ctx)
    }

    /// Transition after the current batch reaches `BatchState::Completed`:
    /// finish the context, schedule the next batch, or wait for a resume.
    pub(crate) fn on_batch_completed(&mut self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.batches_exhausted() {
            ctx.state = RequestContextState::Completed;
            self.cancel_scheduled_batch(ctx)?;
            self.notify_state(ctx, CAUSE_COMPLETED);
            tracing::info!(context_id = %ctx.id, batches = ctx.batch_counter, "request context completed");
            return Ok(());
        }
        if ctx.state == RequestContextState::Running {
            let at = self.height() + ctx.effective_frequency();
            self.schedule_batch(ctx, at)?;
        }
        Ok(())
    }

    fn schedule_batch(&mut self, ctx: &mut RequestContext, height: i64) -> Result<()> {
        self.cancel_scheduled_batch(ctx)?;
        self.store.set(&keys::batch_queue(height, &ctx.id), Vec::new())?;
        ctx.next_batch_height = height;
        tracing::debug!(context_id = %ctx.id, at = height, "next batch scheduled");
        Ok(())
    }

    fn cancel_scheduled_batch(&mut self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.next_batch_height > 0 {
            self.store
                .delete(&keys::batch_queue(ctx.next_batch_height, &ctx.id))?;
            ctx.next_batch_height = 0;
        }
        Ok(())
    }

    /// Start every batch queued for the current height.
    pub(crate) fn start_scheduled_batches(&mut self) -> Result<()> {
        let height = self.height();
        let queued = self.store.prefix_scan(&keys::batches_at(height))?;
        for (key, _) in queued {
            self.store.delete(&key)?;
            let id = ContextId::from_slice(keys::queue_suffix(&key))
                .map_err(|e| ServiceError::Corrupted(format!("batch queue key: {e}")))?;
            let mut ctx = self.context(&id)?;
            if ctx.state != RequestContextState::Running || ctx.next_batch_height != height {
                continue;
            }
            ctx.next_batch_height = 0;
            if ctx.batches_exhausted() {
                self.on_batch_completed(&mut ctx)?;
            } else {
                self.start_batch(&mut ctx, BatchOrigin::Scheduled)?;
            }
            self.save_context(&ctx)?;
        }
        Ok(())
    }
}
