//! Batch dispatch and response aggregation.
//!
//! A batch turns a context into one request per eligible provider, escrows
//! the fees in a single ledger call, then counts responses until the batch
//! threshold is reached or the requests expire.

use std::collections::BTreeMap;

use conduit_core::coins::Coins;
use conduit_core::ids::RequestId;
use conduit_core::msgs::RespondService;
use conduit_core::types::{
    Address, BatchState, CompactRequest, Request, RequestContext, RequestContextState, Response,
};
use conduit_core::{ContextId, Result, ServiceError};

use crate::callbacks::{CAUSE_INSUFFICIENT_BALANCE, CAUSE_TIMEOUT, ERR_NO_RESPONSES};
use crate::keeper::Txn;
use crate::keys;
use crate::store::{get_json, put_json, scan_json};

/// What triggered a batch. Only scheduled batches survive an unfunded escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchOrigin {
    Created,
    Resumed,
    Scheduled,
}

/// Recover the request id from a request-scoped key.
fn request_id_from_key(key: &[u8]) -> Result<RequestId> {
    RequestId::from_slice(key.get(1..).unwrap_or_default())
        .map_err(|e| ServiceError::Corrupted(format!("request key: {e}")))
}

impl Txn<'_> {
    /// Active requests under `prefix`, with their ids, in key order.
    pub(crate) fn active_entries(&self, prefix: &[u8]) -> Result<Vec<(RequestId, CompactRequest)>> {
        let mut out = Vec::new();
        for (key, value) in self.store.prefix_scan(prefix)? {
            let id = request_id_from_key(&key)?;
            let compact = serde_json::from_slice(&value)
                .map_err(|e| ServiceError::Corrupted(format!("active request {id}: {e}")))?;
            out.push((id, compact));
        }
        Ok(out)
    }

    /// Fee `provider` would charge for the next request of `ctx`, or `None`
    /// when the provider cannot take it.
    fn eligible_fee(&self, ctx: &RequestContext, provider: &Address) -> Result<Option<Coins>> {
        let skip = |reason: &str| {
            tracing::warn!(
                context_id = %ctx.id,
                batch = ctx.batch_counter,
                provider = %provider,
                reason,
                "provider skipped"
            );
            Ok(None)
        };

        let Some(binding) = self.binding(&ctx.service_name, provider)? else {
            return skip("no binding");
        };
        if !binding.available {
            return skip("binding unavailable");
        }
        if !self.deposit_sufficient(&binding) {
            return skip("insufficient deposit");
        }
        if binding.min_resp_time > ctx.timeout.max(0) as u64 {
            return skip("minimum response time exceeds timeout");
        }
        let volume = self.request_volume(&ctx.consumer, provider)?;
        let fee = binding.pricing.fee_for_volume(volume);
        if !fee.is_all_lte(&ctx.service_fee_cap) {
            return skip("price exceeds service fee cap");
        }
        Ok(Some(fee))
    }

    fn request_volume(&self, consumer: &Address, provider: &Address) -> Result<u64> {
        Ok(get_json(&*self.store, &keys::request_volume(consumer, provider))?.unwrap_or(0))
    }

    fn bump_request_volume(&mut self, consumer: &Address, provider: &Address) -> Result<()> {
        let next = self.request_volume(consumer, provider)?.saturating_add(1);
        put_json(self.store, &keys::request_volume(consumer, provider), &next)?;
        Ok(())
    }

    /// Expand the next batch of `ctx`. The caller saves the context.
    pub(crate) fn start_batch(&mut self, ctx: &mut RequestContext, origin: BatchOrigin) -> Result<()> {
        let previous = ctx.batch_counter;
        ctx.batch_counter += 1;

        let mut issued: Vec<(Address, Coins)> = Vec::with_capacity(ctx.providers.len());
        for provider in &ctx.providers {
            if ctx.super_mode {
                issued.push((provider.clone(), Coins::new()));
            } else if let Some(fee) = self.eligible_fee(ctx, provider)? {
                issued.push((provider.clone(), fee));
            }
        }

        let total = issued
            .iter()
            .fold(Coins::new(), |acc, (_, fee)| acc.add(fee));
        if !total.is_zero() {
            if let Err(e) = self.ledger.escrow(&ctx.consumer, &total) {
                if origin != BatchOrigin::Scheduled {
                    return Err(e.into());
                }
                ctx.batch_counter = previous;
                ctx.state = RequestContextState::Paused;
                ctx.next_batch_height = 0;
                self.notify_state(ctx, CAUSE_INSUFFICIENT_BALANCE);
                tracing::warn!(
                    context_id = %ctx.id,
                    consumer = %ctx.consumer,
                    needed = %total,
                    error = %e,
                    "request context paused: batch could not be funded"
                );
                return Ok(());
            }
        }

        if previous > 0 {
            self.prune_batch(&ctx.id, previous)?;
        }

        let height = self.height();
        let expiration = height + ctx.timeout;
        for (index, (provider, fee)) in issued.iter().enumerate() {
            let id = RequestId::generate(&ctx.id, ctx.batch_counter, height, index as i16);
            let request = Request {
                id,
                service_name: ctx.service_name.clone(),
                provider: provider.clone(),
                consumer: ctx.consumer.clone(),
                input: ctx.input.clone(),
                service_fee: fee.clone(),
                super_mode: ctx.super_mode,
                request_height: height,
                expiration_height: expiration,
                request_context_id: ctx.id,
                request_context_batch_counter: ctx.batch_counter,
            };
            let compact = CompactRequest {
                request_context_id: ctx.id,
                request_context_batch_counter: ctx.batch_counter,
                provider: provider.clone(),
                service_fee: fee.clone(),
                request_height: height,
                expiration_height: expiration,
            };
            put_json(self.store, &keys::request(&id), &request)?;
            put_json(self.store, &keys::active_request(&id), &compact)?;
            self.store.set(&keys::expiration(expiration, &id), Vec::new())?;
            if !ctx.super_mode {
                self.bump_request_volume(&ctx.consumer, provider)?;
            }
            tracing::debug!(
                context_id = %ctx.id,
                batch = ctx.batch_counter,
                request_id = %id,
                provider = %provider,
                fee = %fee,
                "request issued"
            );
        }

        let count = issued.len() as u16;
        ctx.batch_request_count = count;
        ctx.batch_response_count = 0;
        ctx.batch_response_threshold = ctx.response_threshold.min(count);
        ctx.batch_state = BatchState::Running;
        ctx.next_batch_height = 0;
        tracing::info!(
            context_id = %ctx.id,
            batch = ctx.batch_counter,
            requests = count,
            threshold = ctx.batch_response_threshold,
            "batch started"
        );

        if count == 0 {
            tracing::warn!(context_id = %ctx.id, batch = ctx.batch_counter, "no eligible providers");
            self.complete_batch(ctx, true)?;
        }
        Ok(())
    }

    /// Drop request and response records of a finished batch.
    fn prune_batch(&mut self, ctx: &ContextId, batch_counter: u64) -> Result<()> {
        for prefix in [keys::REQUEST, keys::RESPONSE] {
            let scope = keys::batch_scope(prefix, ctx, batch_counter);
            for (key, _) in self.store.prefix_scan(&scope)? {
                self.store.delete(&key)?;
            }
        }
        Ok(())
    }

    /// Refund an unanswered request to the consumer and forget it.
    pub(crate) fn release_request(
        &mut self,
        ctx: &RequestContext,
        id: &RequestId,
        compact: &CompactRequest,
    ) -> Result<()> {
        if !compact.service_fee.is_zero() {
            self.ledger.refund(&ctx.consumer, &compact.service_fee)?;
        }
        self.store.delete(&keys::active_request(id))?;
        self.store
            .delete(&keys::expiration(compact.expiration_height, id))?;
        tracing::debug!(
            context_id = %ctx.id,
            request_id = %id,
            provider = %compact.provider,
            refund = %compact.service_fee,
            "request released"
        );
        Ok(())
    }

    /// Mark the current batch complete and run the context transition.
    /// `deliver_outputs` is false on timeout, which reports through the state
    /// sink instead.
    fn complete_batch(&mut self, ctx: &mut RequestContext, deliver_outputs: bool) -> Result<()> {
        ctx.batch_state = BatchState::Completed;
        tracing::info!(
            context_id = %ctx.id,
            batch = ctx.batch_counter,
            responses = ctx.batch_response_count,
            "batch completed"
        );
        if deliver_outputs {
            let responses: Vec<Response> = scan_json(
                &*self.store,
                &keys::batch_scope(keys::RESPONSE, &ctx.id, ctx.batch_counter),
            )?;
            let outputs: Vec<String> = responses
                .into_iter()
                .filter(|r| r.result.is_ok())
                .map(|r| r.output)
                .collect();
            let error = outputs.is_empty().then_some(ERR_NO_RESPONSES);
            self.notify_response(ctx, outputs, error);
        }
        self.on_batch_completed(ctx)
    }

    pub(crate) fn respond(&mut self, msg: &RespondService) -> Result<()> {
        let result = msg.validate_basic()?;
        let id = msg.request_id;

        let compact: CompactRequest = match get_json(&*self.store, &keys::active_request(&id))? {
            Some(c) => c,
            None if self.store.get(&keys::response(&id))?.is_some() => {
                return Err(ServiceError::DuplicateResponse(id.to_string()));
            }
            None if self.store.get(&keys::request(&id))?.is_some() => {
                return Err(ServiceError::InvalidRequestId(format!(
                    "{id} is no longer active"
                )));
            }
            None => return Err(ServiceError::UnknownRequest(id.to_string())),
        };
        if compact.provider != msg.provider {
            return Err(ServiceError::Unauthorized(format!(
                "{} is not the provider of {id}",
                msg.provider
            )));
        }
        if self.height() > compact.expiration_height {
            return Err(ServiceError::InvalidRequestId(format!("{id} has expired")));
        }

        let mut ctx = self.context(&compact.request_context_id).map_err(|e| match e {
            ServiceError::UnknownRequestContext(c) => {
                ServiceError::Corrupted(format!("request {id} points at missing context {c}"))
            }
            other => other,
        })?;
        if ctx.batch_state != BatchState::Running
            || ctx.batch_counter != compact.request_context_batch_counter
        {
            return Err(ServiceError::InvalidRequestId(format!(
                "batch {} of {} is no longer running",
                compact.request_context_batch_counter, ctx.id
            )));
        }

        let response = Response {
            request_id: id,
            provider: msg.provider.clone(),
            consumer: ctx.consumer.clone(),
            result,
            output: msg.output.clone(),
            request_context_id: ctx.id,
            request_context_batch_counter: ctx.batch_counter,
        };
        put_json(self.store, &keys::response(&id), &response)?;
        self.store.delete(&keys::active_request(&id))?;
        self.store
            .delete(&keys::expiration(compact.expiration_height, &id))?;

        if !compact.service_fee.is_zero() {
            self.pay_provider(&compact.provider, &compact.service_fee)?;
        }

        ctx.batch_response_count += 1;
        tracing::debug!(
            context_id = %ctx.id,
            batch = ctx.batch_counter,
            request_id = %id,
            provider = %msg.provider,
            code = response.result.code,
            "response recorded"
        );
        if ctx.threshold_reached() {
            self.complete_batch(&mut ctx, true)?;
        }
        self.save_context(&ctx)
    }

    /// Pay `fee` minus tax to the provider's payout address.
    fn pay_provider(&mut self, provider: &Address, fee: &Coins) -> Result<()> {
        let tax = fee.mul_bps(self.config.service_fee_tax_bps);
        let earned = fee
            .checked_sub(&tax)
            .ok_or_else(|| ServiceError::Ledger(format!("tax {tax} exceeds fee {fee}")))?;
        let payee = self.payout_address(provider)?;
        if !earned.is_zero() {
            self.ledger.pay_earned(&payee, &earned)?;
        }
        if !tax.is_zero() {
            self.ledger.collect_tax(&tax)?;
        }
        let key = keys::earned_fees(provider);
        let total: Coins = get_json(&*self.store, &key)?.unwrap_or_default();
        put_json(self.store, &key, &total.add(&earned))?;
        Ok(())
    }

    /// Refund every request expiring at the current height and time out the
    /// batches still waiting on them.
    pub(crate) fn process_expired_requests(&mut self) -> Result<()> {
        let height = self.height();
        let expiring = self.store.prefix_scan(&keys::expirations_at(height))?;
        let mut touched: BTreeMap<ContextId, (RequestContext, u64)> = BTreeMap::new();

        for (key, _) in expiring {
            self.store.delete(&key)?;
            let id = RequestId::from_slice(keys::queue_suffix(&key))
                .map_err(|e| ServiceError::Corrupted(format!("expiration key: {e}")))?;
            let Some(compact) =
                get_json::<CompactRequest>(&*self.store, &keys::active_request(&id))?
            else {
                continue;
            };
            let ctx = match touched.get(&compact.request_context_id) {
                Some((ctx, _)) => ctx.clone(),
                None => {
                    let ctx = self.context(&compact.request_context_id)?;
                    let batch = compact.request_context_batch_counter;
                    touched.insert(ctx.id, (ctx.clone(), batch));
                    ctx
                }
            };
            self.release_request(&ctx, &id, &compact)?;
        }

        for (_, (mut ctx, batch)) in touched {
            if ctx.batch_state != BatchState::Running || ctx.batch_counter != batch {
                continue;
            }
            tracing::warn!(
                context_id = %ctx.id,
                batch,
                responses = ctx.batch_response_count,
                threshold = ctx.batch_response_threshold,
                "batch timed out"
            );
            self.notify_state(&ctx, CAUSE_TIMEOUT);
            self.complete_batch(&mut ctx, false)?;
            self.save_context(&ctx)?;
        }
        Ok(())
    }
}
