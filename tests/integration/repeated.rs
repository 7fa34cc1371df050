use anyhow::Result;

use conduit_core::msgs::UpdateRequestContext;
use conduit_core::types::{BatchState, RequestContextState};
use conduit_core::{Coins, ServiceError};
use conduit_services::callbacks::{CAUSE_COMPLETED, CAUSE_INSUFFICIENT_BALANCE};

use crate::*;

/// Answer the current batch from `provider`.
fn answer(chain: &mut Chain, id: &ContextId, provider: &str) -> Result<()> {
    let rid = chain.request_for(id, provider)?;
    chain.respond(rid, provider, r#"{"price":"1"}"#)?;
    Ok(())
}

#[test]
fn test_repeated_total_runs_exactly_that_many_batches() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1"], 10, 3))?;

    let mut started_at = Vec::new();
    for batch in 1..=3 {
        chain.wait_for_batch(&id, batch, 20)?;
        let ctx = chain.context(&id)?;
        assert_eq!(ctx.batch_counter, batch);
        assert_eq!(ctx.batch_state, BatchState::Running);
        started_at.push(chain.request_for(&id, "p1")?.parts().request_height);
        answer(&mut chain, &id, "p1")?;
    }
    // Each batch starts one frequency after the previous one completed.
    assert_eq!(started_at, vec![1, 11, 22]);

    let ctx = chain.context(&id)?;
    assert_eq!(ctx.state, RequestContextState::Completed);
    assert_eq!(ctx.next_batch_height, 0);

    chain.advance(40)?;
    assert_eq!(chain.context(&id)?.batch_counter, 3);
    assert_eq!(chain.ledger.balance(&addr(CONSUMER)), coins("970stake"));

    let events = chain.recorder.take();
    let responses = events
        .iter()
        .filter(|e| matches!(e, Event::Response { error: None, .. }))
        .count();
    assert_eq!(responses, 3);
    assert_eq!(
        events.last(),
        Some(&Event::State {
            context_id: id,
            cause: CAUSE_COMPLETED.into(),
        })
    );
    Ok(())
}

#[test]
fn test_earlier_batch_records_are_pruned() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1"], 10, 2))?;
    answer(&mut chain, &id, "p1")?;
    assert_eq!(chain.keeper.responses_of_batch(&chain.store, &id, 1)?.len(), 1);

    chain.wait_for_batch(&id, 2, 20)?;
    assert!(chain.keeper.requests_of_batch(&chain.store, &id, 1)?.is_empty());
    assert!(chain.keeper.responses_of_batch(&chain.store, &id, 1)?.is_empty());
    assert_eq!(chain.keeper.requests_of_batch(&chain.store, &id, 2)?.len(), 1);
    Ok(())
}

#[test]
fn test_pause_holds_and_start_resumes_at_once() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1"], 10, -1))?;
    answer(&mut chain, &id, "p1")?;
    assert_eq!(chain.context(&id)?.next_batch_height, 11);

    let owner = chain.owner(id);
    let tx = chain.tx();
    chain
        .keeper
        .pause_request_context(&mut chain.store, &mut chain.ledger, tx, &owner)?;
    let ctx = chain.context(&id)?;
    assert_eq!(ctx.state, RequestContextState::Paused);
    assert_eq!(ctx.next_batch_height, 0);

    let tx = chain.tx();
    let twice = chain
        .keeper
        .pause_request_context(&mut chain.store, &mut chain.ledger, tx, &owner);
    assert!(matches!(twice, Err(ServiceError::InvalidStateTransition(_))));

    chain.advance(30)?;
    assert_eq!(chain.context(&id)?.batch_counter, 1, "paused context issued a batch");

    let tx = chain.tx();
    chain
        .keeper
        .start_request_context(&mut chain.store, &mut chain.ledger, tx, &owner)?;
    let ctx = chain.context(&id)?;
    assert_eq!(ctx.state, RequestContextState::Running);
    assert_eq!(ctx.batch_counter, 2);
    assert_eq!(
        chain.request_for(&id, "p1")?.parts().request_height,
        chain.height
    );

    let tx = chain.tx();
    let again = chain
        .keeper
        .start_request_context(&mut chain.store, &mut chain.ledger, tx, &owner);
    assert!(matches!(again, Err(ServiceError::InvalidStateTransition(_))));

    let stranger = RequestContextRef {
        request_context_id: id,
        consumer: addr("mallory"),
    };
    let tx = chain.tx();
    let denied = chain
        .keeper
        .pause_request_context(&mut chain.store, &mut chain.ledger, tx, &stranger);
    assert!(matches!(denied, Err(ServiceError::Unauthorized(_))));
    Ok(())
}

#[test]
fn test_unfunded_batch_pauses_the_context() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    chain.ledger.mint(&addr("thin"), &coins("10stake"));

    let mut msg = repeated_msg(&["p1"], 10, -1);
    msg.consumer = addr("thin");
    let id = chain.call(&msg)?;
    answer(&mut chain, &id, "p1")?;
    assert_eq!(chain.ledger.balance(&addr("thin")), Coins::new());
    chain.recorder.take();

    chain.advance(15)?;
    let ctx = chain.context(&id)?;
    assert_eq!(ctx.state, RequestContextState::Paused);
    assert_eq!(ctx.batch_counter, 1);
    assert_eq!(ctx.batch_state, BatchState::Completed);
    assert_eq!(
        chain.recorder.take(),
        vec![Event::State {
            context_id: id,
            cause: CAUSE_INSUFFICIENT_BALANCE.into(),
        }]
    );

    chain.ledger.mint(&addr("thin"), &coins("10stake"));
    let owner = RequestContextRef {
        request_context_id: id,
        consumer: addr("thin"),
    };
    let tx = chain.tx();
    chain
        .keeper
        .start_request_context(&mut chain.store, &mut chain.ledger, tx, &owner)?;
    assert_eq!(chain.context(&id)?.batch_counter, 2);
    assert!(chain.ledger.balance(&addr("thin")).is_zero());
    Ok(())
}

#[test]
fn test_update_applies_from_the_next_batch() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1", "p2"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1", "p2"], 10, 5))?;
    answer(&mut chain, &id, "p1")?;

    let update = UpdateRequestContext {
        request_context_id: id,
        providers: vec![addr("p2")],
        service_fee_cap: Coins::new(),
        timeout: 8,
        repeated_frequency: 0,
        repeated_total: 0,
        consumer: addr(CONSUMER),
    };
    let tx = chain.tx();
    chain
        .keeper
        .update_request_context(&mut chain.store, &mut chain.ledger, tx, &update)?;
    let ctx = chain.context(&id)?;
    assert_eq!(ctx.providers, vec![addr("p2")]);
    assert_eq!(ctx.timeout, 8);
    assert_eq!(ctx.batch_counter, 1);
    // Batch counters still describe batch 1 and its two providers.
    assert_eq!(ctx.batch_request_count, 2);

    chain.wait_for_batch(&id, 2, 20)?;
    assert_eq!(chain.context(&id)?.batch_request_count, 1);
    let issued = chain.current_requests(&id)?;
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].1, "p2");
    let request = chain
        .keeper
        .request(&chain.store, &issued[0].0)?
        .expect("request stored");
    assert_eq!(request.expiration_height, request.request_height + 8);

    let too_fast = UpdateRequestContext {
        repeated_frequency: 3,
        providers: vec![],
        timeout: 0,
        ..update.clone()
    };
    let tx = chain.tx();
    let err = chain
        .keeper
        .update_request_context(&mut chain.store, &mut chain.ledger, tx, &too_fast);
    assert!(matches!(err, Err(ServiceError::InvalidRepeatedFrequency(_))));

    let shrink = UpdateRequestContext {
        repeated_total: 1,
        providers: vec![],
        timeout: 0,
        ..update
    };
    let tx = chain.tx();
    let err = chain
        .keeper
        .update_request_context(&mut chain.store, &mut chain.ledger, tx, &shrink);
    assert!(matches!(err, Err(ServiceError::InvalidRepeatedTotal(_))));
    Ok(())
}

fn cap_total(id: ContextId, total: i64) -> UpdateRequestContext {
    UpdateRequestContext {
        request_context_id: id,
        providers: vec![],
        service_fee_cap: Coins::new(),
        timeout: 0,
        repeated_frequency: 0,
        repeated_total: total,
        consumer: addr(CONSUMER),
    }
}

/// Lowering the total to the batches already run finishes the context.
#[test]
fn test_total_lowered_to_batches_run_completes_context() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1"], 10, 5))?;
    answer(&mut chain, &id, "p1")?;
    assert_eq!(chain.context(&id)?.next_batch_height, 11);
    chain.recorder.take();

    let tx = chain.tx();
    chain
        .keeper
        .update_request_context(&mut chain.store, &mut chain.ledger, tx, &cap_total(id, 1))?;
    let ctx = chain.context(&id)?;
    assert_eq!(ctx.state, RequestContextState::Completed);
    assert_eq!(ctx.next_batch_height, 0);
    assert_eq!(
        chain.recorder.take(),
        vec![Event::State {
            context_id: id,
            cause: CAUSE_COMPLETED.into(),
        }]
    );

    chain.advance(30)?;
    assert_eq!(chain.context(&id)?.batch_counter, 1);
    assert_eq!(chain.ledger.balance(&addr(CONSUMER)), coins("990stake"));
    assert!(chain.recorder.take().is_empty());
    Ok(())
}

#[test]
fn test_paused_context_with_total_reached_cannot_resume() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1"], 10, 5))?;
    answer(&mut chain, &id, "p1")?;

    let owner = chain.owner(id);
    let tx = chain.tx();
    chain
        .keeper
        .pause_request_context(&mut chain.store, &mut chain.ledger, tx, &owner)?;
    let tx = chain.tx();
    chain
        .keeper
        .update_request_context(&mut chain.store, &mut chain.ledger, tx, &cap_total(id, 1))?;
    assert!(chain.context(&id)?.is_completed());

    let tx = chain.tx();
    let resumed = chain
        .keeper
        .start_request_context(&mut chain.store, &mut chain.ledger, tx, &owner);
    assert!(matches!(resumed, Err(ServiceError::RequestContextCompleted(_))));

    chain.advance(30)?;
    assert_eq!(chain.context(&id)?.batch_counter, 1);
    assert_eq!(chain.ledger.balance(&addr(CONSUMER)), coins("990stake"));
    Ok(())
}

#[test]
fn test_one_shot_context_rejects_schedule_updates() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&call_msg(&["p1"], 1, 5))?;

    let update = UpdateRequestContext {
        request_context_id: id,
        providers: vec![],
        service_fee_cap: Coins::new(),
        timeout: 0,
        repeated_frequency: 20,
        repeated_total: 0,
        consumer: addr(CONSUMER),
    };
    let tx = chain.tx();
    let err = chain
        .keeper
        .update_request_context(&mut chain.store, &mut chain.ledger, tx, &update);
    assert!(matches!(err, Err(ServiceError::InvalidStateTransition(_))));
    Ok(())
}
