use anyhow::Result;

use conduit_core::msgs::DisableServiceBinding;
use conduit_core::types::BatchState;
use conduit_services::callbacks::{CAUSE_COMPLETED, CAUSE_TIMEOUT, ERR_NO_RESPONSES};

use crate::*;

#[test]
fn test_timeout_refunds_and_reports_through_state_sink() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1", "p2"], "10stake")?;
    let id = chain.call(&call_msg(&["p1", "p2"], 2, 5))?;
    let r1 = chain.request_for(&id, "p1")?;
    let r2 = chain.request_for(&id, "p2")?;
    chain.respond(r1, "p1", r#"{"price":"3"}"#)?;

    // Expires at height 6; the sweep runs in that block's end_block.
    chain.advance(5)?;
    assert!(chain.keeper.is_request_active(&chain.store, &r2)?);
    chain.next_block()?;
    assert!(!chain.keeper.is_request_active(&chain.store, &r2)?);

    let ctx = chain.context(&id)?;
    assert_eq!(ctx.batch_state, BatchState::Completed);
    assert!(ctx.is_completed());
    assert_eq!(ctx.batch_response_count, 1);
    assert_eq!(chain.ledger.balance(&addr(CONSUMER)), coins("990stake"));
    assert!(chain.ledger.escrowed().is_zero());

    assert_eq!(
        chain.recorder.take(),
        vec![
            Event::State {
                context_id: id,
                cause: CAUSE_TIMEOUT.into(),
            },
            Event::State {
                context_id: id,
                cause: CAUSE_COMPLETED.into(),
            },
        ]
    );
    Ok(())
}

#[test]
fn test_timed_out_repeated_context_keeps_going() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&repeated_msg(&["p1"], 10, 2))?;

    chain.wait_for_batch(&id, 2, 30)?;
    assert_eq!(
        chain.request_for(&id, "p1")?.parts().request_height,
        16,
        "next batch is one frequency after the timeout"
    );
    assert_eq!(
        chain.recorder.take(),
        vec![Event::State {
            context_id: id,
            cause: CAUSE_TIMEOUT.into(),
        }]
    );

    chain.advance(10)?;
    assert!(chain.context(&id)?.is_completed());
    assert_eq!(chain.ledger.balance(&addr(CONSUMER)), coins("1000stake"));
    Ok(())
}

#[test]
fn test_batch_without_eligible_providers_completes_at_once() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1", "p2"], "10stake")?;

    let mut msg = call_msg(&["p1", "p2"], 1, 5);
    msg.service_fee_cap = coins("5stake");
    let id = chain.call(&msg)?;

    let ctx = chain.context(&id)?;
    assert_eq!(ctx.batch_counter, 1);
    assert_eq!(ctx.batch_request_count, 0);
    assert!(ctx.is_completed());
    assert!(chain.current_requests(&id)?.is_empty());
    assert!(chain.ledger.escrowed().is_zero());
    assert_eq!(
        chain.recorder.take(),
        vec![
            Event::Response {
                context_id: id,
                outputs: vec![],
                error: Some(ERR_NO_RESPONSES.into()),
            },
            Event::State {
                context_id: id,
                cause: CAUSE_COMPLETED.into(),
            },
        ]
    );
    Ok(())
}

#[test]
fn test_failed_results_count_but_carry_no_output() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    let id = chain.call(&call_msg(&["p1"], 1, 5))?;
    let rid = chain.request_for(&id, "p1")?;

    let tx = chain.tx();
    chain.keeper.respond_service(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &RespondService {
            request_id: rid,
            provider: addr("p1"),
            result: r#"{"code":500,"message":"upstream down"}"#.into(),
            output: String::new(),
        },
    )?;

    assert!(chain.context(&id)?.is_completed());
    let events = chain.recorder.take();
    assert_eq!(
        events.first(),
        Some(&Event::Response {
            context_id: id,
            outputs: vec![],
            error: Some(ERR_NO_RESPONSES.into()),
        })
    );
    Ok(())
}

#[test]
fn test_disabled_binding_is_skipped() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1", "p2"], "10stake")?;
    let tx = chain.tx();
    chain.keeper.disable_service_binding(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &DisableServiceBinding {
            service_name: SERVICE.into(),
            provider: addr("p1"),
        },
    )?;

    let id = chain.call(&call_msg(&["p1", "p2"], 1, 5))?;
    let issued = chain.current_requests(&id)?;
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].1, "p2");
    assert_eq!(issued[0].0.parts().batch_index, 0);
    assert_eq!(chain.ledger.escrowed(), &coins("10stake"));
    Ok(())
}
