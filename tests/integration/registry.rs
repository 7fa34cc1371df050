use anyhow::Result;

use conduit_core::msgs::{
    DisableServiceBinding, EnableServiceBinding, RefundServiceDeposit, SetWithdrawAddress,
    UpdateServiceBinding,
};
use conduit_core::ServiceError;

use crate::*;

fn binding_ref(provider: &str) -> DisableServiceBinding {
    DisableServiceBinding {
        service_name: SERVICE.into(),
        provider: addr(provider),
    }
}

#[test]
fn test_definitions_and_bindings_are_queryable() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p2", "p1"], "10stake")?;

    let def = chain
        .keeper
        .service_definition(&chain.store, SERVICE)?
        .expect("definition stored");
    assert_eq!(def.author, addr("author"));
    assert_eq!(def.tags, vec!["price".to_string()]);

    let providers: Vec<String> = chain
        .keeper
        .service_bindings(&chain.store, SERVICE)?
        .into_iter()
        .map(|b| b.provider.to_string())
        .collect();
    assert_eq!(providers, vec!["p1", "p2"]);
    assert_eq!(chain.ledger.deposits(), &coins("200stake"));

    let tx = chain.tx();
    let dup = chain.keeper.define_service(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &DefineService {
            name: SERVICE.into(),
            description: String::new(),
            tags: vec![],
            author: addr("someone"),
            author_description: String::new(),
            schemas: r#"{"input":{},"output":{}}"#.into(),
        },
    );
    assert!(matches!(dup, Err(ServiceError::ServiceDefinitionExists(_))));

    chain.ledger.mint(&addr("p3"), &coins("50stake"));
    let tx = chain.tx();
    let short = chain.keeper.bind_service(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &BindService {
            service_name: SERVICE.into(),
            provider: addr("p3"),
            deposit: coins("50stake"),
            pricing: r#"{"price":"10stake"}"#.into(),
            min_resp_time: 1,
        },
    );
    assert!(matches!(short, Err(ServiceError::InsufficientDeposit(_))));
    assert!(chain.keeper.service_binding(&chain.store, SERVICE, &addr("p3"))?.is_none());
    assert_eq!(chain.ledger.balance(&addr("p3")), coins("50stake"));
    Ok(())
}

#[test]
fn test_deposit_refund_waits_out_the_delay() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;

    let tx = chain.tx();
    let early = chain.keeper.refund_service_deposit(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &binding_ref("p1"),
    );
    assert!(matches!(early, Err(ServiceError::BindingAvailable(_))));

    let disabled_at = chain.height;
    let tx = chain.tx();
    chain
        .keeper
        .disable_service_binding(&mut chain.store, &mut chain.ledger, tx, &binding_ref("p1"))?;
    let binding = chain
        .keeper
        .service_binding(&chain.store, SERVICE, &addr("p1"))?
        .expect("binding stored");
    assert!(!binding.available);
    assert_eq!(binding.disabled_height, disabled_at);

    chain.advance(19)?;
    let tx = chain.tx();
    let locked = chain.keeper.refund_service_deposit(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &binding_ref("p1"),
    );
    assert!(matches!(locked, Err(ServiceError::DepositLocked(_))));

    chain.next_block()?;
    let tx = chain.tx();
    chain.keeper.refund_service_deposit(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &RefundServiceDeposit {
            service_name: SERVICE.into(),
            provider: addr("p1"),
        },
    )?;
    assert_eq!(chain.ledger.balance(&addr("p1")), coins("100stake"));
    assert!(chain.ledger.deposits().is_zero());

    let tx = chain.tx();
    let empty = chain.keeper.enable_service_binding(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &EnableServiceBinding {
            service_name: SERVICE.into(),
            provider: addr("p1"),
            deposit: Coins::new(),
        },
    );
    assert!(matches!(empty, Err(ServiceError::InsufficientDeposit(_))));

    let tx = chain.tx();
    chain.keeper.enable_service_binding(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &EnableServiceBinding {
            service_name: SERVICE.into(),
            provider: addr("p1"),
            deposit: coins("100stake"),
        },
    )?;
    let binding = chain
        .keeper
        .service_binding(&chain.store, SERVICE, &addr("p1"))?
        .expect("binding stored");
    assert!(binding.available);
    assert_eq!(binding.deposit, coins("100stake"));
    Ok(())
}

#[test]
fn test_earnings_follow_the_withdraw_address() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;
    assert_eq!(chain.keeper.withdraw_address(&chain.store, &addr("p1"))?, addr("p1"));

    let tx = chain.tx();
    chain.keeper.set_withdraw_address(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &SetWithdrawAddress {
            provider: addr("p1"),
            withdraw_address: addr("vault"),
        },
    )?;
    assert_eq!(chain.keeper.withdraw_address(&chain.store, &addr("p1"))?, addr("vault"));

    let id = chain.call(&call_msg(&["p1"], 1, 5))?;
    let rid = chain.request_for(&id, "p1")?;
    chain.respond(rid, "p1", r#"{"price":"2"}"#)?;

    assert_eq!(chain.ledger.balance(&addr("vault")), coins("9stake"));
    assert!(chain.ledger.balance(&addr("p1")).is_zero());
    assert_eq!(chain.keeper.earned_fees(&chain.store, &addr("p1"))?, coins("9stake"));
    Ok(())
}

#[test]
fn test_price_rise_needs_deposit_and_respects_fee_cap() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&["p1"], "10stake")?;

    let raise = UpdateServiceBinding {
        service_name: SERVICE.into(),
        provider: addr("p1"),
        deposit: Coins::new(),
        pricing: r#"{"price":"20stake"}"#.into(),
        min_resp_time: 0,
    };
    let tx = chain.tx();
    let err = chain
        .keeper
        .update_service_binding(&mut chain.store, &mut chain.ledger, tx, &raise);
    assert!(matches!(err, Err(ServiceError::InsufficientDeposit(_))));

    chain.ledger.mint(&addr("p1"), &coins("100stake"));
    let tx = chain.tx();
    chain.keeper.update_service_binding(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &UpdateServiceBinding {
            deposit: coins("100stake"),
            ..raise
        },
    )?;
    let binding = chain
        .keeper
        .service_binding(&chain.store, SERVICE, &addr("p1"))?
        .expect("binding stored");
    assert_eq!(binding.deposit, coins("200stake"));
    assert_eq!(binding.pricing.price, coins("20stake"));
    assert_eq!(binding.min_resp_time, 1);

    let id = chain.call(&call_msg(&["p1"], 1, 5))?;
    assert_eq!(chain.context(&id)?.batch_request_count, 0);
    Ok(())
}

#[test]
fn test_volume_promotion_discounts_later_requests() -> Result<()> {
    let mut chain = Chain::new();
    chain.setup_service(&[], "10stake")?;
    chain.ledger.mint(&addr("p1"), &coins("100stake"));
    let tx = chain.tx();
    chain.keeper.bind_service(
        &mut chain.store,
        &mut chain.ledger,
        tx,
        &BindService {
            service_name: SERVICE.into(),
            provider: addr("p1"),
            deposit: coins("100stake"),
            pricing: r#"{"price":"10stake","promotions_by_volume":[{"volume":1,"discount_bps":5000}]}"#
                .into(),
            min_resp_time: 1,
        },
    )?;

    let first = chain.call(&call_msg(&["p1"], 1, 5))?;
    let second = chain.call(&call_msg(&["p1"], 1, 5))?;
    let fee_of = |id: ContextId| -> Result<Coins> {
        let rid = chain.request_for(&id, "p1")?;
        Ok(chain
            .keeper
            .request(&chain.store, &rid)?
            .expect("request stored")
            .service_fee)
    };
    assert_eq!(fee_of(first)?, coins("10stake"));
    assert_eq!(fee_of(second)?, coins("5stake"));
    assert_eq!(chain.ledger.escrowed(), &coins("15stake"));
    Ok(())
}
