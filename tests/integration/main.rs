//! Conduit integration test harness.
//!
//! Each test drives a [`Keeper`] over an in-memory store and ledger, block by
//! block, the way a host chain would:
//!
//!   cargo test --test integration
//!
//! Set `RUST_LOG=conduit_services=debug` to see the engine's trace.

mod expiry;
mod registry;
mod repeated;

use std::sync::{Arc, Mutex, Once};

use anyhow::{bail, Context, Result};

use conduit_core::config::EngineConfig;
use conduit_core::ids::{ContextId, RequestId};
use conduit_core::msgs::{BindService, CallService, DefineService, RequestContextRef, RespondService};
use conduit_core::types::{Address, RequestContext};
use conduit_core::Coins;
use conduit_services::{Keeper, MemoryLedger, MemoryStore, ResponseSink, StateSink, TxContext};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SERVICE: &str = "price-feed";
pub const MODULE: &str = "oracle";
pub const CONSUMER: &str = "consumer";

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn coins(s: &str) -> Coins {
    s.parse().expect("test coin literal")
}

pub fn addr(s: &str) -> Address {
    Address::new(s)
}

/// What a module's sinks observed, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Response {
        context_id: ContextId,
        outputs: Vec<String>,
        error: Option<String>,
    },
    State {
        context_id: ContextId,
        cause: String,
    },
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl ResponseSink for Recorder {
    fn on_response(&self, context_id: &ContextId, outputs: &[String], error: Option<&str>) {
        self.events.lock().unwrap().push(Event::Response {
            context_id: *context_id,
            outputs: outputs.to_vec(),
            error: error.map(str::to_string),
        });
    }
}

impl StateSink for Recorder {
    fn on_state(&self, context_id: &ContextId, cause: &str) {
        self.events.lock().unwrap().push(Event::State {
            context_id: *context_id,
            cause: cause.to_string(),
        });
    }
}

/// A single-node chain: one keeper, one store, one ledger, and a height.
pub struct Chain {
    pub keeper: Keeper,
    pub store: MemoryStore,
    pub ledger: MemoryLedger,
    pub height: i64,
    pub recorder: Arc<Recorder>,
    tx_seq: u64,
}

impl Chain {
    /// Tax of 10%, deposit of 10x the price, refund delay of 20 blocks.
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            min_deposit_multiple: 10,
            service_fee_tax_bps: 1000,
            deposit_refund_delay: 20,
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let keeper = Keeper::new(config);
        let recorder = Arc::new(Recorder::default());
        keeper
            .callbacks()
            .register_response_sink(MODULE, recorder.clone());
        keeper.callbacks().register_state_sink(MODULE, recorder.clone());

        let mut ledger = MemoryLedger::new();
        ledger.mint(&addr(CONSUMER), &coins("1000stake"));
        Self {
            keeper,
            store: MemoryStore::new(),
            ledger,
            height: 1,
            recorder,
            tx_seq: 0,
        }
    }

    /// A fresh transaction at the current height.
    pub fn tx(&mut self) -> TxContext {
        self.tx_seq += 1;
        let hash = blake3::hash(format!("tx-{}", self.tx_seq).as_bytes());
        TxContext::new(self.height, *hash.as_bytes(), 0)
    }

    /// Close the current block and open the next one.
    pub fn next_block(&mut self) -> Result<()> {
        self.keeper
            .end_block(&mut self.store, &mut self.ledger, self.height)
            .with_context(|| format!("end_block at {}", self.height))?;
        self.height += 1;
        Ok(())
    }

    pub fn advance(&mut self, blocks: i64) -> Result<()> {
        for _ in 0..blocks {
            self.next_block()?;
        }
        Ok(())
    }

    /// Define `SERVICE` and bind each provider at `price`, funding its deposit.
    pub fn setup_service(&mut self, providers: &[&str], price: &str) -> Result<()> {
        let tx = self.tx();
        self.keeper.define_service(
            &mut self.store,
            &mut self.ledger,
            tx,
            &DefineService {
                name: SERVICE.into(),
                description: "spot prices".into(),
                tags: vec!["price".into()],
                author: addr("author"),
                author_description: String::new(),
                schemas: r#"{"input":{"type":"object"},"output":{"type":"object"}}"#.into(),
            },
        )?;
        let price = coins(price);
        let deposit = price.mul(10);
        for p in providers {
            self.ledger.mint(&addr(p), &deposit);
            let tx = self.tx();
            self.keeper.bind_service(
                &mut self.store,
                &mut self.ledger,
                tx,
                &BindService {
                    service_name: SERVICE.into(),
                    provider: addr(p),
                    deposit: deposit.clone(),
                    pricing: format!(r#"{{"price":"{price}"}}"#),
                    min_resp_time: 1,
                },
            )?;
        }
        Ok(())
    }

    pub fn call(&mut self, msg: &CallService) -> Result<ContextId> {
        let tx = self.tx();
        Ok(self
            .keeper
            .call_service(&mut self.store, &mut self.ledger, tx, msg)?)
    }

    pub fn respond(&mut self, request_id: RequestId, provider: &str, output: &str) -> conduit_core::Result<()> {
        let tx = self.tx();
        self.keeper.respond_service(
            &mut self.store,
            &mut self.ledger,
            tx,
            &RespondService {
                request_id,
                provider: addr(provider),
                result: r#"{"code":200,"message":""}"#.into(),
                output: output.into(),
            },
        )
    }

    pub fn context(&self, id: &ContextId) -> Result<RequestContext> {
        self.keeper
            .request_context(&self.store, id)?
            .with_context(|| format!("context {id} not found"))
    }

    /// Request ids of the context's current batch, in batch-index order,
    /// paired with their providers.
    pub fn current_requests(&self, id: &ContextId) -> Result<Vec<(RequestId, String)>> {
        let ctx = self.context(id)?;
        let requests = self
            .keeper
            .requests_of_batch(&self.store, id, ctx.batch_counter)?;
        Ok(requests
            .into_iter()
            .map(|r| (r.id, r.provider.to_string()))
            .collect())
    }

    /// Request id issued to `provider` in the current batch.
    pub fn request_for(&self, id: &ContextId, provider: &str) -> Result<RequestId> {
        match self
            .current_requests(id)?
            .into_iter()
            .find(|(_, p)| p == provider)
        {
            Some((rid, _)) => Ok(rid),
            None => bail!("no request for {provider} in the current batch of {id}"),
        }
    }

    /// Run blocks until the context reaches `batch`, at most `limit` blocks.
    pub fn wait_for_batch(&mut self, id: &ContextId, batch: u64, limit: i64) -> Result<()> {
        for _ in 0..limit {
            if self.context(id)?.batch_counter >= batch {
                return Ok(());
            }
            self.next_block()?;
        }
        bail!("context {id} did not reach batch {batch} within {limit} blocks")
    }

    pub fn owner(&self, id: ContextId) -> RequestContextRef {
        RequestContextRef {
            request_context_id: id,
            consumer: addr(CONSUMER),
        }
    }
}

/// A one-shot call from `MODULE` on behalf of `CONSUMER`.
pub fn call_msg(providers: &[&str], threshold: u16, timeout: i64) -> CallService {
    CallService {
        service_name: SERVICE.into(),
        providers: providers.iter().map(|p| addr(p)).collect(),
        consumer: addr(CONSUMER),
        input: r#"{"pair":"atom/usd"}"#.into(),
        service_fee_cap: coins("10stake"),
        timeout,
        super_mode: false,
        repeated: false,
        repeated_frequency: 0,
        repeated_total: 0,
        response_threshold: threshold,
        module_name: MODULE.into(),
    }
}

/// A repeating call issuing `total` batches every `frequency` blocks.
pub fn repeated_msg(providers: &[&str], frequency: u64, total: i64) -> CallService {
    CallService {
        repeated: true,
        repeated_frequency: frequency,
        repeated_total: total,
        ..call_msg(providers, 1, 5)
    }
}
