//! Module callbacks.
//!
//! A module that creates request contexts on its own behalf registers a
//! [`ResponseSink`] and a [`StateSink`] under its module name. The keeper
//! queues notifications while an operation runs and delivers them only after
//! the operation's writes are committed.

use std::sync::Arc;

use dashmap::DashMap;

use conduit_core::ids::ContextId;

/// Receives the outputs of every completed batch.
pub trait ResponseSink: Send + Sync {
    /// `outputs` holds the successful outputs in request order. `error` is set
    /// when the batch produced none.
    fn on_response(&self, context_id: &ContextId, outputs: &[String], error: Option<&str>);
}

/// Receives lifecycle changes the owner did not ask for (timeouts, unfunded
/// batches) as well as completion.
pub trait StateSink: Send + Sync {
    fn on_state(&self, context_id: &ContextId, cause: &str);
}

pub const CAUSE_COMPLETED: &str = "completed";
pub const CAUSE_KILLED: &str = "killed";
pub const CAUSE_TIMEOUT: &str = "batch timed out with insufficient responses";
pub const CAUSE_INSUFFICIENT_BALANCE: &str = "insufficient balance";
pub const ERR_NO_RESPONSES: &str = "no successful responses";

/// A notification waiting for commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Response {
        module: String,
        context_id: ContextId,
        outputs: Vec<String>,
        error: Option<String>,
    },
    State {
        module: String,
        context_id: ContextId,
        cause: String,
    },
}

/// Sinks keyed by module name. Clones share the same tables.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    response: Arc<DashMap<String, Arc<dyn ResponseSink>>>,
    state: Arc<DashMap<String, Arc<dyn StateSink>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for `module`, replacing any earlier one.
    pub fn register_response_sink(&self, module: &str, sink: Arc<dyn ResponseSink>) {
        if self.response.insert(module.to_string(), sink).is_some() {
            tracing::warn!(module, "replaced response sink");
        }
    }

    pub fn register_state_sink(&self, module: &str, sink: Arc<dyn StateSink>) {
        if self.state.insert(module.to_string(), sink).is_some() {
            tracing::warn!(module, "replaced state sink");
        }
    }

    pub fn has_response_sink(&self, module: &str) -> bool {
        self.response.contains_key(module)
    }

    /// Deliver queued notifications in the order they were raised.
    pub fn deliver(&self, notifications: Vec<Notification>) {
        for n in notifications {
            match n {
                Notification::Response {
                    module,
                    context_id,
                    outputs,
                    error,
                } => {
                    // Clone the Arc out so no map guard is held during the call.
                    let sink = self.response.get(&module).map(|s| Arc::clone(s.value()));
                    match sink {
                        Some(sink) => sink.on_response(&context_id, &outputs, error.as_deref()),
                        None => tracing::debug!(module = %module, context_id = %context_id, "no response sink"),
                    }
                }
                Notification::State {
                    module,
                    context_id,
                    cause,
                } => {
                    let sink = self.state.get(&module).map(|s| Arc::clone(s.value()));
                    match sink {
                        Some(sink) => sink.on_state(&context_id, &cause),
                        None => tracing::debug!(module = %module, context_id = %context_id, "no state sink"),
                    }
                }
            }
        }
    }
}
