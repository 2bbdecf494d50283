//! Runtime context shared across step executions.

use crate::config::RuntimeConfig;

/// Per-run context: configuration snapshot plus the cooperative
/// cancellation token. Cancellation propagates to the current step, which
/// aborts at its next suspension point.
#[derive(Clone)]
pub struct RuntimeContext {
    pub config: RuntimeConfig,
    cancel_token: tokio_util::sync::CancellationToken,
}

impl RuntimeContext {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            cancel_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel_token.clone()
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
