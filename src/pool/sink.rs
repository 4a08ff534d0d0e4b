use bb8::ErrorSink;
use tracing::warn;

use crate::error::SqlConduitError;
use crate::types::Backend;

/// Routes background connection errors (failed replenishment, failed health checks)
/// to `tracing` instead of dropping them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TracingErrorSink {
    pub(crate) backend: Backend,
}

impl ErrorSink<SqlConduitError> for TracingErrorSink {
    fn sink(&self, error: SqlConduitError) {
        warn!(backend = %self.backend, %error, "pool connection error");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<SqlConduitError>> {
        Box::new(*self)
    }
}
