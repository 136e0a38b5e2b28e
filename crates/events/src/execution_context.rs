use serde::{Deserialize, Serialize};

use eventlog_core::{CorrelationId, TenantId};

/// The context a commit request executes in.
///
/// Copied onto every committed event so consumers can trace an event back to the
/// tenant and request that produced it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub tenant: TenantId,
    pub correlation_id: CorrelationId,
}

impl ExecutionContext {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            correlation_id: CorrelationId::new(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
