use eventlog_core::TenantId;

use crate::committed::CommittedEvent;
use crate::messages::{CommitAggregateEventsRequest, CommitEventsRequest};

/// Helper trait for tenant-scoped messages.
///
/// Per-tenant actors use it to refuse messages routed to the wrong tenant.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl TenantScoped for CommitEventsRequest {
    fn tenant_id(&self) -> TenantId {
        self.execution_context.tenant
    }
}

impl TenantScoped for CommitAggregateEventsRequest {
    fn tenant_id(&self) -> TenantId {
        self.execution_context.tenant
    }
}

impl TenantScoped for CommittedEvent {
    fn tenant_id(&self) -> TenantId {
        self.execution_context.tenant
    }
}
