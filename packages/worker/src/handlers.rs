//! Handlers registered by the worker process.

use std::time::Duration;

use queue_core::payloads::{AnalyticsKpiPayload, InventoryMaintenancePayload, OrderAccountingPayload};
use task_queue::HandlerRegistry;

/// Create the handler registry with the application's job types and demo handlers.
pub fn registry() -> HandlerRegistry {
    let handlers = HandlerRegistry::new();

    handlers.register_payload(|payload: OrderAccountingPayload| async move {
        tracing::info!(
            "Posting accounting entries for order {} (tenant {}, trigger {:?})",
            payload.order_id,
            payload.tenant_id,
            payload.trigger
        );
        Ok(())
    });

    handlers.register_payload(|payload: InventoryMaintenancePayload| async move {
        tracing::info!(
            "Recomputing stock levels for inventory {} (tenant {}, user {:?})",
            payload.inventory_id,
            payload.tenant_id,
            payload.user_id
        );
        Ok(())
    });

    handlers.register_payload(|payload: AnalyticsKpiPayload| async move {
        tracing::info!(
            "Refreshing KPIs for tenant {} (date {})",
            payload.tenant_id,
            payload.date.as_deref().unwrap_or("today")
        );
        Ok(())
    });

    // Demo: Echo handler
    handlers.register_fn("echo", |payload| async move {
        tracing::info!("Echo job: {}", payload);
        Ok(())
    });

    // Demo: Sleep handler
    handlers.register_fn("sleep", |payload| async move {
        let seconds = payload.get("seconds").and_then(|v| v.as_u64()).unwrap_or(5);
        tracing::info!("Sleeping for {} seconds", seconds);
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        Ok(())
    });

    // Demo: Failing handler (for testing retries)
    handlers.register_fn("fail", |payload| async move {
        let should_fail = payload.get("fail").and_then(|v| v.as_bool()).unwrap_or(true);
        anyhow::ensure!(!should_fail, "Intentional failure");
        Ok(())
    });

    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::payloads::{ANALYTICS_KPI, INVENTORY_MAINTENANCE, ORDER_ACCOUNTING};

    #[test]
    fn registers_application_job_types() {
        let handlers = registry();
        for job_type in [ORDER_ACCOUNTING, INVENTORY_MAINTENANCE, ANALYTICS_KPI, "echo", "fail"] {
            assert!(handlers.has_handler(job_type), "missing {}", job_type);
        }
    }
}
