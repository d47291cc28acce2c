//! Typed payloads for the job types the application enqueues.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Recompute accounting entries for an order.
pub const ORDER_ACCOUNTING: &str = "order-accounting";
/// Run inventory-maintenance routines after a stock change.
pub const INVENTORY_MAINTENANCE: &str = "inventory-maintenance";
/// Refresh the analytics KPIs of a tenant.
pub const ANALYTICS_KPI: &str = "analytics-kpi";

/// A payload bound to a single job type.
pub trait JobPayload: Serialize + DeserializeOwned + Send + 'static {
    const JOB_TYPE: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAccountingPayload {
    pub order_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl JobPayload for OrderAccountingPayload {
    const JOB_TYPE: &'static str = ORDER_ACCOUNTING;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryMaintenancePayload {
    pub inventory_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl JobPayload for InventoryMaintenancePayload {
    const JOB_TYPE: &'static str = INVENTORY_MAINTENANCE;
}

/// Optional fields of an inventory-maintenance job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryMaintenanceOptions {
    pub trigger: Option<String>,
    pub user_id: Option<String>,
}

impl InventoryMaintenanceOptions {
    pub fn trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsKpiPayload {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Day to recompute, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl JobPayload for AnalyticsKpiPayload {
    const JOB_TYPE: &'static str = ANALYTICS_KPI;
}

/// Optional fields of an analytics-kpi job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsKpiOptions {
    pub trigger: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl AnalyticsKpiOptions {
    pub fn trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }
}

impl OrderAccountingPayload {
    pub fn new(
        order_id: impl Into<String>,
        tenant_id: impl Into<String>,
        trigger: Option<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            tenant_id: tenant_id.into(),
            trigger,
        }
    }
}

impl InventoryMaintenancePayload {
    pub fn new(
        inventory_id: impl Into<String>,
        tenant_id: impl Into<String>,
        options: InventoryMaintenanceOptions,
    ) -> Self {
        Self {
            inventory_id: inventory_id.into(),
            tenant_id: tenant_id.into(),
            trigger: options.trigger,
            user_id: options.user_id,
        }
    }
}

impl AnalyticsKpiPayload {
    pub fn new(tenant_id: impl Into<String>, options: AnalyticsKpiOptions) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trigger: options.trigger,
            date: options.date.map(|d| d.to_rfc3339()),
        }
    }
}
