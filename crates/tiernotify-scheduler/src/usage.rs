//! Usage suppression: has the tenant already adopted the nudged feature?

use tiernotify_core::Result;
use tiernotify_core::traits::UsageSignals;
use tiernotify_core::types::TenantId;

use crate::catalog::UsageCheck;

impl UsageCheck {
    /// Evaluate the check. `GroupingsAlertsOrBudgets` stops at the first
    /// positive signal, cheapest first.
    pub async fn has_usage(&self, signals: &dyn UsageSignals, tenant: &TenantId) -> Result<bool> {
        match self {
            UsageCheck::CustomGroupings => signals.has_custom_groupings(tenant).await,
            UsageCheck::GroupingsAlertsOrBudgets => {
                if signals.has_custom_groupings(tenant).await? {
                    return Ok(true);
                }
                if signals.has_alerts(tenant).await? {
                    return Ok(true);
                }
                signals.has_budgets(tenant).await
            }
        }
    }
}
