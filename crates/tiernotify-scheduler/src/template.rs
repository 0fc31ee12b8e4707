//! Template resolution: procurement-only override, then tier override,
//! then the definition's default.

use std::collections::BTreeSet;

use tiernotify_core::types::{TemplateId, TierName};

use crate::catalog::NotificationDefinition;

#[derive(Debug, Clone)]
pub struct TemplateResolver {
    recognized_asset_types: BTreeSet<String>,
}

impl TemplateResolver {
    pub fn new<I, S>(recognized_asset_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recognized_asset_types: recognized_asset_types.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the procurement-only rule could apply, so callers can skip
    /// the asset lookup otherwise.
    pub fn needs_assets(&self, tier: TierName, definition: &NotificationDefinition) -> bool {
        tier == TierName::ZeroEntitlements && definition.overrides.procurement_only.is_some()
    }

    pub fn holds_recognized_asset(&self, assets: &[String]) -> bool {
        assets
            .iter()
            .any(|asset| self.recognized_asset_types.contains(asset))
    }

    pub fn resolve<'a>(
        &self,
        tier: TierName,
        definition: &'a NotificationDefinition,
        holds_recognized_asset: bool,
    ) -> &'a TemplateId {
        if tier == TierName::ZeroEntitlements && holds_recognized_asset {
            if let Some(template) = &definition.overrides.procurement_only {
                return template;
            }
        }
        definition
            .overrides
            .by_tier
            .get(&tier)
            .unwrap_or(&definition.template)
    }
}
