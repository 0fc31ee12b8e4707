//! Notification catalog: immutable, versioned notification definitions.
//!
//! Definitions are grouped by lifecycle category and package. Order inside a
//! package list is meaningful: chronological by trigger date, because the
//! selector prefers the highest-index relevant definition.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tiernotify_core::types::{PackageType, TemplateId, TierName, TrialWindow};
use tiernotify_core::{Result, TierNotifyError};

/// Largest `day_offset` / `max_age_days` magnitude a catalog may carry.
pub const MAX_OFFSET_DAYS: i64 = 36_500;

/// Which side of the window a trigger date is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reference {
    Start,
    End,
}

/// Feature-adoption check gating a usage nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageCheck {
    /// Tenant created at least one custom cost grouping.
    CustomGroupings,
    /// Tenant has a custom grouping, an alert, or a budget.
    GroupingsAlertsOrBudgets,
}

/// Typed template overrides for one definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateOverrides {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_tier: BTreeMap<TierName, TemplateId>,
    /// Used for zero-entitlement tenants that hold a recognized asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procurement_only: Option<TemplateId>,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDefinition {
    /// Dedup key; required for usage nudges only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub description: String,
    pub reference: Reference,
    pub day_offset: i64,
    /// Negative means unbounded.
    pub max_age_days: i64,
    pub template: TemplateId,
    #[serde(default)]
    pub overrides: TemplateOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_check: Option<UsageCheck>,
}

impl NotificationDefinition {
    /// `reference date + day_offset`, or `None` when that side of the
    /// window is missing or the sum is not representable.
    pub fn trigger_date(&self, window: &TrialWindow) -> Option<DateTime<Utc>> {
        let reference = match self.reference {
            Reference::Start => window.start,
            Reference::End => window.end,
        }?;
        reference.checked_add_signed(Duration::try_days(self.day_offset)?)
    }

    /// Identifier used in logs: the id when present, else the description.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.description)
    }
}

/// Lifecycle category of a definition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ActiveTrial,
    InactiveTenant,
    UsageNudge,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::ActiveTrial => write!(f, "active-trial"),
            Category::InactiveTenant => write!(f, "inactive-tenant"),
            Category::UsageNudge => write!(f, "usage-nudge"),
        }
    }
}

/// The full registry, constructed once and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: u32,
    #[serde(default)]
    pub active_trial: BTreeMap<PackageType, Vec<NotificationDefinition>>,
    #[serde(default)]
    pub inactive_tenant: BTreeMap<PackageType, Vec<NotificationDefinition>>,
    #[serde(default)]
    pub usage_nudge: BTreeMap<PackageType, Vec<NotificationDefinition>>,
}

impl Catalog {
    /// Definitions for one category and package, in catalog order.
    pub fn definitions(&self, category: Category, package: PackageType) -> &[NotificationDefinition] {
        let map = match category {
            Category::ActiveTrial => &self.active_trial,
            Category::InactiveTenant => &self.inactive_tenant,
            Category::UsageNudge => &self.usage_nudge,
        };
        map.get(&package).map(Vec::as_slice).unwrap_or_default()
    }

    /// True if the package has any active-trial or usage-nudge definitions.
    pub fn covers_trial_package(&self, package: PackageType) -> bool {
        !self.definitions(Category::ActiveTrial, package).is_empty()
            || !self.definitions(Category::UsageNudge, package).is_empty()
    }

    /// Packages evaluated for inactive tenants.
    pub fn inactive_packages(&self) -> impl Iterator<Item = PackageType> + '_ {
        self.inactive_tenant
            .iter()
            .filter(|(_, defs)| !defs.is_empty())
            .map(|(package, _)| *package)
    }

    pub fn len(&self) -> usize {
        [&self.active_trial, &self.inactive_tenant, &self.usage_nudge]
            .iter()
            .flat_map(|map| map.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a replacement catalog from TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TierNotifyError::Config(format!("Failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let catalog: Self = toml::from_str(content)
            .map_err(|e| TierNotifyError::Config(format!("Failed to parse catalog: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Rejects an empty catalog and offsets beyond `MAX_OFFSET_DAYS`.
    /// Usage nudges need an id and a check; ids are unique per package.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(TierNotifyError::Config("catalog defines no notifications".into()));
        }
        for maps in [&self.active_trial, &self.inactive_tenant, &self.usage_nudge] {
            for (package, defs) in maps {
                for def in defs {
                    let offset_ok = def.day_offset.unsigned_abs() <= MAX_OFFSET_DAYS.unsigned_abs();
                    if !offset_ok || def.max_age_days > MAX_OFFSET_DAYS {
                        return Err(TierNotifyError::Config(format!(
                            "notification '{}' for {package}: day_offset and max_age_days must be within {MAX_OFFSET_DAYS} days",
                            def.label()
                        )));
                    }
                }
            }
        }
        for (package, defs) in &self.usage_nudge {
            let mut seen = BTreeSet::new();
            for def in defs {
                let Some(id) = def.id.as_deref() else {
                    return Err(TierNotifyError::Config(format!(
                        "usage nudge '{}' for {package} has no id",
                        def.description
                    )));
                };
                if def.usage_check.is_none() {
                    return Err(TierNotifyError::Config(format!(
                        "usage nudge '{id}' for {package} has no usage check"
                    )));
                }
                if !seen.insert(id) {
                    return Err(TierNotifyError::Config(format!(
                        "duplicate usage nudge id '{id}' for {package}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The built-in navigator catalog.
    pub fn builtin() -> Self {
        let end_of_trial_overrides = TemplateOverrides {
            by_tier: BTreeMap::from([
                (TierName::HeritageResold, TemplateId::new("2AK2J2H3C8MGK2QDVV1RATBZWZYN")),
                (TierName::ZeroEntitlements, TemplateId::new("P7XP17TZ294E03JE208CBGHCPBMK")),
                (TierName::Trial, TemplateId::new("P7XP17TZ294E03JE208CBGHCPBMK")),
            ]),
            procurement_only: Some(TemplateId::new("DHQ818AJDX4959K1MC23D7F88DW8")),
        };

        let active_trial = vec![
            windowed("15 day into trial", Reference::Start, 15, 2, "68GSY7R65DM8QCNTT4WZJB17VZ9X"),
            windowed("week before end of trial", Reference::End, -7, 2, "R9H11NG1G4MFSYQR24M41HSYV06S"),
            NotificationDefinition {
                overrides: end_of_trial_overrides,
                ..windowed("end of trial", Reference::End, 0, 2, "P7XP17TZ294E03JE208CBGHCPBMK")
            },
        ];

        let inactive_tenant = vec![
            windowed("2 weeks inactive", Reference::Start, 14, 2, "7V604FX31SMVSEN6H6817530FT6D"),
            windowed("4 weeks inactive", Reference::Start, 28, 14, "HVT72SC15VM55TQT606CN98AV6Y4"),
        ];

        let usage_nudge = vec![
            nudge(
                "no-custom-groupings",
                "no custom groupings 10 days into trial",
                UsageCheck::CustomGroupings,
                "CVH37NHQY24JZ1MG9QJJW459PM5J",
            ),
            nudge(
                "no-alerts-or-budgets",
                "no alerts or budgets 10 days into trial",
                UsageCheck::GroupingsAlertsOrBudgets,
                "65HZBS8YD6M6HTHKH7FE165XD52J",
            ),
        ];

        Self {
            version: 1,
            active_trial: BTreeMap::from([(PackageType::Navigator, active_trial)]),
            inactive_tenant: BTreeMap::from([(PackageType::Navigator, inactive_tenant)]),
            usage_nudge: BTreeMap::from([(PackageType::Navigator, usage_nudge)]),
        }
    }
}

fn windowed(
    description: &str,
    reference: Reference,
    day_offset: i64,
    max_age_days: i64,
    template: &str,
) -> NotificationDefinition {
    NotificationDefinition {
        id: None,
        description: description.to_string(),
        reference,
        day_offset,
        max_age_days,
        template: TemplateId::new(template),
        overrides: TemplateOverrides::default(),
        usage_check: None,
    }
}

fn nudge(id: &str, description: &str, check: UsageCheck, template: &str) -> NotificationDefinition {
    NotificationDefinition {
        id: Some(id.to_string()),
        usage_check: Some(check),
        ..windowed(description, Reference::Start, 10, -1, template)
    }
}
