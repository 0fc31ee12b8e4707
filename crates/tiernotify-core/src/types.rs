//! Domain types: tenants, package enrollments, trial windows, bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::TierNotifyError;

/// Opaque tenant (customer) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery template identifier understood by the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Product package a tenant can enroll in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    Navigator,
    Solve,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Navigator => "navigator",
            PackageType::Solve => "solve",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = TierNotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "navigator" => Ok(PackageType::Navigator),
            "solve" => Ok(PackageType::Solve),
            other => Err(TierNotifyError::InvalidData(format!(
                "unknown package type '{other}'"
            ))),
        }
    }
}

/// Commercial tier a tenant segment is enumerated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierName {
    /// Time-bounded paid-tier trial.
    Trial,
    /// Tier with no entitlements; procurement-only tenants live here.
    ZeroEntitlements,
    /// Family of legacy resold tiers, enumerated as one segment.
    HeritageResold,
    /// Presentation (demo) tier, watched for inactivity.
    Presentation,
}

impl TierName {
    pub const ALL: [TierName; 4] = [
        TierName::Trial,
        TierName::ZeroEntitlements,
        TierName::HeritageResold,
        TierName::Presentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierName::Trial => "trial",
            TierName::ZeroEntitlements => "zero-entitlements",
            TierName::HeritageResold => "heritage-resold",
            TierName::Presentation => "presentation",
        }
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierName {
    type Err = TierNotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TierName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TierNotifyError::InvalidData(format!("unknown tier name '{s}'")))
    }
}

/// Start/end dates bounding a lifecycle window. Either side may be absent;
/// definitions referencing a missing side are never relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrialWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TrialWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Open-ended window anchored at `start` (inactive-tenant windows).
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// True once the window end lies strictly before `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end.is_some_and(|end| end < now)
    }
}

/// One tenant's participation in one package's trial/tier lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub package: PackageType,
    pub tier: TierName,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub trial_canceled: Option<DateTime<Utc>>,
}

impl Enrollment {
    /// Active-trial eligible: canceled, or both start and end are set.
    pub fn is_trial_eligible(&self) -> bool {
        self.trial_canceled.is_some() || (self.trial_start.is_some() && self.trial_end.is_some())
    }

    /// Window used for active-trial notifications. A cancellation date
    /// replaces the scheduled end.
    pub fn effective_window(&self) -> Result<TrialWindow, TierNotifyError> {
        if !self.is_trial_eligible() {
            return Err(TierNotifyError::InvalidData(format!(
                "{} enrollment has start={:?} end={:?} and no cancellation",
                self.package, self.trial_start, self.trial_end
            )));
        }
        Ok(TrialWindow {
            start: self.trial_start,
            end: self.trial_canceled.or(self.trial_end),
        })
    }

    /// The scheduled trial window, ignoring any cancellation.
    pub fn scheduled_window(&self) -> TrialWindow {
        TrialWindow {
            start: self.trial_start,
            end: self.trial_end,
        }
    }

    /// Whole days between the scheduled start and end, when both are known.
    pub fn trial_period_days(&self) -> Option<i64> {
        match (self.trial_start, self.trial_end) {
            (Some(start), Some(end)) => Some((end - start).num_days()),
            _ => None,
        }
    }
}

/// A tenant as returned by segment enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    pub enrollments: Vec<Enrollment>,
}

/// An administrative user of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub first_name: String,
}

/// A member of the tenant's assigned account team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub email: String,
    pub role: String,
}

/// Contract dates used when the enrollment lacks a full trial window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerm {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ContractTerm {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Per-tenant idempotency record. Absence is equivalent to `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bookkeeping {
    /// Most recent windowed (active-trial / inactive-tenant) send per package.
    #[serde(default)]
    pub last_sent: BTreeMap<PackageType, DateTime<Utc>>,
    /// Usage-nudge ids already sent per package.
    #[serde(default)]
    pub usage_sent: BTreeMap<PackageType, BTreeSet<String>>,
}

impl Bookkeeping {
    pub fn last_sent_for(&self, package: PackageType) -> Option<DateTime<Utc>> {
        self.last_sent.get(&package).copied()
    }

    pub fn record_windowed_send(&mut self, package: PackageType, at: DateTime<Utc>) {
        self.last_sent.insert(package, at);
    }

    pub fn usage_already_sent(&self, package: PackageType, id: &str) -> bool {
        self.usage_sent
            .get(&package)
            .is_some_and(|ids| ids.contains(id))
    }

    pub fn record_usage_send(&mut self, package: PackageType, id: &str) {
        self.usage_sent
            .entry(package)
            .or_default()
            .insert(id.to_string());
    }
}
