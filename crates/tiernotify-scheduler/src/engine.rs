//! Notification engine: enumerates tenant segments, evaluates each tenant
//! through the bounded pool, and drives selection, dispatch, and bookkeeping.
//!
//! Per tenant: `Loaded → Evaluated → {Sent, Suppressed, Skipped}`. A tenant
//! with at least one successful send gets exactly one bookkeeping write.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tiernotify_core::config::TierNotifyConfig;
use tiernotify_core::traits::{
    ActivationSource, AssetInventory, BookkeepingStore, ContractSource, DeliveryChannel,
    EnrollmentSource, RecipientSource, UsageSignals,
};
use tiernotify_core::types::{
    Bookkeeping, Enrollment, PackageType, TemplateId, TenantId, TenantRecord, TierName,
    TrialWindow, User,
};
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, Category, NotificationDefinition};
use crate::deadline::bounded;
use crate::dispatch::{Dispatcher, SendContext};
use crate::persistence::{RetryPolicy, StatePersister};
use crate::pool::{PoolOutcome, TenantPool};
use crate::recipients::{RecipientAssembler, RecipientSet};
use crate::selector::{is_relevant, relevant_candidates};
use crate::template::TemplateResolver;

/// Segments enumerated for the active-trial population, in order.
pub const ACTIVE_TRIAL_SEGMENTS: [TierName; 3] = [
    TierName::Trial,
    TierName::ZeroEntitlements,
    TierName::HeritageResold,
];

/// Segment watched for inactivity.
pub const INACTIVE_SEGMENT: TierName = TierName::Presentation;

/// Every external capability the engine consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub enrollments: Arc<dyn EnrollmentSource>,
    pub bookkeeping: Arc<dyn BookkeepingStore>,
    pub recipients: Arc<dyn RecipientSource>,
    pub usage: Arc<dyn UsageSignals>,
    pub assets: Arc<dyn AssetInventory>,
    pub activations: Arc<dyn ActivationSource>,
    pub contracts: Arc<dyn ContractSource>,
    pub delivery: Arc<dyn DeliveryChannel>,
}

/// Engine knobs, usually derived from `TierNotifyConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_tenants: usize,
    pub io_timeout: Duration,
    pub retry: RetryPolicy,
    pub default_trial_period_days: i64,
    pub date_format: String,
    pub internal_address: String,
    pub account_team_role: String,
    pub recognized_asset_types: Vec<String>,
}

impl EngineSettings {
    pub fn from_config(config: &TierNotifyConfig) -> Self {
        let scheduler = &config.scheduler;
        Self {
            max_concurrent_tenants: scheduler.max_concurrent_tenants,
            io_timeout: Duration::from_secs(scheduler.io_timeout_secs),
            retry: RetryPolicy {
                attempts: scheduler.persist_attempts,
                delay: Duration::from_millis(scheduler.persist_delay_ms),
            },
            default_trial_period_days: scheduler.default_trial_period_days,
            date_format: scheduler.date_format.clone(),
            internal_address: config.recipients.internal_address.clone(),
            account_team_role: config.recipients.account_team_role.clone(),
            recognized_asset_types: config.templates.recognized_asset_types.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&TierNotifyConfig::default())
    }
}

/// Terminal state of one tenant in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    Sent,
    Suppressed,
    Skipped,
}

/// Per-tenant result.
#[derive(Debug, Clone, Serialize)]
pub struct TenantReport {
    pub tenant: TenantId,
    pub state: TenantState,
    /// Labels of the notifications delivered to at least one recipient.
    pub notifications: Vec<String>,
    pub superseded: usize,
    pub persist_failed: bool,
    /// The bookkeeping value as updated in memory by this run.
    pub bookkeeping: Option<Bookkeeping>,
}

impl TenantReport {
    fn skipped(tenant: &TenantId) -> Self {
        Self {
            tenant: tenant.clone(),
            state: TenantState::Skipped,
            notifications: Vec::new(),
            superseded: 0,
            persist_failed: false,
            bookkeeping: None,
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub sent: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub failed_persists: usize,
    pub superseded: usize,
    pub notifications_sent: usize,
    /// Tenants never started because the run was canceled.
    pub canceled: usize,
    /// Segments whose tenant listing failed.
    pub failed_segments: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<TenantReport>,
}

impl RunReport {
    fn record(&mut self, tenant: TenantReport) {
        match tenant.state {
            TenantState::Sent => self.sent += 1,
            TenantState::Suppressed => self.suppressed += 1,
            TenantState::Skipped => self.skipped += 1,
        }
        self.notifications_sent += tenant.notifications.len();
        self.superseded += tenant.superseded;
        if tenant.persist_failed {
            self.failed_persists += 1;
        }
        self.tenants.push(tenant);
    }

    fn absorb(&mut self, outcome: PoolOutcome<TenantReport>) {
        for tenant in outcome.completed {
            self.record(tenant);
        }
        self.canceled += outcome.not_started;
        self.skipped += outcome.panicked;
    }

    pub fn tenant(&self, id: &str) -> Option<&TenantReport> {
        self.tenants.iter().find(|t| t.tenant.as_str() == id)
    }
}

/// A tenant scheduled for evaluation under one segment tier.
#[derive(Debug, Clone)]
struct TenantJob {
    tenant: TenantRecord,
    tier: TierName,
}

struct EngineInner {
    catalog: Arc<Catalog>,
    collab: Collaborators,
    settings: EngineSettings,
    resolver: TemplateResolver,
    assembler: RecipientAssembler,
    pool: TenantPool,
}

/// The lifecycle notification engine.
#[derive(Clone)]
pub struct NotificationEngine {
    inner: Arc<EngineInner>,
}

impl NotificationEngine {
    pub fn new(catalog: Arc<Catalog>, collab: Collaborators, settings: EngineSettings) -> Self {
        let resolver = TemplateResolver::new(settings.recognized_asset_types.iter().cloned());
        let assembler = RecipientAssembler::new(
            settings.internal_address.clone(),
            settings.account_team_role.clone(),
        );
        let pool = TenantPool::new(settings.max_concurrent_tenants);
        Self {
            inner: Arc::new(EngineInner {
                catalog,
                collab,
                settings,
                resolver,
                assembler,
                pool,
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// One full run at the current time.
    pub async fn run(&self, dry_run: bool, cancel: &CancellationToken) -> RunReport {
        self.run_at(dry_run, cancel, Utc::now()).await
    }

    /// One full run evaluated as of `now`: inactive tenants first, then the
    /// active-trial population. A segment that cannot be listed is counted
    /// in `failed_segments` and the remaining segments still run.
    pub async fn run_at(
        &self,
        dry_run: bool,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> RunReport {
        let inner = &self.inner;
        tracing::info!(
            dry_run,
            catalog_version = inner.catalog.version,
            catalog_definitions = inner.catalog.len(),
            max_concurrent = inner.pool.max_concurrent(),
            "notification run starting"
        );

        let run = Arc::new(TenantRun {
            engine: inner.clone(),
            dispatcher: Dispatcher::new(
                inner.collab.delivery.clone(),
                dry_run,
                inner.settings.io_timeout,
            ),
            persister: StatePersister::new(
                inner.collab.bookkeeping.clone(),
                inner.settings.retry,
                inner.settings.io_timeout,
            ),
            now,
            dry_run,
        });
        let mut report = RunReport {
            dry_run,
            ..RunReport::default()
        };

        if inner.catalog.inactive_packages().next().is_some() {
            let jobs = self.enumerate(&[INACTIVE_SEGMENT], &mut report).await;
            tracing::info!(tenants = jobs.len(), "evaluating inactive tenants");
            let outcome = inner
                .pool
                .run_all(jobs, cancel, |job| {
                    let run = run.clone();
                    async move { run.inactive_tenant(job).await }
                })
                .await;
            report.absorb(outcome);
        }

        if cancel.is_cancelled() {
            tracing::warn!("run canceled before active-trial evaluation");
        } else {
            let jobs = self.enumerate(&ACTIVE_TRIAL_SEGMENTS, &mut report).await;
            let (jobs, ineligible): (Vec<_>, Vec<_>) =
                jobs.into_iter().partition(|job| self.has_trial_work(&job.tenant));
            for job in &ineligible {
                report.record(TenantReport::skipped(&job.tenant.id));
            }
            tracing::info!(
                tenants = jobs.len(),
                ineligible = ineligible.len(),
                "evaluating active-trial tenants"
            );
            let outcome = inner
                .pool
                .run_all(jobs, cancel, |job| {
                    let run = run.clone();
                    async move { run.active_trial_tenant(job).await }
                })
                .await;
            report.absorb(outcome);
        }

        tracing::info!(
            dry_run,
            sent = report.sent,
            suppressed = report.suppressed,
            skipped = report.skipped,
            notifications = report.notifications_sent,
            superseded = report.superseded,
            failed_persists = report.failed_persists,
            canceled = report.canceled,
            failed_segments = report.failed_segments,
            "notification run finished"
        );
        report
    }

    /// List tenants across segments; a tenant seen twice keeps its first tier.
    async fn enumerate(&self, tiers: &[TierName], report: &mut RunReport) -> Vec<TenantJob> {
        let inner = &self.inner;
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for &tier in tiers {
            let listed = bounded(
                "segment enumeration",
                inner.settings.io_timeout,
                inner.collab.enrollments.list_tenants_in_segment(tier),
            )
            .await;
            let tenants = match listed {
                Ok(tenants) => tenants,
                Err(e) => {
                    tracing::error!(tier = %tier, error = %e, "segment enumeration failed, continuing");
                    report.failed_segments += 1;
                    continue;
                }
            };
            tracing::debug!(tier = %tier, tenants = tenants.len(), "segment enumerated");
            for tenant in tenants {
                if seen.insert(tenant.id.clone()) {
                    jobs.push(TenantJob { tenant, tier });
                } else {
                    tracing::debug!(tenant = %tenant.id, tier = %tier, "tenant already enumerated");
                }
            }
        }
        jobs
    }

    /// Pre-filter without I/O: at least one eligible enrollment in a package
    /// the catalog covers.
    fn has_trial_work(&self, tenant: &TenantRecord) -> bool {
        let catalog = &self.inner.catalog;
        let mut found = false;
        for enrollment in &tenant.enrollments {
            if !catalog.covers_trial_package(enrollment.package) {
                continue;
            }
            if enrollment.is_trial_eligible() {
                found = true;
            } else if enrollment.trial_start.is_some() != enrollment.trial_end.is_some() {
                tracing::warn!(
                    tenant = %tenant.id,
                    package = %enrollment.package,
                    start = ?enrollment.trial_start,
                    end = ?enrollment.trial_end,
                    "enrollment has a partial trial window, skipping"
                );
            }
        }
        found
    }
}

/// Shared per-run state handed to every tenant task.
struct TenantRun {
    engine: Arc<EngineInner>,
    dispatcher: Dispatcher,
    persister: StatePersister,
    now: DateTime<Utc>,
    dry_run: bool,
}

/// Mutable per-tenant evaluation state.
struct Evaluation {
    bookkeeping: Bookkeeping,
    recipients: RecipientSet,
    notifications: Vec<String>,
    superseded: usize,
}

impl TenantRun {
    fn io_timeout(&self) -> Duration {
        self.engine.settings.io_timeout
    }

    async fn active_trial_tenant(&self, job: TenantJob) -> TenantReport {
        let tenant = &job.tenant.id;
        let Some((mut eval, _)) = self.load(tenant).await else {
            return TenantReport::skipped(tenant);
        };

        for enrollment in &job.tenant.enrollments {
            if !self.engine.catalog.covers_trial_package(enrollment.package) {
                continue;
            }
            let window = match enrollment.effective_window() {
                Ok(window) => window,
                Err(e) => {
                    tracing::debug!(tenant = %tenant, error = %e, "enrollment not in an active trial");
                    continue;
                }
            };
            self.send_windowed(&job, Category::ActiveTrial, enrollment.package, &window, Some(enrollment), &mut eval)
                .await;

            if window.has_ended(self.now) {
                tracing::debug!(tenant = %tenant, package = %enrollment.package, "trial over, usage nudges not evaluated");
            } else {
                self.send_usage_nudges(&job, enrollment, &mut eval).await;
            }
        }

        self.finish(tenant, eval).await
    }

    async fn inactive_tenant(&self, job: TenantJob) -> TenantReport {
        let tenant = &job.tenant.id;
        let Some((mut eval, admins)) = self.load(tenant).await else {
            return TenantReport::skipped(tenant);
        };

        let activation = bounded(
            "first activation lookup",
            self.io_timeout(),
            self.engine.collab.activations.first_activation(tenant, &admins),
        )
        .await;
        let window = match activation {
            Ok(Some(at)) => TrialWindow::starting_at(at),
            Ok(None) => {
                tracing::debug!(tenant = %tenant, "no recorded activation");
                return self.finish(tenant, eval).await;
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "activation lookup failed, skipping tenant");
                return TenantReport::skipped(tenant);
            }
        };

        let packages: Vec<PackageType> = self.engine.catalog.inactive_packages().collect();
        for package in packages {
            self.send_windowed(&job, Category::InactiveTenant, package, &window, None, &mut eval)
                .await;
        }

        self.finish(tenant, eval).await
    }

    /// Read bookkeeping and admins. `None` means the tenant is skipped.
    async fn load(&self, tenant: &TenantId) -> Option<(Evaluation, Vec<User>)> {
        let collab = &self.engine.collab;

        let bookkeeping = match bounded("bookkeeping read", self.io_timeout(), collab.bookkeeping.get(tenant)).await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "bookkeeping read failed, skipping tenant");
                return None;
            }
        };

        let admins = match bounded("admin lookup", self.io_timeout(), collab.recipients.get_admin_users(tenant)).await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "admin lookup failed, skipping tenant");
                return None;
            }
        };
        if admins.is_empty() {
            tracing::info!(tenant = %tenant, "no admin recipients, skipping tenant");
            return None;
        }

        let eval = Evaluation {
            bookkeeping,
            recipients: RecipientSet::from_admins(admins.clone()),
            notifications: Vec::new(),
            superseded: 0,
        };
        Some((eval, admins))
    }

    /// Select and send at most one windowed notification for a package.
    async fn send_windowed(
        &self,
        job: &TenantJob,
        category: Category,
        package: PackageType,
        window: &TrialWindow,
        enrollment: Option<&Enrollment>,
        eval: &mut Evaluation,
    ) {
        let tenant = &job.tenant.id;
        let candidates = self.engine.catalog.definitions(category, package);
        let last_sent = eval.bookkeeping.last_sent_for(package);
        let relevant = relevant_candidates(window, candidates, self.now, last_sent);
        let Some((&chosen, superseded)) = relevant.split_last() else {
            return;
        };
        let definition = &candidates[chosen];

        for &idx in superseded {
            tracing::info!(
                tenant = %tenant,
                package = %package,
                category = %category,
                notification = candidates[idx].label(),
                superseded_by = definition.label(),
                "relevant notification superseded"
            );
        }
        eval.superseded += superseded.len();

        let data = match enrollment {
            Some(enrollment) => self.active_trial_data(tenant, enrollment, window).await,
            None => Map::new(),
        };
        if self.deliver(job, definition, data, eval).await {
            eval.bookkeeping.record_windowed_send(package, self.now);
        }
    }

    async fn send_usage_nudges(&self, job: &TenantJob, enrollment: &Enrollment, eval: &mut Evaluation) {
        let tenant = &job.tenant.id;
        let package = enrollment.package;
        let window = enrollment.scheduled_window();

        for definition in self.engine.catalog.definitions(Category::UsageNudge, package) {
            let (Some(id), Some(check)) = (definition.id.as_deref(), definition.usage_check) else {
                continue;
            };
            if eval.bookkeeping.usage_already_sent(package, id) {
                continue;
            }
            if !is_relevant(definition, &window, self.now, None) {
                continue;
            }

            let usage = bounded(
                "usage check",
                self.io_timeout(),
                check.has_usage(self.engine.collab.usage.as_ref(), tenant),
            )
            .await;
            match usage {
                Ok(false) => {}
                Ok(true) => {
                    tracing::debug!(tenant = %tenant, package = %package, notification = id, "feature in use, nudge suppressed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        tenant = %tenant,
                        package = %package,
                        notification = id,
                        error = %e,
                        "usage lookup failed, nudge suppressed"
                    );
                    continue;
                }
            }

            if self.deliver(job, definition, Map::new(), eval).await {
                eval.bookkeeping.record_usage_send(package, id);
            }
        }
    }

    /// Resolve the template, extend recipients once, and send. True when at
    /// least one recipient was reached.
    async fn deliver(
        &self,
        job: &TenantJob,
        definition: &NotificationDefinition,
        data: Map<String, Value>,
        eval: &mut Evaluation,
    ) -> bool {
        let tenant = &job.tenant.id;
        let template = self.template_for(tenant, job.tier, definition).await;

        self.engine
            .assembler
            .ensure_extended(
                &mut eval.recipients,
                tenant,
                &job.tenant.name,
                self.engine.collab.recipients.as_ref(),
                self.io_timeout(),
            )
            .await;

        let ctx = SendContext {
            tenant,
            notification: definition.label(),
        };
        let sent = self
            .dispatcher
            .send(ctx, eval.recipients.as_slice(), &template, &data)
            .await;

        if sent == 0 {
            tracing::warn!(
                tenant = %tenant,
                notification = definition.label(),
                template = %template,
                "no recipient reached"
            );
            return false;
        }
        tracing::info!(
            tenant = %tenant,
            tier = %job.tier,
            notification = definition.label(),
            template = %template,
            recipients = sent,
            dry_run = self.dry_run,
            "notification sent"
        );
        eval.notifications.push(definition.label().to_string());
        true
    }

    async fn template_for(
        &self,
        tenant: &TenantId,
        tier: TierName,
        definition: &NotificationDefinition,
    ) -> TemplateId {
        let resolver = &self.engine.resolver;
        let mut holds_asset = false;
        if resolver.needs_assets(tier, definition) {
            match bounded(
                "asset lookup",
                self.io_timeout(),
                self.engine.collab.assets.list_active_assets(tenant),
            )
            .await
            {
                Ok(assets) => holds_asset = resolver.holds_recognized_asset(&assets),
                Err(e) => {
                    tracing::warn!(tenant = %tenant, error = %e, "asset lookup failed, assuming no assets");
                }
            }
        }
        resolver.resolve(tier, definition, holds_asset).clone()
    }

    /// `trialPeriod` and `date` for active-trial templates.
    async fn active_trial_data(
        &self,
        tenant: &TenantId,
        enrollment: &Enrollment,
        window: &TrialWindow,
    ) -> Map<String, Value> {
        let settings = &self.engine.settings;
        let period = match enrollment.trial_period_days() {
            Some(days) => days,
            None => {
                let term = bounded(
                    "contract lookup",
                    self.io_timeout(),
                    self.engine.collab.contracts.contract_term(tenant, enrollment.package),
                )
                .await;
                match term {
                    Ok(Some(term)) => term.days(),
                    Ok(None) => settings.default_trial_period_days,
                    Err(e) => {
                        tracing::warn!(tenant = %tenant, error = %e, "contract lookup failed, using default trial period");
                        settings.default_trial_period_days
                    }
                }
            }
        };

        let mut data = Map::new();
        data.insert("trialPeriod".into(), Value::from(period));
        if let Some(end) = window.end {
            let mut date = String::new();
            if write!(date, "{}", end.format(&settings.date_format)).is_err() {
                date = end.date_naive().to_string();
            }
            data.insert("date".into(), Value::String(date));
        }
        data
    }

    /// Write bookkeeping once if anything was sent.
    async fn finish(&self, tenant: &TenantId, eval: Evaluation) -> TenantReport {
        if eval.notifications.is_empty() {
            return TenantReport {
                tenant: tenant.clone(),
                state: TenantState::Suppressed,
                notifications: Vec::new(),
                superseded: eval.superseded,
                persist_failed: false,
                bookkeeping: Some(eval.bookkeeping),
            };
        }

        let persist_failed = match self.persister.persist(tenant, &eval.bookkeeping, self.dry_run).await {
            Ok(()) => false,
            Err(e) => {
                tracing::error!(tenant = %tenant, error = %e, "bookkeeping write exhausted retries");
                true
            }
        };

        TenantReport {
            tenant: tenant.clone(),
            state: TenantState::Sent,
            notifications: eval.notifications,
            superseded: eval.superseded,
            persist_failed,
            bookkeeping: Some(eval.bookkeeping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeWorld;
    use chrono::{Duration as Days, TimeZone};
    use std::collections::BTreeMap;
    use tiernotify_core::types::ContractTerm;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            max_concurrent_tenants: 4,
            io_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(1),
            },
            internal_address: "ops@tiernotify.test".into(),
            ..EngineSettings::default()
        }
    }

    fn engine(world: &Arc<FakeWorld>) -> NotificationEngine {
        NotificationEngine::new(Arc::new(Catalog::builtin()), world.collaborators(), settings())
    }

    /// Navigator trial that started `days_in` days ago and lasts `length` days.
    fn trial(tier: TierName, days_in: i64, length: i64) -> Enrollment {
        let start = now() - Days::days(days_in);
        Enrollment {
            package: PackageType::Navigator,
            tier,
            trial_start: Some(start),
            trial_end: Some(start + Days::days(length)),
            trial_canceled: None,
        }
    }

    async fn run(engine: &NotificationEngine, dry_run: bool) -> RunReport {
        engine
            .run_at(dry_run, &CancellationToken::new(), now())
            .await
    }

    #[tokio::test]
    async fn test_scenario_a_fifteen_days_in_end_to_end() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.add_team_member("acme", "rep@corp.io", "fsr");
        world.set_usage(&TenantId::from("acme"), true, true, true);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.sent, 1);
        assert_eq!(report.notifications_sent, 1);

        let sent = world.sent();
        let addresses: Vec<&str> = sent.iter().map(|m| m.address.as_str()).collect();
        assert_eq!(addresses, vec!["ada@acme.io", "ops@tiernotify.test", "rep@corp.io"]);
        assert!(sent.iter().all(|m| m.template == TemplateId::new("68GSY7R65DM8QCNTT4WZJB17VZ9X")));
        assert_eq!(sent[0].data["name"], "ada");
        assert_eq!(sent[1].data["name"], "acme Inc");
        assert_eq!(sent[0].data["trialPeriod"], 35);
        assert_eq!(sent[0].data["date"], "Jul 5, 2026");

        let stored = world.stored("acme").unwrap();
        assert_eq!(stored.last_sent_for(PackageType::Navigator), Some(now()));
        assert_eq!(world.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_rerun_same_day_sends_nothing() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.set_usage(&TenantId::from("acme"), true, true, true);
        let engine = engine(&world);

        run(&engine, false).await;
        let before = world.send_calls();
        let second = run(&engine, false).await;
        assert_eq!(second.suppressed, 1);
        assert_eq!(world.send_calls(), before);
        assert_eq!(world.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_scenario_d_procurement_template_end_to_end() {
        let world = FakeWorld::shared();
        world.add_tenant(
            TierName::ZeroEntitlements,
            "procure",
            vec![trial(TierName::ZeroEntitlements, 30, 30)],
            &["pat@procure.io"],
        );
        world.set_assets("procure", &["google-cloud"]);

        run(&engine(&world), false).await;
        let sent = world.sent();
        assert!(!sent.is_empty());
        assert_eq!(sent[0].template, TemplateId::new("DHQ818AJDX4959K1MC23D7F88DW8"));
        assert_eq!(world.asset_calls(), 1);
    }

    #[tokio::test]
    async fn test_asset_failure_falls_back_to_tier_template() {
        let world = FakeWorld::shared();
        world.add_tenant(
            TierName::ZeroEntitlements,
            "procure",
            vec![trial(TierName::ZeroEntitlements, 30, 30)],
            &["pat@procure.io"],
        );
        world.set_assets("procure", &["google-cloud"]);
        world.fail_assets(true);

        run(&engine(&world), false).await;
        assert_eq!(world.sent()[0].template, TemplateId::new("P7XP17TZ294E03JE208CBGHCPBMK"));
    }

    #[tokio::test]
    async fn test_scenario_e_dry_run_matches_live_bookkeeping() {
        let seed = |world: &FakeWorld| {
            world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
            world.add_tenant(TierName::Trial, "zen", vec![trial(TierName::Trial, 28, 35)], &["zed@zen.io"]);
        };
        let dry = FakeWorld::shared();
        let live = FakeWorld::shared();
        seed(&dry);
        seed(&live);

        let dry_report = run(&engine(&dry), true).await;
        let live_report = run(&engine(&live), false).await;

        assert_eq!(dry.send_calls(), 0);
        assert_eq!(dry.set_calls(), 0);
        assert!(live.send_calls() > 0);
        assert!(dry_report.dry_run);

        for tenant in ["acme", "zen"] {
            let dry_bk = dry_report.tenant(tenant).unwrap().bookkeeping.clone();
            let live_bk = live_report.tenant(tenant).unwrap().bookkeeping.clone();
            assert!(dry_bk.is_some());
            assert_eq!(dry_bk, live_bk);
            assert_eq!(live.stored(tenant), live_bk);
        }
        assert_eq!(dry_report.notifications_sent, live_report.notifications_sent);
    }

    #[tokio::test]
    async fn test_usage_nudges_fire_once_without_usage() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 11, 35)], &["ada@acme.io"]);

        let engine = engine(&world);
        let report = run(&engine, false).await;
        assert_eq!(report.notifications_sent, 2);

        let stored = world.stored("acme").unwrap();
        assert!(stored.usage_already_sent(PackageType::Navigator, "no-custom-groupings"));
        assert!(stored.usage_already_sent(PackageType::Navigator, "no-alerts-or-budgets"));
        assert_eq!(stored.last_sent_for(PackageType::Navigator), None);

        let second = run(&engine, false).await;
        assert_eq!(second.notifications_sent, 0);
        assert_eq!(world.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_usage_is_a_hard_gate() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 11, 35)], &["ada@acme.io"]);
        world.set_usage(&TenantId::from("acme"), true, false, false);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.notifications_sent, 0);
        assert_eq!(report.suppressed, 1);
        assert_eq!(world.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_usage_lookup_failure_suppresses_nudge() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 11, 35)], &["ada@acme.io"]);
        world.fail_usage(true);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.suppressed, 1);
        assert_eq!(world.send_calls(), 0);
        assert!(world.stored("acme").is_none());
    }

    #[tokio::test]
    async fn test_usage_not_checked_after_trial_end() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "late", vec![trial(TierName::Trial, 40, 30)], &["lee@late.io"]);

        let report = run(&engine(&world), false).await;
        assert_eq!(world.usage_calls(), 0);
        assert_eq!(report.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_canceled_trial_uses_cancellation_and_contract() {
        let world = FakeWorld::shared();
        let canceled = Enrollment {
            package: PackageType::Navigator,
            tier: TierName::Trial,
            trial_start: None,
            trial_end: None,
            trial_canceled: Some(now() - Days::days(1)),
        };
        world.add_tenant(TierName::Trial, "quit", vec![canceled], &["q@quit.io"]);
        world.set_contract(
            "quit",
            PackageType::Navigator,
            ContractTerm {
                start: now() - Days::days(30),
                end: now() + Days::days(30),
            },
        );

        let report = run(&engine(&world), false).await;
        assert_eq!(report.notifications_sent, 1);
        let sent = world.sent();
        assert_eq!(sent[0].template, TemplateId::new("P7XP17TZ294E03JE208CBGHCPBMK"));
        assert_eq!(sent[0].data["trialPeriod"], 60);
        assert_eq!(sent[0].data["date"], "Jun 14, 2026");
    }

    #[tokio::test]
    async fn test_missed_windows_are_superseded() {
        let world = FakeWorld::shared();
        // 15-day mark was yesterday, week-before-end is today.
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 16, 23)], &["ada@acme.io"]);
        world.set_usage(&TenantId::from("acme"), true, true, true);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.superseded, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(world.sent()[0].template, TemplateId::new("R9H11NG1G4MFSYQR24M41HSYV06S"));
    }

    #[tokio::test]
    async fn test_no_admins_skips_without_write() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "empty", vec![trial(TierName::Trial, 15, 35)], &[]);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(world.send_calls(), 0);
        assert_eq!(world.set_calls(), 0);
        assert_eq!(world.team_calls(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failures_skip_tenant() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.fail_admins(true);
        let report = run(&engine(&world), false).await;
        assert_eq!(report.skipped, 1);

        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.fail_bookkeeping_reads(true);
        let report = run(&engine(&world), false).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(world.admin_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_window_skipped_without_io() {
        let world = FakeWorld::shared();
        let mut half = trial(TierName::Trial, 15, 35);
        half.trial_end = None;
        world.add_tenant(TierName::Trial, "half", vec![half], &["h@half.io"]);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(world.admin_calls(), 0);
    }

    #[tokio::test]
    async fn test_one_write_and_one_team_lookup_per_tenant() {
        let world = FakeWorld::shared();
        let mut catalog = Catalog::builtin();
        let navigator = catalog.active_trial[&PackageType::Navigator].clone();
        catalog.active_trial.insert(PackageType::Solve, navigator);

        let mut solve = trial(TierName::Trial, 15, 35);
        solve.package = PackageType::Solve;
        world.add_tenant(
            TierName::Trial,
            "both",
            vec![trial(TierName::Trial, 15, 35), solve],
            &["b@both.io"],
        );
        world.set_usage(&TenantId::from("both"), true, true, true);

        let engine = NotificationEngine::new(Arc::new(catalog), world.collaborators(), settings());
        let report = run(&engine, false).await;

        assert_eq!(report.notifications_sent, 2);
        assert_eq!(world.set_calls(), 1);
        assert_eq!(world.team_calls(), 1);
        let stored = world.stored("both").unwrap();
        assert_eq!(
            stored.last_sent,
            BTreeMap::from([(PackageType::Navigator, now()), (PackageType::Solve, now())])
        );
    }

    #[tokio::test]
    async fn test_persist_failure_is_counted_and_run_continues() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.set_usage(&TenantId::from("acme"), true, true, true);
        world.fail_next_writes(10);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed_persists, 1);
        assert_eq!(world.set_calls(), 2);
        assert!(world.stored("acme").is_none());
    }

    #[tokio::test]
    async fn test_all_recipients_failing_is_not_sent() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.set_usage(&TenantId::from("acme"), true, true, true);
        world.fail_delivery_to("ada@acme.io");
        world.fail_delivery_to("ops@tiernotify.test");

        let report = run(&engine(&world), false).await;
        assert_eq!(report.suppressed, 1);
        assert_eq!(world.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_inactive_tenant_two_weeks() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Presentation, "demo", vec![], &["dee@demo.io"]);
        world.set_activation("demo", now() - Days::days(14));

        let report = run(&engine(&world), false).await;
        assert_eq!(report.sent, 1);
        let sent = world.sent();
        assert_eq!(sent[0].template, TemplateId::new("7V604FX31SMVSEN6H6817530FT6D"));
        assert!(sent[0].data.get("trialPeriod").is_none());
        assert_eq!(
            world.stored("demo").unwrap().last_sent_for(PackageType::Navigator),
            Some(now())
        );
    }

    #[tokio::test]
    async fn test_inactive_without_activation_is_suppressed() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Presentation, "demo", vec![], &["dee@demo.io"]);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.suppressed, 1);
        assert_eq!(world.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_canceled_run_starts_nothing() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Presentation, "demo", vec![], &["dee@demo.io"]);
        world.set_activation("demo", now() - Days::days(14));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine(&world).run_at(false, &cancel, now()).await;
        assert_eq!(report.canceled, 1);
        assert_eq!(world.send_calls(), 0);
        assert_eq!(world.admin_calls(), 0);
    }

    #[tokio::test]
    async fn test_tenant_concurrency_is_bounded() {
        let world = FakeWorld::shared();
        for i in 0..12 {
            world.add_tenant(
                TierName::Trial,
                &format!("t{i}"),
                vec![trial(TierName::Trial, 15, 35)],
                &["a@t.io"],
            );
        }
        world.delay_admin_lookups(Duration::from_millis(10));

        let engine = NotificationEngine::new(
            Arc::new(Catalog::builtin()),
            world.collaborators(),
            EngineSettings {
                max_concurrent_tenants: 3,
                ..settings()
            },
        );
        let report = run(&engine, true).await;
        assert_eq!(report.sent, 12);
        assert!(world.max_in_flight() <= 3);
        assert!(world.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_failed_inactive_segment_still_runs_active_trials() {
        let world = FakeWorld::shared();
        world.fail_segment(TierName::Presentation);
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        world.set_usage(&TenantId::from("acme"), true, true, true);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.failed_segments, 1);
        assert_eq!(report.sent, 1);
        assert!(world.stored("acme").is_some());
    }

    #[tokio::test]
    async fn test_failed_active_segment_keeps_other_segments() {
        let world = FakeWorld::shared();
        world.fail_segment(TierName::ZeroEntitlements);
        world.add_tenant(TierName::Presentation, "demo", vec![], &["dee@demo.io"]);
        world.set_activation("demo", now() - Days::days(14));
        world.add_tenant(TierName::HeritageResold, "old", vec![trial(TierName::HeritageResold, 15, 35)], &["al@old.io"]);
        world.set_usage(&TenantId::from("old"), true, true, true);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.failed_segments, 1);
        assert_eq!(report.tenant("demo").unwrap().state, TenantState::Sent);
        assert_eq!(report.tenant("old").unwrap().state, TenantState::Sent);
    }

    #[tokio::test]
    async fn test_tenant_in_two_segments_keeps_first_tier() {
        let world = FakeWorld::shared();
        let enrollment = trial(TierName::Trial, 35, 35);
        world.add_tenant(TierName::Trial, "acme", vec![enrollment.clone()], &["ada@acme.io"]);
        world.add_tenant(TierName::ZeroEntitlements, "acme", vec![enrollment], &["ada@acme.io"]);
        world.set_assets("acme", &["google-cloud"]);
        world.set_usage(&TenantId::from("acme"), true, true, true);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.sent, 1);
        assert_eq!(report.tenants.len(), 1);

        let sent = world.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.template == TemplateId::new("P7XP17TZ294E03JE208CBGHCPBMK")));
        assert_eq!(world.asset_calls(), 0);
        assert_eq!(world.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_stored_bookkeeping_blocks_resend() {
        let world = FakeWorld::shared();
        world.add_tenant(TierName::Trial, "acme", vec![trial(TierName::Trial, 15, 35)], &["ada@acme.io"]);
        let mut record = Bookkeeping::default();
        record.record_windowed_send(PackageType::Navigator, now());
        record.record_usage_send(PackageType::Navigator, "no-custom-groupings");
        record.record_usage_send(PackageType::Navigator, "no-alerts-or-budgets");
        world.put_bookkeeping("acme", record);

        let report = run(&engine(&world), false).await;
        assert_eq!(report.suppressed, 1);
        assert_eq!(world.send_calls(), 0);
        assert_eq!(world.usage_calls(), 0);
        assert_eq!(world.set_calls(), 0);
    }
}
