//! In-memory collaborators for scheduler tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tiernotify_core::traits::{
    ActivationSource, AssetInventory, BookkeepingStore, ContractSource, DeliveryChannel,
    EnrollmentSource, RecipientSource, UsageSignals,
};
use tiernotify_core::types::{
    Bookkeeping, ContractTerm, Enrollment, PackageType, TeamMember, TemplateId, TenantId,
    TenantRecord, TierName, User,
};
use tiernotify_core::{Result, TierNotifyError};

use crate::engine::Collaborators;

/// One captured delivery.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub address: String,
    pub template: TemplateId,
    pub data: Value,
}

#[derive(Default)]
struct State {
    segments: HashMap<TierName, Vec<TenantRecord>>,
    bookkeeping: HashMap<TenantId, Bookkeeping>,
    admins: HashMap<TenantId, Vec<User>>,
    team: HashMap<TenantId, Vec<TeamMember>>,
    usage: HashMap<TenantId, (bool, bool, bool)>,
    assets: HashMap<TenantId, Vec<String>>,
    activations: HashMap<TenantId, DateTime<Utc>>,
    contracts: HashMap<(TenantId, PackageType), ContractTerm>,
    sent: Vec<SentMessage>,
    failing_addresses: HashSet<String>,
    failing_segments: HashSet<TierName>,
}

/// Every collaborator backed by one shared in-memory world.
#[derive(Default)]
pub struct FakeWorld {
    state: Mutex<State>,
    fail_usage: Mutex<bool>,
    fail_bookkeeping_reads: Mutex<bool>,
    fail_admins: Mutex<bool>,
    fail_team: Mutex<bool>,
    fail_assets: Mutex<bool>,
    failing_writes: AtomicUsize,
    admin_delay: Mutex<Option<Duration>>,
    usage_calls: AtomicUsize,
    send_calls: AtomicUsize,
    set_calls: AtomicUsize,
    team_calls: AtomicUsize,
    asset_calls: AtomicUsize,
    admin_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            enrollments: self.clone(),
            bookkeeping: self.clone(),
            recipients: self.clone(),
            usage: self.clone(),
            assets: self.clone(),
            activations: self.clone(),
            contracts: self.clone(),
            delivery: self.clone(),
        }
    }

    // ── seeding ──────────────────────────────────────────

    /// Add a tenant to a segment with the given admins.
    pub fn add_tenant(&self, tier: TierName, id: &str, enrollments: Vec<Enrollment>, admins: &[&str]) {
        let tenant = TenantId::from(id);
        let mut state = self.state.lock().unwrap();
        state.segments.entry(tier).or_default().push(TenantRecord {
            id: tenant.clone(),
            name: format!("{id} Inc"),
            enrollments,
        });
        state.admins.insert(
            tenant,
            admins
                .iter()
                .map(|email| User {
                    email: email.to_string(),
                    first_name: email.split('@').next().unwrap_or_default().to_string(),
                })
                .collect(),
        );
    }

    pub fn add_team_member(&self, tenant: &str, email: &str, role: &str) {
        self.state
            .lock()
            .unwrap()
            .team
            .entry(TenantId::from(tenant))
            .or_default()
            .push(TeamMember {
                email: email.to_string(),
                role: role.to_string(),
            });
    }

    pub fn set_usage(&self, tenant: &TenantId, groupings: bool, alerts: bool, budgets: bool) {
        self.state
            .lock()
            .unwrap()
            .usage
            .insert(tenant.clone(), (groupings, alerts, budgets));
    }

    pub fn set_assets(&self, tenant: &str, assets: &[&str]) {
        self.state.lock().unwrap().assets.insert(
            TenantId::from(tenant),
            assets.iter().map(|a| a.to_string()).collect(),
        );
    }

    pub fn set_activation(&self, tenant: &str, at: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .activations
            .insert(TenantId::from(tenant), at);
    }

    pub fn set_contract(&self, tenant: &str, package: PackageType, term: ContractTerm) {
        self.state
            .lock()
            .unwrap()
            .contracts
            .insert((TenantId::from(tenant), package), term);
    }

    pub fn put_bookkeeping(&self, tenant: &str, record: Bookkeeping) {
        self.state
            .lock()
            .unwrap()
            .bookkeeping
            .insert(TenantId::from(tenant), record);
    }

    // ── failure injection ────────────────────────────────

    pub fn fail_segment(&self, tier: TierName) {
        self.state.lock().unwrap().failing_segments.insert(tier);
    }

    pub fn fail_usage(&self, fail: bool) {
        *self.fail_usage.lock().unwrap() = fail;
    }

    pub fn fail_bookkeeping_reads(&self, fail: bool) {
        *self.fail_bookkeeping_reads.lock().unwrap() = fail;
    }

    pub fn fail_admins(&self, fail: bool) {
        *self.fail_admins.lock().unwrap() = fail;
    }

    pub fn fail_team(&self, fail: bool) {
        *self.fail_team.lock().unwrap() = fail;
    }

    pub fn fail_assets(&self, fail: bool) {
        *self.fail_assets.lock().unwrap() = fail;
    }

    /// The next `n` bookkeeping writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_delivery_to(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_addresses
            .insert(address.to_string());
    }

    pub fn delay_admin_lookups(&self, delay: Duration) {
        *self.admin_delay.lock().unwrap() = Some(delay);
    }

    // ── inspection ───────────────────────────────────────

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn stored(&self, tenant: &str) -> Option<Bookkeeping> {
        self.state
            .lock()
            .unwrap()
            .bookkeeping
            .get(&TenantId::from(tenant))
            .cloned()
    }

    pub fn usage_calls(&self) -> usize {
        self.usage_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn team_calls(&self) -> usize {
        self.team_calls.load(Ordering::SeqCst)
    }

    pub fn asset_calls(&self) -> usize {
        self.asset_calls.load(Ordering::SeqCst)
    }

    pub fn admin_calls(&self) -> usize {
        self.admin_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn usage_signal(&self, tenant: &TenantId, pick: fn(&(bool, bool, bool)) -> bool) -> Result<bool> {
        self.usage_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_usage.lock().unwrap() {
            return Err(TierNotifyError::lookup("usage signals unavailable"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .usage
            .get(tenant)
            .is_some_and(pick))
    }
}

#[async_trait]
impl EnrollmentSource for FakeWorld {
    async fn list_tenants_in_segment(&self, tier: TierName) -> Result<Vec<TenantRecord>> {
        let state = self.state.lock().unwrap();
        if state.failing_segments.contains(&tier) {
            return Err(TierNotifyError::lookup(format!("{tier} segment unavailable")));
        }
        Ok(state.segments.get(&tier).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl BookkeepingStore for FakeWorld {
    async fn get(&self, tenant: &TenantId) -> Result<Option<Bookkeeping>> {
        if *self.fail_bookkeeping_reads.lock().unwrap() {
            return Err(TierNotifyError::store("bookkeeping read failed"));
        }
        Ok(self.state.lock().unwrap().bookkeeping.get(tenant).cloned())
    }

    async fn set(&self, tenant: &TenantId, record: &Bookkeeping) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TierNotifyError::store("write conflict"));
        }
        self.state
            .lock()
            .unwrap()
            .bookkeeping
            .insert(tenant.clone(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl RecipientSource for FakeWorld {
    async fn get_admin_users(&self, tenant: &TenantId) -> Result<Vec<User>> {
        self.admin_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.admin_delay.lock().unwrap();
        if let Some(delay) = delay {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if *self.fail_admins.lock().unwrap() {
            return Err(TierNotifyError::lookup("directory unavailable"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .admins
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_account_team(&self, tenant: &TenantId) -> Result<Vec<TeamMember>> {
        self.team_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_team.lock().unwrap() {
            return Err(TierNotifyError::lookup("roster unavailable"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .team
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl UsageSignals for FakeWorld {
    async fn has_custom_groupings(&self, tenant: &TenantId) -> Result<bool> {
        self.usage_signal(tenant, |s| s.0)
    }

    async fn has_alerts(&self, tenant: &TenantId) -> Result<bool> {
        self.usage_signal(tenant, |s| s.1)
    }

    async fn has_budgets(&self, tenant: &TenantId) -> Result<bool> {
        self.usage_signal(tenant, |s| s.2)
    }
}

#[async_trait]
impl AssetInventory for FakeWorld {
    async fn list_active_assets(&self, tenant: &TenantId) -> Result<Vec<String>> {
        self.asset_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_assets.lock().unwrap() {
            return Err(TierNotifyError::lookup("asset inventory unavailable"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .assets
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ActivationSource for FakeWorld {
    async fn first_activation(&self, tenant: &TenantId, _users: &[User]) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().unwrap().activations.get(tenant).copied())
    }
}

#[async_trait]
impl ContractSource for FakeWorld {
    async fn contract_term(&self, tenant: &TenantId, package: PackageType) -> Result<Option<ContractTerm>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .contracts
            .get(&(tenant.clone(), package))
            .copied())
    }
}

#[async_trait]
impl DeliveryChannel for FakeWorld {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send_templated(&self, address: &str, template: &TemplateId, data: &Value) -> Result<()> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.failing_addresses.contains(address) {
            return Err(TierNotifyError::delivery(format!("mailbox {address} rejected")));
        }
        state.sent.push(SentMessage {
            address: address.to_string(),
            template: template.clone(),
            data: data.clone(),
        });
        Ok(())
    }
}
