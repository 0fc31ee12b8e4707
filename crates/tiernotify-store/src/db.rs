//! Record database: SQLite schema and collaborator implementations.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tiernotify_core::traits::{
    ActivationSource, AssetInventory, BookkeepingStore, ContractSource, EnrollmentSource,
    RecipientSource, UsageSignals,
};
use tiernotify_core::types::{
    Bookkeeping, ContractTerm, Enrollment, PackageType, TeamMember, TenantId, TenantRecord,
    TierName, User,
};
use tiernotify_core::{Result, TierNotifyError};

/// SQLite record store.
pub struct RecordDb {
    conn: Mutex<Connection>,
    admin_roles: Vec<String>,
}

fn db_err(e: rusqlite::Error) -> TierNotifyError {
    TierNotifyError::store(e.to_string())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| TierNotifyError::store(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|v| v.to_rfc3339())
}

/// Raw enrollment row before package/tier validation.
struct EnrollmentRow {
    package: String,
    tier: String,
    trial_start: Option<String>,
    trial_end: Option<String>,
    trial_canceled: Option<String>,
}

impl RecordDb {
    /// Open or create the record database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err)?;
        Self::init(conn)
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
            admin_roles: vec!["admin".into()],
        };
        db.migrate()?;
        Ok(db)
    }

    /// Roles treated as tenant admins.
    pub fn with_admin_roles(mut self, roles: Vec<String>) -> Self {
        self.admin_roles = roles;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TierNotifyError::store(format!("connection lock poisoned: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            -- One row per (tenant, package)
            CREATE TABLE IF NOT EXISTS enrollments (
                tenant_id TEXT NOT NULL REFERENCES tenants(id),
                package TEXT NOT NULL,          -- 'navigator', 'solve'
                tier TEXT NOT NULL,             -- 'trial', 'zero-entitlements', ...
                trial_start TEXT,
                trial_end TEXT,
                trial_canceled TEXT,
                PRIMARY KEY (tenant_id, package)
            );
            CREATE INDEX IF NOT EXISTS idx_enrollments_tier ON enrollments(tier);

            CREATE TABLE IF NOT EXISTS users (
                tenant_id TEXT NOT NULL REFERENCES tenants(id),
                email TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL,
                activated_at TEXT,
                PRIMARY KEY (tenant_id, email)
            );

            CREATE TABLE IF NOT EXISTS account_team (
                tenant_id TEXT NOT NULL REFERENCES tenants(id),
                email TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (tenant_id, email, role)
            );

            CREATE TABLE IF NOT EXISTS assets (
                tenant_id TEXT NOT NULL REFERENCES tenants(id),
                asset_type TEXT NOT NULL,
                value REAL NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS usage_signals (
                tenant_id TEXT PRIMARY KEY REFERENCES tenants(id),
                custom_groupings INTEGER NOT NULL DEFAULT 0,
                alerts INTEGER NOT NULL DEFAULT 0,
                budgets INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS contracts (
                tenant_id TEXT NOT NULL REFERENCES tenants(id),
                package TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                PRIMARY KEY (tenant_id, package)
            );

            -- Notification bookkeeping: one JSON document per tenant
            CREATE TABLE IF NOT EXISTS bookkeeping (
                tenant_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
            )
            .map_err(db_err)
    }

    // ── Seed helpers ──────────────────────────────────────

    pub fn upsert_tenant(&self, id: &TenantId, name: &str) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO tenants (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id.as_str(), name],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn upsert_enrollment(&self, tenant: &TenantId, enrollment: &Enrollment) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO enrollments
                 (tenant_id, package, tier, trial_start, trial_end, trial_canceled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tenant.as_str(),
                    enrollment.package.as_str(),
                    enrollment.tier.as_str(),
                    ts(enrollment.trial_start),
                    ts(enrollment.trial_end),
                    ts(enrollment.trial_canceled),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn add_user(
        &self,
        tenant: &TenantId,
        user: &User,
        role: &str,
        activated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO users (tenant_id, email, first_name, role, activated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant.as_str(), user.email, user.first_name, role, ts(activated_at)],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn add_team_member(&self, tenant: &TenantId, member: &TeamMember) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO account_team (tenant_id, email, role) VALUES (?1, ?2, ?3)",
                params![tenant.as_str(), member.email, member.role],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn add_asset(&self, tenant: &TenantId, asset_type: &str, value: f64, active: bool) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO assets (tenant_id, asset_type, value, active) VALUES (?1, ?2, ?3, ?4)",
                params![tenant.as_str(), asset_type, value, active],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn set_usage_signals(&self, tenant: &TenantId, groupings: bool, alerts: bool, budgets: bool) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO usage_signals (tenant_id, custom_groupings, alerts, budgets)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tenant.as_str(), groupings, alerts, budgets],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn set_contract(&self, tenant: &TenantId, package: PackageType, term: &ContractTerm) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO contracts (tenant_id, package, start_date, end_date)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tenant.as_str(), package.as_str(), term.start.to_rfc3339(), term.end.to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────

    /// Tenants holding at least one enrollment in `tier`, with all their
    /// enrollments. Rows with unknown packages or tiers are skipped.
    pub fn tenants_in_tier(&self, tier: TierName) -> Result<Vec<TenantRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT t.id, t.name FROM tenants t
                 JOIN enrollments e ON e.tenant_id = t.id
                 WHERE e.tier = ?1 ORDER BY t.id",
            )
            .map_err(db_err)?;
        let tenants: Vec<(String, String)> = stmt
            .query_map(params![tier.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err)?;

        let mut records = Vec::with_capacity(tenants.len());
        for (id, name) in tenants {
            let enrollments = Self::enrollments_for(&conn, &id)?;
            records.push(TenantRecord {
                id: TenantId::new(id),
                name,
                enrollments,
            });
        }
        Ok(records)
    }

    fn enrollments_for(conn: &Connection, tenant: &str) -> Result<Vec<Enrollment>> {
        let mut stmt = conn
            .prepare(
                "SELECT package, tier, trial_start, trial_end, trial_canceled
                 FROM enrollments WHERE tenant_id = ?1 ORDER BY package",
            )
            .map_err(db_err)?;
        let rows: Vec<EnrollmentRow> = stmt
            .query_map(params![tenant], |row| {
                Ok(EnrollmentRow {
                    package: row.get(0)?,
                    tier: row.get(1)?,
                    trial_start: row.get(2)?,
                    trial_end: row.get(3)?,
                    trial_canceled: row.get(4)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err)?;

        let mut enrollments = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = (|| -> Result<Enrollment> {
                Ok(Enrollment {
                    package: row.package.parse()?,
                    tier: row.tier.parse()?,
                    trial_start: parse_opt_ts(row.trial_start.clone())?,
                    trial_end: parse_opt_ts(row.trial_end.clone())?,
                    trial_canceled: parse_opt_ts(row.trial_canceled.clone())?,
                })
            })();
            match parsed {
                Ok(enrollment) => enrollments.push(enrollment),
                Err(e) => {
                    tracing::warn!(tenant, package = %row.package, error = %e, "skipping malformed enrollment");
                }
            }
        }
        Ok(enrollments)
    }

    pub fn load_bookkeeping(&self, tenant: &TenantId) -> Result<Option<Bookkeeping>> {
        let document: Option<String> = self
            .lock()?
            .query_row(
                "SELECT document FROM bookkeeping WHERE tenant_id = ?1",
                params![tenant.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        document
            .map(|doc| serde_json::from_str(&doc).map_err(TierNotifyError::from))
            .transpose()
    }

    /// Replace the tenant's bookkeeping in one statement.
    pub fn save_bookkeeping(&self, tenant: &TenantId, record: &Bookkeeping) -> Result<()> {
        let document = serde_json::to_string(record)?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO bookkeeping (tenant_id, document, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![tenant.as_str(), document, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn admin_users(&self, tenant: &TenantId) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT email, first_name, role FROM users WHERE tenant_id = ?1 ORDER BY email")
            .map_err(db_err)?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![tenant.as_str()], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(db_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter(|(_, _, role)| self.admin_roles.iter().any(|r| r == role))
            .map(|(email, first_name, _)| User { email, first_name })
            .collect())
    }

    pub fn account_team(&self, tenant: &TenantId) -> Result<Vec<TeamMember>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT email, role FROM account_team WHERE tenant_id = ?1 ORDER BY email")
            .map_err(db_err)?;
        let team = stmt
            .query_map(params![tenant.as_str()], |row| {
                Ok(TeamMember {
                    email: row.get(0)?,
                    role: row.get(1)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(team)
    }

    fn usage_flag(&self, tenant: &TenantId, column: &str) -> Result<bool> {
        let sql = format!("SELECT {column} FROM usage_signals WHERE tenant_id = ?1");
        let flag: Option<bool> = self
            .lock()?
            .query_row(&sql, params![tenant.as_str()], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        Ok(flag.unwrap_or(false))
    }

    /// Active assets with a positive value.
    pub fn active_assets(&self, tenant: &TenantId) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT asset_type FROM assets
                 WHERE tenant_id = ?1 AND active = 1 AND value > 0 ORDER BY asset_type",
            )
            .map_err(db_err)?;
        let assets = stmt
            .query_map(params![tenant.as_str()], |row| row.get(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(db_err)?;
        Ok(assets)
    }

    /// Earliest activation among the given users.
    pub fn earliest_activation(&self, tenant: &TenantId, users: &[User]) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT activated_at FROM users
                 WHERE tenant_id = ?1 AND email = ?2 AND activated_at IS NOT NULL",
            )
            .map_err(db_err)?;
        let mut earliest: Option<DateTime<Utc>> = None;
        for user in users {
            let raw: Option<String> = stmt
                .query_row(params![tenant.as_str(), user.email], |row| row.get(0))
                .optional()
                .map_err(db_err)?;
            if let Some(at) = parse_opt_ts(raw)? {
                earliest = Some(earliest.map_or(at, |e| e.min(at)));
            }
        }
        Ok(earliest)
    }

    pub fn contract(&self, tenant: &TenantId, package: PackageType) -> Result<Option<ContractTerm>> {
        let row: Option<(String, String)> = self
            .lock()?
            .query_row(
                "SELECT start_date, end_date FROM contracts WHERE tenant_id = ?1 AND package = ?2",
                params![tenant.as_str(), package.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        row.map(|(start, end)| {
            Ok(ContractTerm {
                start: parse_ts(&start)?,
                end: parse_ts(&end)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl EnrollmentSource for RecordDb {
    async fn list_tenants_in_segment(&self, tier: TierName) -> Result<Vec<TenantRecord>> {
        self.tenants_in_tier(tier)
    }
}

#[async_trait]
impl BookkeepingStore for RecordDb {
    async fn get(&self, tenant: &TenantId) -> Result<Option<Bookkeeping>> {
        self.load_bookkeeping(tenant)
    }

    async fn set(&self, tenant: &TenantId, record: &Bookkeeping) -> Result<()> {
        self.save_bookkeeping(tenant, record)
    }
}

#[async_trait]
impl RecipientSource for RecordDb {
    async fn get_admin_users(&self, tenant: &TenantId) -> Result<Vec<User>> {
        self.admin_users(tenant)
    }

    async fn get_account_team(&self, tenant: &TenantId) -> Result<Vec<TeamMember>> {
        self.account_team(tenant)
    }
}

#[async_trait]
impl UsageSignals for RecordDb {
    async fn has_custom_groupings(&self, tenant: &TenantId) -> Result<bool> {
        self.usage_flag(tenant, "custom_groupings")
    }

    async fn has_alerts(&self, tenant: &TenantId) -> Result<bool> {
        self.usage_flag(tenant, "alerts")
    }

    async fn has_budgets(&self, tenant: &TenantId) -> Result<bool> {
        self.usage_flag(tenant, "budgets")
    }
}

#[async_trait]
impl AssetInventory for RecordDb {
    async fn list_active_assets(&self, tenant: &TenantId) -> Result<Vec<String>> {
        self.active_assets(tenant)
    }
}

#[async_trait]
impl ActivationSource for RecordDb {
    async fn first_activation(&self, tenant: &TenantId, users: &[User]) -> Result<Option<DateTime<Utc>>> {
        self.earliest_activation(tenant, users)
    }
}

#[async_trait]
impl ContractSource for RecordDb {
    async fn contract_term(&self, tenant: &TenantId, package: PackageType) -> Result<Option<ContractTerm>> {
        self.contract(tenant, package)
    }
}
