//! Recipient assembly: tenant admins, extended once per tenant per run with
//! the internal address and the tenant's account team.

use std::time::Duration;

use tiernotify_core::traits::RecipientSource;
use tiernotify_core::types::{TenantId, User};

use crate::deadline::bounded;

/// A single delivery address plus the name used in the greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub first_name: String,
}

impl From<User> for Recipient {
    fn from(user: User) -> Self {
        Self {
            email: user.email,
            first_name: user.first_name,
        }
    }
}

/// Per-tenant recipient list. Created from admins; extended at most once.
#[derive(Debug, Clone)]
pub struct RecipientSet {
    recipients: Vec<Recipient>,
    extended: bool,
}

impl RecipientSet {
    pub fn from_admins(admins: Vec<User>) -> Self {
        Self {
            recipients: admins.into_iter().map(Recipient::from).collect(),
            extended: false,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn as_slice(&self) -> &[Recipient] {
        &self.recipients
    }
}

/// Adds the non-admin recipients right before the first send.
#[derive(Debug, Clone)]
pub struct RecipientAssembler {
    internal_address: String,
    account_team_role: String,
}

impl RecipientAssembler {
    pub fn new(internal_address: impl Into<String>, account_team_role: impl Into<String>) -> Self {
        Self {
            internal_address: internal_address.into(),
            account_team_role: account_team_role.into(),
        }
    }

    /// No-op after the first call for a given set. Account-team lookup
    /// failures are logged; the admins and internal address still receive.
    pub async fn ensure_extended(
        &self,
        set: &mut RecipientSet,
        tenant: &TenantId,
        tenant_name: &str,
        source: &dyn RecipientSource,
        io_timeout: Duration,
    ) {
        if set.extended {
            return;
        }
        set.extended = true;

        if !self.internal_address.is_empty() {
            set.recipients.push(Recipient {
                email: self.internal_address.clone(),
                first_name: tenant_name.to_string(),
            });
        }

        match bounded("account team lookup", io_timeout, source.get_account_team(tenant)).await {
            Ok(team) => {
                set.recipients.extend(
                    team.into_iter()
                        .filter(|member| member.role == self.account_team_role)
                        .map(|member| Recipient {
                            email: member.email,
                            first_name: tenant_name.to_string(),
                        }),
                );
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "account team lookup failed");
            }
        }
    }
}
