use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub stripe_customer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Owner,
    Admin,
    Member,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantRole::Owner => "owner",
            TenantRole::Admin => "admin",
            TenantRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "owner" => TenantRole::Owner,
            "admin" => TenantRole::Admin,
            _ => TenantRole::Member,
        }
    }
}

/// The caller's tenant and whose ledger pays for the tenant's bookings.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user_id: String,
    pub tenant: Tenant,
    pub token_owner_id: String,
    pub token_owner_email: Option<String>,
}

impl TenantContext {
    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }
}
