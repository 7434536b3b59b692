use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{TenantContext, TenantRole};

/// Resolves the caller's tenant and whose ledger pays for its bookings: the
/// tenant's owner, else its first admin, else the caller.
pub fn resolve_context(conn: &Connection, user_id: &str) -> Result<TenantContext, AppError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::Unauthorized("Not signed in.".to_string()));
    }

    let tenant_id = queries::first_tenant_for_user(conn, user_id)?
        .ok_or_else(|| AppError::Forbidden("No tenant is linked to this account.".to_string()))?;
    let tenant = queries::get_tenant(conn, &tenant_id)?
        .ok_or_else(|| AppError::Forbidden("No tenant is linked to this account.".to_string()))?;

    let token_owner_id = match queries::first_tenant_user_with_role(conn, &tenant_id, TenantRole::Owner)? {
        Some(owner) => owner,
        None => queries::first_tenant_user_with_role(conn, &tenant_id, TenantRole::Admin)?
            .unwrap_or_else(|| user_id.to_string()),
    };
    let token_owner_email = queries::get_user_email(conn, &token_owner_id)?;

    Ok(TenantContext {
        user_id: user_id.to_string(),
        tenant,
        token_owner_id,
        token_owner_email,
    })
}
