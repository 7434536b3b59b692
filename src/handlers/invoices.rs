use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::services::payments;
use crate::state::AppState;

use super::caller_id;

#[derive(Deserialize)]
pub struct InvoiceQuery {
    #[serde(default)]
    pub invoice_id: String,
}

#[derive(Serialize)]
pub struct InvoiceUrlResponse {
    pub ok: bool,
    pub url: String,
}

// GET /api/invoices/url
pub async fn invoice_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<InvoiceQuery>,
) -> Result<Json<InvoiceUrlResponse>, AppError> {
    let user_id = caller_id(&headers);
    if user_id.is_empty() {
        return Err(AppError::Unauthorized("Not signed in.".to_string()));
    }
    let invoice_id = q.invoice_id.trim();
    if invoice_id.is_empty() {
        return Err(AppError::Validation("invoice_id required.".to_string()));
    }

    let invoice = {
        let db = state.db();
        let invoice = queries::get_invoice(&db, invoice_id)?
            .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;
        let is_owner = invoice.owner_id.as_deref() == Some(user_id);
        if !is_owner && !queries::is_admin_user(&db, user_id)? {
            return Err(AppError::Forbidden("Not allowed to view this invoice.".to_string()));
        }
        invoice
    };

    let url = payments::resolve_invoice_url(state.payments.as_ref(), &invoice.invoice_number)
        .await?
        .ok_or_else(|| AppError::NotFound("No hosted invoice is available.".to_string()))?;

    Ok(Json(InvoiceUrlResponse { ok: true, url }))
}
