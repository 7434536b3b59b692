use serde::Serialize;

/// Internal paid-invoice record. `invoice_number` is the dedup key:
/// `stripe:{invoice_id}` or `stripe_session:{session_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: String,
    pub owner_id: Option<String>,
    pub payer_email: Option<String>,
    pub membership_id: Option<String>,
    pub invoice_number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub issued_on: String,
    pub due_on: String,
    pub paid_at: Option<String>,
}

impl Invoice {
    pub fn number_for(invoice_id: Option<&str>, session_id: &str) -> String {
        match invoice_id {
            Some(id) if !id.is_empty() => format!("stripe:{id}"),
            _ => format!("stripe_session:{session_id}"),
        }
    }
}
