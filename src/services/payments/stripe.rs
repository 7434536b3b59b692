use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::Value;

use super::{CheckoutRequest, CheckoutSession, NewCustomer, PaymentProcessor, ProcessorError, PromotionCode};
use crate::services::pricing::Discount;

pub struct StripeClient {
    secret_key: String,
    api_base: String,
    api_version: String,
    client: reqwest::Client,
}

impl StripeClient {
    pub fn new(secret_key: String, api_base: String, api_version: String) -> Self {
        Self {
            secret_key,
            api_base,
            api_version,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ProcessorError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ProcessorError::new(format!("invalid Stripe API base: {e}"), "config_error"))?;
        url.path_segments_mut()
            .map_err(|_| ProcessorError::new("invalid Stripe API base", "config_error"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Every call goes through here: bearer auth, pinned API version, form
    /// encoded params and an optional idempotency key.
    pub async fn request(
        &self,
        method: Method,
        segments: &[&str],
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<Value, ProcessorError> {
        if self.secret_key.is_empty() {
            return Err(ProcessorError::new(
                "Payments are not configured on this server.",
                "not_configured",
            ));
        }

        let url = self.url(segments)?;
        let mut req = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&self.secret_key)
            .header("Stripe-Version", &self.api_version);

        req = if method == Method::GET {
            req.query(params)
        } else {
            req.form(params)
        };
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let resp = req.send().await.map_err(|e| {
            ProcessorError::new(format!("Stripe request failed: {e}"), "network_error")
        })?;

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = resp.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "_raw": text }));

        if !status.is_success() {
            let err = normalize_error(status.as_u16(), request_id, &body);
            tracing::warn!(
                status = status.as_u16(),
                code = %err.code,
                request_id = ?err.request_id,
                "Stripe API error: {}",
                err.message
            );
            return Err(err);
        }

        Ok(body)
    }
}

fn normalize_error(status: u16, request_id: Option<String>, body: &Value) -> ProcessorError {
    let error = &body["error"];
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Stripe request failed ({status})."));
    let code = error["code"]
        .as_str()
        .or_else(|| error["type"].as_str())
        .unwrap_or("stripe_error")
        .to_string();

    ProcessorError {
        message,
        code,
        status: Some(status),
        request_id,
    }
}

fn checkout_params(req: &CheckoutRequest) -> Vec<(String, String)> {
    let booking_id = req
        .metadata
        .iter()
        .find(|(k, _)| k == "booking_id")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    let mut params: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("customer".into(), req.customer_id.clone()),
        ("success_url".into(), req.success_url.clone()),
        ("cancel_url".into(), req.cancel_url.clone()),
        ("invoice_creation[enabled]".into(), "true".into()),
        ("automatic_tax[enabled]".into(), "true".into()),
        ("customer_update[address]".into(), "auto".into()),
        ("customer_update[name]".into(), "auto".into()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), req.currency.to_lowercase()),
        ("line_items[0][price_data][unit_amount]".into(), req.amount_cents.to_string()),
        ("line_items[0][price_data][tax_behavior]".into(), "inclusive".into()),
        ("line_items[0][price_data][product_data][name]".into(), req.description.clone()),
    ];

    if !booking_id.is_empty() {
        params.push((
            "line_items[0][price_data][product_data][metadata][booking_id]".into(),
            booking_id,
        ));
    }
    if let Some(promo) = &req.promotion_code_id {
        params.push(("discounts[0][promotion_code]".into(), promo.clone()));
    }
    for (k, v) in &req.metadata {
        params.push((format!("metadata[{k}]"), v.clone()));
    }

    params
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<String>, ProcessorError> {
        match self
            .request(Method::GET, &["v1", "customers", customer_id], &[], None)
            .await
        {
            Ok(v) if v["deleted"].as_bool() == Some(true) => Ok(None),
            Ok(v) => Ok(v["id"].as_str().map(str::to_string)),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_customer(
        &self,
        customer: &NewCustomer,
        idempotency_key: &str,
    ) -> Result<String, ProcessorError> {
        let mut params = vec![("name".to_string(), customer.name.clone())];
        if let Some(email) = &customer.email {
            params.push(("email".into(), email.clone()));
        }
        for (k, v) in &customer.metadata {
            params.push((format!("metadata[{k}]"), v.clone()));
        }

        let v = self
            .request(Method::POST, &["v1", "customers"], &params, Some(idempotency_key))
            .await?;
        v["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProcessorError::new("Stripe returned a customer without an id.", "invalid_response"))
    }

    async fn find_promotion_code(&self, code: &str) -> Result<Option<PromotionCode>, ProcessorError> {
        let params = [
            ("active".to_string(), "true".to_string()),
            ("code".to_string(), code.to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        let v = self
            .request(Method::GET, &["v1", "promotion_codes"], &params, None)
            .await?;

        let promo = &v["data"][0];
        let Some(id) = promo["id"].as_str() else {
            return Ok(None);
        };
        let coupon = &promo["coupon"];
        let coupon_id = coupon.as_str().or_else(|| coupon["id"].as_str()).map(str::to_string);

        Ok(Some(PromotionCode {
            id: id.to_string(),
            coupon_id,
        }))
    }

    async fn retrieve_coupon(&self, coupon_id: &str) -> Result<Option<Discount>, ProcessorError> {
        let v = self
            .request(Method::GET, &["v1", "coupons", coupon_id], &[], None)
            .await?;

        if v["valid"].as_bool() == Some(false) {
            return Ok(None);
        }
        if let Some(off) = v["amount_off"].as_i64() {
            return Ok(Some(Discount::AmountOff(off)));
        }
        Ok(v["percent_off"].as_f64().map(Discount::PercentOff))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, ProcessorError> {
        let params = checkout_params(request);
        let v = self
            .request(
                Method::POST,
                &["v1", "checkout", "sessions"],
                &params,
                Some(idempotency_key),
            )
            .await?;
        Ok(CheckoutSession::from_value(&v))
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession, ProcessorError> {
        let params = [
            ("expand[]".to_string(), "invoice".to_string()),
            ("expand[]".to_string(), "payment_intent".to_string()),
        ];
        let v = self
            .request(Method::GET, &["v1", "checkout", "sessions", session_id], &params, None)
            .await?;
        Ok(CheckoutSession::from_value(&v))
    }

    async fn invoice_url(&self, invoice_id: &str) -> Result<Option<String>, ProcessorError> {
        let v = self
            .request(Method::GET, &["v1", "invoices", invoice_id], &[], None)
            .await?;
        Ok(v["hosted_invoice_url"]
            .as_str()
            .or_else(|| v["invoice_pdf"].as_str())
            .map(str::to_string))
    }

    async fn subscription_period_end(&self, subscription_id: &str) -> Result<Option<i64>, ProcessorError> {
        let v = self
            .request(Method::GET, &["v1", "subscriptions", subscription_id], &[], None)
            .await?;
        Ok(v["current_period_end"].as_i64())
    }
}
