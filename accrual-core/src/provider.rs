//! Accrual provider client
//!
//! `GET {base}/api/orders/{number}`:
//! - 200: `{"order": "...", "status": "REGISTERED|PROCESSING|INVALID|PROCESSED", "accrual": 500.5}`
//! - 204: order not registered with the provider yet
//! - 429: back off, honouring `Retry-After` (seconds)
//! - anything else: provider unavailable

use crate::types::{AccrualReport, OrderNumber, ProviderStatus, MAX_AMOUNT};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Back-off used when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Source of accrual decisions
#[async_trait]
pub trait AccrualProvider: Send + Sync {
    /// Current provider view of `number`; `None` if the provider does not know it yet.
    async fn fetch_accrual(&self, number: &OrderNumber) -> Result<Option<AccrualReport>>;
}

#[derive(Debug, Deserialize)]
struct AccrualResponse {
    order: String,
    status: ProviderStatus,
    /// Kept as the literal JSON text so it never passes through `f64`
    #[serde(default)]
    accrual: Option<Box<RawValue>>,
}

impl AccrualResponse {
    fn into_report(self, requested: &OrderNumber) -> Result<AccrualReport> {
        if self.order.trim() != requested.as_str() {
            return Err(Error::MalformedProviderResponse(format!(
                "asked for order {}, got {}",
                requested, self.order
            )));
        }

        let accrual = self
            .accrual
            .map(|raw| parse_amount(raw.get()))
            .transpose()?;

        Ok(AccrualReport {
            order: requested.as_str().to_string(),
            status: self.status,
            accrual,
        })
    }
}

/// Parse a JSON number literal into money, rounded to cents like `NUMERIC(14,2)` does.
fn parse_amount(text: &str) -> Result<Decimal> {
    let text = text.trim();
    let amount = Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|e| Error::MalformedProviderResponse(format!("accrual {}: {}", text, e)))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(Error::MalformedProviderResponse(format!(
            "negative accrual {}",
            amount
        )));
    }

    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if amount > MAX_AMOUNT {
        return Err(Error::MalformedProviderResponse(format!(
            "accrual {} exceeds {}",
            amount, MAX_AMOUNT
        )));
    }

    Ok(amount)
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// HTTP client for the accrual system
#[derive(Debug, Clone)]
pub struct AccrualClient {
    base_url: String,
    client: Client,
    timeout: Duration,
    default_retry_after: Duration,
}

impl AccrualClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            base_url,
            client,
            timeout,
            default_retry_after: DEFAULT_RETRY_AFTER,
        })
    }

    pub fn with_default_retry_after(mut self, retry_after: Duration) -> Self {
        self.default_retry_after = retry_after;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AccrualProvider for AccrualClient {
    async fn fetch_accrual(&self, number: &OrderNumber) -> Result<Option<AccrualReport>> {
        let url = format!("{}/api/orders/{}", self.base_url, number);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::ProviderTimeout(self.timeout)
            } else {
                Error::ProviderUnavailable(format!("GET {} failed: {}", url, e))
            }
        })?;

        match response.status() {
            StatusCode::OK => {
                let body = response.json::<AccrualResponse>().await.map_err(|e| {
                    Error::MalformedProviderResponse(format!("order {}: {}", number, e))
                })?;
                let report = body.into_report(number)?;
                debug!(order = %number, status = ?report.status, accrual = ?report.accrual, "Accrual report received");
                Ok(Some(report))
            }
            StatusCode::NO_CONTENT => {
                debug!(order = %number, "Order not registered with provider yet");
                Ok(None)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = retry_after(&response).unwrap_or(self.default_retry_after);
                warn!(order = %number, retry_after_secs = retry_after.as_secs(), "Accrual provider throttling");
                Err(Error::ProviderThrottled { retry_after })
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::ProviderUnavailable(format!(
                    "order {} answered {}: {}",
                    number, status, text
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    async fn client_for(server: &MockServer) -> AccrualClient {
        AccrualClient::new(server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_processed_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/12345678903"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order": "12345678903",
                "status": "PROCESSED",
                "accrual": 500.5
            })))
            .mount(&server)
            .await;

        let report = client_for(&server)
            .await
            .fetch_accrual(&number("12345678903"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.status, ProviderStatus::Processed);
        assert_eq!(report.accrual, Some(dec!(500.50)));
    }

    #[tokio::test]
    async fn test_registered_without_accrual() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/79927398713"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order": "79927398713",
                "status": "REGISTERED"
            })))
            .mount(&server)
            .await;

        let report = client_for(&server)
            .await
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.status, ProviderStatus::Registered);
        assert_eq!(report.accrual, None);
    }

    #[tokio::test]
    async fn test_no_content_means_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let report = client_for(&server)
            .await
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_throttled_uses_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProviderThrottled { retry_after } if retry_after == Duration::from_secs(7)
        ));
    }

    #[tokio::test]
    async fn test_throttled_without_header_uses_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .with_default_retry_after(Duration::from_secs(3))
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProviderThrottled { retry_after } if retry_after == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProviderUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(100);
        let err = AccrualClient::new(server.uri(), timeout)
            .unwrap()
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProviderTimeout(t) if t == timeout));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_accrual(&number("79927398713"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedProviderResponse(_)));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("729.98").unwrap(), dec!(729.98));
        assert_eq!(parse_amount("100").unwrap(), dec!(100));
        assert_eq!(parse_amount("0.005").unwrap(), dec!(0.01));
        assert_eq!(parse_amount("1.5e2").unwrap(), dec!(150));
        assert!(parse_amount("-1.5").is_err());
        assert!(parse_amount("\"12.5\"").is_err());
    }

    #[test]
    fn test_parse_amount_keeps_every_digit() {
        // An f64 would round this up to ...12.125 and then to .13
        assert_eq!(
            parse_amount("1234567890.12499999999").unwrap(),
            dec!(1234567890.12)
        );
        assert_eq!(parse_amount("0.0049999999999999999").unwrap(), dec!(0.00));
    }

    #[test]
    fn test_parse_amount_rejects_overflowing_column() {
        assert_eq!(parse_amount("999999999999.99").unwrap(), MAX_AMOUNT);
        assert!(matches!(
            parse_amount("1000000000000"),
            Err(Error::MalformedProviderResponse(_))
        ));
        assert!(matches!(
            parse_amount("999999999999.995"),
            Err(Error::MalformedProviderResponse(_))
        ));
        assert!(parse_amount("1e30").is_err());
    }

    #[tokio::test]
    async fn test_long_decimal_accrual_is_exact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/12345678903"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"order":"12345678903","status":"PROCESSED","accrual":1234567890.12499999999}"#,
            ))
            .mount(&server)
            .await;

        let report = client_for(&server)
            .await
            .fetch_accrual(&number("12345678903"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.accrual, Some(dec!(1234567890.12)));
    }

    #[tokio::test]
    async fn test_null_accrual_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"order":"12345678903","status":"PROCESSING","accrual":null}"#,
            ))
            .mount(&server)
            .await;

        let report = client_for(&server)
            .await
            .fetch_accrual(&number("12345678903"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.accrual, None);
    }

    #[test]
    fn test_mismatched_order_is_rejected() {
        let body = AccrualResponse {
            order: "2377225624".to_string(),
            status: ProviderStatus::Processed,
            accrual: None,
        };
        assert!(body.into_report(&number("12345678903")).is_err());
    }
}
