use crate::payments::error::{PaymentError, PaymentResult};
use bigdecimal::{BigDecimal, ToPrimitive};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Credentials attached to an outbound provider call
#[derive(Debug, Clone, Copy)]
pub enum RequestAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    Empty,
    Json(&'a JsonValue),
    /// Pre-encoded `application/x-www-form-urlencoded` body
    Form(&'a str),
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Transport {
                provider: provider.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    /// Send a request and decode a JSON response.
    ///
    /// 429, 5xx and connection failures are retried with exponential backoff, but only for
    /// requests that are safe to send twice (see [`is_replay_safe`]); anything else gets a
    /// single attempt. A timeout is returned immediately. Non-success statuses surface as
    /// `PaymentError::Rejected` carrying the HTTP status.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: RequestBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let max_retries = if is_replay_safe(&method, additional_headers) {
            self.max_retries
        } else {
            0
        };

        let mut last_error = None;
        for attempt in 0..=max_retries {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

            request = match auth {
                RequestAuth::None => request,
                RequestAuth::Bearer(token) => request.bearer_auth(token),
                RequestAuth::Basic { username, password } => {
                    request.basic_auth(username, Some(password))
                }
            };
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            request = match body {
                RequestBody::Empty => request,
                RequestBody::Json(payload) => request.json(payload),
                RequestBody::Form(encoded) => request
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(encoded.to_string()),
            };

            let error = match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::rejected(
                                self.provider,
                                None,
                                format!("invalid JSON response: {}", e),
                            )
                        });
                    }
                    if status.as_u16() == 429 {
                        PaymentError::RateLimited {
                            provider: self.provider.to_string(),
                            retry_after_seconds: None,
                        }
                    } else {
                        let error = PaymentError::rejected(
                            self.provider,
                            Some(status.as_u16()),
                            format!("HTTP {}: {}", status, text),
                        );
                        if !status.is_server_error() {
                            return Err(error);
                        }
                        error
                    }
                }
                Err(e) if e.is_timeout() => {
                    return Err(PaymentError::Timeout {
                        provider: self.provider.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
                Err(e) => PaymentError::Transport {
                    provider: self.provider.to_string(),
                    message: e.to_string(),
                },
            };

            if attempt < max_retries {
                warn!(
                    provider = self.provider,
                    attempt = attempt + 1,
                    error = %error,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(backoff(attempt)).await;
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or(PaymentError::Transport {
            provider: self.provider.to_string(),
            message: "request was not sent".to_string(),
        }))
    }
}

/// Headers that make a provider deduplicate a resent request
const IDEMPOTENCY_HEADERS: [&str; 2] = ["paypal-request-id", "idempotency-key"];

/// Whether a request may be sent again after an ambiguous failure.
///
/// Reads are always safe. A write is only safe when it carries an idempotency key the
/// provider honours; otherwise a resent charge or refund could be applied twice.
pub fn is_replay_safe(method: &reqwest::Method, headers: &[(&str, &str)]) -> bool {
    method.is_safe()
        || headers
            .iter()
            .any(|(name, _)| IDEMPOTENCY_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250u64 << attempt.min(4))
}

/// Major units to integer minor units (kobo, cents), rounding half away from zero.
pub fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
    (amount.clone() * BigDecimal::from(100))
        .round(0)
        .to_i64()
        .ok_or_else(|| PaymentError::invalid("amount", format!("{} is out of range", amount)))
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

/// Two-decimal string as PayPal expects (`"19.90"`)
pub fn format_major_units(amount: &BigDecimal) -> String {
    amount.round(2).with_scale(2).to_string()
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().to_lowercase().as_bytes())
}

pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    let mut mac = match <Hmac<Sha512>>::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn webhook_hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        assert!(!verify_hmac_sha512_hex(payload, "secret", "not-a-valid-signature"));
    }

    #[test]
    fn webhook_hmac_verification_accepts_own_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        let signature = sign_hmac_sha512_hex(payload, "secret");
        assert!(verify_hmac_sha512_hex(payload, "secret", &signature));
        assert!(verify_hmac_sha512_hex(payload, "secret", &signature.to_uppercase()));
        assert!(!verify_hmac_sha512_hex(payload, "other", &signature));
    }

    #[test]
    fn minor_unit_conversion() {
        let amount = BigDecimal::from_str("1499.99").expect("decimal");
        assert_eq!(to_minor_units(&amount).expect("in range"), 149999);
        assert_eq!(from_minor_units(149999), amount);
        assert_eq!(format_major_units(&BigDecimal::from(20)), "20.00");
    }

    #[test]
    fn only_reads_and_keyed_writes_are_replayed() {
        use reqwest::Method;

        assert!(is_replay_safe(&Method::GET, &[]));
        assert!(!is_replay_safe(&Method::POST, &[]));
        assert!(!is_replay_safe(&Method::POST, &[("Accept", "application/json")]));
        assert!(is_replay_safe(&Method::POST, &[("PayPal-Request-Id", "refund-1")]));
    }

    #[tokio::test]
    async fn unkeyed_writes_are_attempted_once() {
        // Nothing listens on the discard port, so every attempt is a connection failure
        let client =
            PaymentHttpClient::new("paystack", Duration::from_millis(500), 3).expect("client");
        let payload = serde_json::json!({ "transaction": "QC-1" });

        let started = std::time::Instant::now();
        let result: PaymentResult<JsonValue> = client
            .request_json(
                reqwest::Method::POST,
                "http://127.0.0.1:9/refund",
                RequestAuth::None,
                RequestBody::Json(&payload),
                &[],
            )
            .await;

        assert!(matches!(result, Err(PaymentError::Transport { .. })));
        // Three retries would have slept 250 + 500 + 1000 ms
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
