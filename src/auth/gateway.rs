//! Provider callbacks are relayed by the OAuth gateway that ran the handshake.
//!
//! The gateway signs every relay with HMAC-SHA256 over
//! `"{timestamp}.{provider}.{body}"` using a secret shared with this service,
//! and sends the hex digest in `X-Gateway-Signature` and the unix timestamp in
//! `X-Gateway-Timestamp`.

use axum::body::to_bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use identity_service_api::FederatedLoginRequest;
use sha2::Sha256;

use crate::app::AppState;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
pub const TIMESTAMP_HEADER: &str = "x-gateway-timestamp";

/// Relays older (or further in the future) than this are refused
pub const DEFAULT_MAX_SKEW_SECONDS: i64 = 300;

const MAX_CALLBACK_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct GatewayVerifier {
    secret: Vec<u8>,
    max_skew: Duration,
}

impl GatewayVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            max_skew: Duration::seconds(DEFAULT_MAX_SKEW_SECONDS),
        }
    }

    fn mac(&self, timestamp: i64, provider: &str, body: &[u8]) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::internal(format!("gateway key rejected: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(provider.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Checks freshness, then the signature in constant time
    pub fn verify(
        &self,
        provider: &str,
        timestamp: i64,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let age = now.timestamp() - timestamp;
        if age.abs() > self.max_skew.num_seconds() {
            return Err(AppError::unauthorized("Stale gateway relay"));
        }

        let expected = hex::decode(signature.trim())
            .map_err(|_| AppError::unauthorized("Invalid gateway signature"))?;
        self.mac(timestamp, provider, body)?
            .verify_slice(&expected)
            .map_err(|_| AppError::unauthorized("Invalid gateway signature"))
    }

    #[cfg(test)]
    pub fn sign(&self, provider: &str, timestamp: i64, body: &[u8]) -> String {
        hex::encode(
            self.mac(timestamp, provider, body)
                .unwrap()
                .finalize()
                .into_bytes(),
        )
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing gateway signature"))
}

/// A provider callback whose body was signed by the OAuth gateway
#[derive(Debug)]
pub struct SignedCallback {
    pub provider: String,
    pub payload: FederatedLoginRequest,
}

impl FromRequest<AppState> for SignedCallback {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(gateway) = state.gateway.as_deref() else {
            tracing::warn!("Provider callback refused: no gateway secret configured");
            return Err(AppError::unauthorized("Federated sign-in is not enabled"));
        };

        let (mut parts, body) = req.into_parts();
        let Path(provider) = Path::<String>::from_request_parts(&mut parts, state)
            .await
            .map_err(|e| AppError::invalid_input(e.to_string()))?;

        let signature = header(&parts.headers, SIGNATURE_HEADER)?.to_string();
        let timestamp: i64 = header(&parts.headers, TIMESTAMP_HEADER)?
            .trim()
            .parse()
            .map_err(|_| AppError::unauthorized("Invalid gateway timestamp"))?;

        let body = to_bytes(body, MAX_CALLBACK_BYTES)
            .await
            .map_err(|e| AppError::invalid_input(format!("Unreadable body: {e}")))?;

        if let Err(err) = gateway.verify(&provider, timestamp, &body, &signature, Utc::now()) {
            tracing::warn!(provider, "Provider callback with a bad gateway signature");
            return Err(err);
        }

        let payload = serde_json::from_slice(&body)
            .map_err(|e| AppError::invalid_input(format!("Invalid JSON: {e}")))?;

        Ok(Self { provider, payload })
    }
}
