//! Vehicle Catalog
//!
//! The external metadata service is reached through [`VehicleCatalog`]; the
//! cache only sees a JSON document or an error. [`LfsApiCatalog`] talks to
//! the public LFS REST API with client-credential OAuth.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_URL: &str = "https://id.lfs.net/oauth2/access_token";
const API_BASE: &str = "https://api.lfs.net";

/// Refresh the token this long before it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(30);

/// Catalog lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Transport or HTTP status failure.
    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered but the model is unknown.
    #[error("Vehicle {0} not found")]
    NotFound(String),

    /// Lookup exceeded its time budget.
    #[error("Catalog lookup timed out")]
    Timeout,
}

/// Source of raw vehicle records.
#[async_trait]
pub trait VehicleCatalog: Send + Sync {
    /// Fetch the record for a model id as returned by the service.
    async fn lookup(&self, model_id: &str) -> Result<Value, CatalogError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// LFS REST API client.
pub struct LfsApiCatalog {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl LfsApiCatalog {
    /// Build a client with the given credentials and request timeout.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CatalogError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response: TokenResponse = self.http
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_SLACK);
        debug!("Catalog token refreshed, valid for {:?}", lifetime);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }
}

#[async_trait]
impl VehicleCatalog for LfsApiCatalog {
    async fn lookup(&self, model_id: &str) -> Result<Value, CatalogError> {
        let token = self.access_token().await?;
        let response = self.http
            .get(format!("{}/vehiclemod/{}", API_BASE, model_id))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(model_id.to_string()));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

/// Unwrap the `data` / `vehicle` envelopes the service may add.
pub fn vehicle_record(document: &Value) -> &Value {
    let data = document.get("data").unwrap_or(document);
    data.get("vehicle").unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vehicle_record_unwraps_envelopes() {
        let doc = json!({"data": {"vehicle": {"drive": 2}}});
        assert_eq!(vehicle_record(&doc), &json!({"drive": 2}));

        let doc = json!({"data": {"drive": 1}});
        assert_eq!(vehicle_record(&doc), &json!({"drive": 1}));

        let doc = json!({"drive": 3});
        assert_eq!(vehicle_record(&doc), &json!({"drive": 3}));
    }
}
