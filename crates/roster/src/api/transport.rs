//! Transport boundary for remote method calls.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::credential::Credential;
use super::error::{ApiError, Result};

/// Named request parameters, kept sorted so requests are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str("&")?;
            }
            first = false;
            // Scripts can be long; keep log lines readable.
            if v.len() > 64 {
                write!(f, "{k}=<{} bytes>", v.len())?;
            } else {
                write!(f, "{k}={v}")?;
            }
        }
        Ok(())
    }
}

/// One remote method invocation, returning the unwrapped `response` payload.
///
/// Implementations translate platform error bodies into [`ApiError`] but never
/// retry; retries belong to the call gateway.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn invoke(&self, credential: &Credential, method: &str, params: &Params)
    -> Result<Value>;
}

/// Response envelope: `{"response": ...}` or `{"error": {...}}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// Unwrap a response envelope into its payload.
pub fn unwrap_envelope(method: &str, body: Value) -> Result<Value> {
    let envelope: Envelope =
        serde_json::from_value(body).map_err(|e| ApiError::decode(method, e.to_string()))?;
    if let Some(error) = envelope.error {
        return Err(ApiError::from_remote(error.error_code, error.error_msg));
    }
    envelope
        .response
        .ok_or_else(|| ApiError::decode(method, "envelope has neither response nor error"))
}

#[cfg(feature = "http")]
pub use http::HttpRemoteApi;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use super::*;

    /// Default API version sent with every call.
    pub const DEFAULT_API_VERSION: &str = "5.199";

    /// A real transport backed by reqwest.
    #[derive(Clone)]
    pub struct HttpRemoteApi {
        client: reqwest::Client,
        base_url: String,
        version: String,
    }

    impl HttpRemoteApi {
        pub fn new(base_url: &str, version: Option<&str>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ApiError::network(e.to_string()))?;
            Ok(Self::with_client(client, base_url, version))
        }

        pub fn with_client(client: reqwest::Client, base_url: &str, version: Option<&str>) -> Self {
            Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                version: version.unwrap_or(DEFAULT_API_VERSION).to_string(),
            }
        }

        fn method_url(&self, method: &str) -> String {
            format!("{}/method/{}", self.base_url, method)
        }
    }

    #[async_trait]
    impl RemoteApi for HttpRemoteApi {
        async fn invoke(
            &self,
            credential: &Credential,
            method: &str,
            params: &Params,
        ) -> Result<Value> {
            let mut form: Vec<(&str, &str)> = params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            form.push(("access_token", credential.secret()));
            form.push(("v", self.version.as_str()));

            let response = self
                .client
                .post(self.method_url(method))
                .form(&form)
                .send()
                .await
                .map_err(|e| ApiError::network(e.to_string()))?;

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(ApiError::network(format!("HTTP {status} from {method}")));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| ApiError::decode(method, e.to_string()))?;
            unwrap_envelope(method, body)
        }
    }

}
