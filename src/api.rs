//! Thin boundary around the YouTube Data API.
//!
//! The pipeline never talks HTTP directly. It goes through [`Transport`], which
//! returns parsed JSON or a [`HarvestError::Transport`], and through
//! [`YouTubeApi`], which appends the credential to every request. Tests swap in
//! a scripted transport instead of a live endpoint.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::{HarvestError, HarvestResult};

/// Caller-supplied API key. Presence is the only thing validated.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl AsRef<str>) -> HarvestResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(HarvestError::CredentialMissing);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn from_option(raw: Option<&str>) -> HarvestResult<Self> {
        raw.map(Self::new)
            .unwrap_or(Err(HarvestError::CredentialMissing))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// A fetch-style call: one GET against `endpoint` with the given query pairs.
pub trait Transport {
    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> HarvestResult<Value>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> HarvestResult<Value> {
        (**self).get_json(endpoint, query)
    }
}

/// Blocking `ureq` transport. Timeouts are owned by the agent.
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tubeharvest/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Transport for UreqTransport {
    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> HarvestResult<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.agent.get(&url);
        for (name, value) in query {
            request = request.query(name, value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(HarvestError::transport(
                    endpoint,
                    format!("HTTP {}: {}", code, api_error_message(&body)),
                ));
            }
            Err(err) => return Err(HarvestError::transport(endpoint, err)),
        };

        response
            .into_json::<Value>()
            .map_err(|err| HarvestError::transport(endpoint, format!("malformed body: {err}")))
    }
}

/// Pulls `error.message` out of a Google API error body, falling back to a
/// clipped copy of the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Credentialed access to the Data API endpoints used by the pipeline.
pub struct YouTubeApi<T> {
    transport: T,
    key: ApiKey,
}

impl<T: Transport> YouTubeApi<T> {
    pub fn new(transport: T, key: ApiKey) -> Self {
        Self { transport, key }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Issues one request with `key` appended to `params`.
    pub fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> HarvestResult<Value> {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        query.extend_from_slice(params);
        query.push(("key", self.key.expose()));
        trace!(endpoint, params = params.len(), "calling YouTube Data API");
        self.transport
            .get_json(endpoint, &query)
            .map_err(|err| err.redact(self.key.expose()))
    }

    /// Like [`Self::get`], decoding the body into `D`. Shape mismatches count
    /// as transport failures.
    pub fn get_as<D: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> HarvestResult<D> {
        let value = self.get(endpoint, params)?;
        serde_json::from_value(value)
            .map_err(|err| HarvestError::transport(endpoint, format!("malformed body: {err}")))
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeTransport, test_api};
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn blank_keys_are_rejected_before_any_call() {
        assert_eq!(ApiKey::new("   ").unwrap_err(), HarvestError::CredentialMissing);
        assert_eq!(
            ApiKey::from_option(None).unwrap_err(),
            HarvestError::CredentialMissing
        );
        assert_eq!(ApiKey::new(" abc ").unwrap().expose(), "abc");
    }

    #[test]
    fn debug_output_hides_the_key() {
        let key = ApiKey::new("super-secret").unwrap();
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
    }

    #[test]
    fn every_call_carries_the_key() {
        let api = test_api(FakeTransport::new(|_| Ok(json!({}))));
        api.get("videos", &[("id", "a")]).unwrap();
        api.get("search", &[]).unwrap();
        let calls = api.transport().calls();
        assert_eq!(calls.len(), 2);
        for call in calls {
            assert_eq!(call.param("key"), Some("test-key"));
        }
    }

    #[test]
    fn transport_errors_are_redacted() {
        let api = test_api(FakeTransport::new(|_| {
            Err(HarvestError::transport("videos", "GET ...&key=test-key timed out"))
        }));
        let err = api.get("videos", &[]).unwrap_err();
        assert!(!err.to_string().contains("test-key"));
    }

    #[test]
    fn malformed_bodies_become_transport_errors() {
        #[derive(Debug, Deserialize)]
        struct Shape {
            #[allow(dead_code)]
            items: Vec<String>,
        }
        let api = test_api(FakeTransport::new(|_| Ok(json!({"items": 5}))));
        let err = api.get_as::<Shape>("videos", &[]).unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("malformed body"));
    }

    #[test]
    fn api_error_message_prefers_google_error_payload() {
        let body = r#"{"error":{"code":403,"message":"quotaExceeded"}}"#;
        assert_eq!(api_error_message(body), "quotaExceeded");
        assert_eq!(api_error_message("plain failure"), "plain failure");
    }
}
