use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::app::ports::EventSource;
use crate::common::error::{ImportError, SourceError, SourceResult};
use crate::config::ApiConfig;
use crate::domain::RawEvent;

const API_KEY_HEADER: &str = "x-api-key";

/// Envelope keys the API has used for the event list, in lookup order
const LIST_KEYS: [&str; 3] = ["events", "data", "results"];

/// Client for the Humanitix public REST API
pub struct HumanitixClient {
    client: reqwest::Client,
    base_url: String,
    organiser_id: Option<String>,
    page_size: u32,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HumanitixClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ImportError> {
        if config.api_key.trim().is_empty() {
            return Err(ImportError::MissingCredentials(
                "Humanitix API key is not configured".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(config.api_key.trim())
            .map_err(|e| ImportError::Config(format!("invalid API key header: {}", e)))?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("humanitix-importer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ImportError::Config(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            organiser_id: config.organiser_id.clone().filter(|id| !id.trim().is_empty()),
            page_size: config.page_size.max(1),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// List endpoints tried in order; a 404 on one falls through to the next
    fn list_endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![format!("{}/v1/events", self.base_url)];
        if let Some(organiser) = &self.organiser_id {
            endpoints.push(format!("{}/v1/organisers/{}/events", self.base_url, organiser));
        }
        endpoints
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> SourceResult<Value> {
        let mut attempt = 0;
        loop {
            match self.get_json_once(url, query).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay = match &e {
                        SourceError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => self.retry_delay * 2u32.saturating_pow(attempt),
                    };
                    attempt += 1;
                    warn!(
                        "Request to {} failed ({}), retry {}/{} in {:?}",
                        url, e, attempt, self.retry_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json_once(&self, url: &str, query: &[(&str, String)]) -> SourceResult<Value> {
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            return Err(classify_status(status, url, retry_after));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

/// Map a non-success HTTP status onto the tagged source error
pub fn classify_status(status: StatusCode, url: &str, retry_after_secs: Option<u64>) -> SourceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND => SourceError::NotFound(url.to_string()),
        _ => SourceError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        },
    }
}

/// Pull the event list out of a response body: a bare array or one of the
/// known envelope keys.
pub fn extract_events(body: &Value) -> SourceResult<Vec<RawEvent>> {
    match body {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .cloned()
            .ok_or_else(|| {
                SourceError::Decode(format!(
                    "response has none of the list keys {:?}",
                    LIST_KEYS
                ))
            }),
        other => Err(SourceError::Decode(format!(
            "expected an array or object, got {}",
            json_type(other)
        ))),
    }
}

/// Single-event responses are either the event itself or wrapped in `event`/`data`
pub fn extract_event(body: Value) -> SourceResult<RawEvent> {
    match body {
        Value::Object(mut map) => {
            for key in ["event", "data"] {
                if map.get(key).map_or(false, Value::is_object) {
                    return Ok(map.remove(key).unwrap_or(Value::Null));
                }
            }
            Ok(Value::Object(map))
        }
        other => Err(SourceError::Decode(format!(
            "expected an event object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl EventSource for HumanitixClient {
    #[instrument(skip(self))]
    async fn fetch_page(&self, page: u32) -> SourceResult<Vec<RawEvent>> {
        let query = [("page", page.to_string()), ("pageSize", self.page_size.to_string())];
        let mut last_error = SourceError::NotFound(format!("{}/v1/events", self.base_url));

        for endpoint in self.list_endpoints() {
            match self.get_json(&endpoint, &query).await {
                Ok(body) => {
                    let events = extract_events(&body)?;
                    info!("Fetched {} events from {} (page {})", events.len(), endpoint, page);
                    return Ok(events);
                }
                Err(SourceError::NotFound(url)) => {
                    debug!("Endpoint {} not available, trying next variant", url);
                    last_error = SourceError::NotFound(url);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    #[instrument(skip(self))]
    async fn fetch_one(&self, external_id: &str) -> SourceResult<RawEvent> {
        let url = format!("{}/v1/events/{}", self.base_url, external_id);
        let body = self.get_json(&url, &[]).await?;
        extract_event(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_config(key: &str) -> ApiConfig {
        ApiConfig {
            api_key: key.to_string(),
            organiser_id: Some("org-9".to_string()),
            base_url: "https://api.example.test/".to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        assert!(matches!(
            HumanitixClient::new(&api_config("  ")),
            Err(ImportError::MissingCredentials(_))
        ));
    }

    #[test]
    fn test_endpoint_variants_in_order() {
        let client = HumanitixClient::new(&api_config("secret")).unwrap();
        assert_eq!(
            client.list_endpoints(),
            vec![
                "https://api.example.test/v1/events".to_string(),
                "https://api.example.test/v1/organisers/org-9/events".to_string(),
            ]
        );
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "u", None),
            SourceError::Auth { status: 401 }
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "u", Some(7)),
            SourceError::RateLimited { retry_after_secs: Some(7) }
        );
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "u", None),
            SourceError::NotFound(_)
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, "u", None).is_retryable());
    }

    #[test]
    fn test_extract_events_from_envelopes() {
        let bare = json!([{"_id": "a"}]);
        let wrapped = json!({"total": 2, "events": [{"_id": "a"}, {"_id": "b"}]});
        let data = json!({"data": []});

        assert_eq!(extract_events(&bare).unwrap().len(), 1);
        assert_eq!(extract_events(&wrapped).unwrap().len(), 2);
        assert!(extract_events(&data).unwrap().is_empty());
        assert!(matches!(extract_events(&json!({"page": 1})), Err(SourceError::Decode(_))));
        assert!(matches!(extract_events(&json!("nope")), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_extract_single_event() {
        assert_eq!(
            extract_event(json!({"event": {"_id": "a"}})).unwrap(),
            json!({"_id": "a"})
        );
        assert_eq!(
            extract_event(json!({"_id": "b", "name": "Gig"})).unwrap(),
            json!({"_id": "b", "name": "Gig"})
        );
        assert!(extract_event(json!([])).is_err());
    }
}
