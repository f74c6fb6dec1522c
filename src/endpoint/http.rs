use std::time::Duration;

use log::debug;
use serde_json::{json, Value};
use ureq::{http::Response, Agent, Body};

use super::MessagingEndpoint;
use crate::error::EndpointError;

/// JSON-over-HTTP endpoint.
///
/// - `POST {base}/session` validates a credential
/// - `POST {base}/messages` with `{"target", "text"}` delivers one message
/// - `DELETE {base}/session` releases the session
///
/// The credential travels as a bearer token. A call succeeds on a 2xx status
/// unless the body says `"ok": false`.
pub struct HttpEndpoint {
    agent: Agent,
    base_url: String,
}

impl HttpEndpoint {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        HttpEndpoint {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl MessagingEndpoint for HttpEndpoint {
    fn login(&self, credential: &str) -> Result<(), EndpointError> {
        let response = self
            .agent
            .post(self.url("session"))
            .header("Authorization", format!("Bearer {credential}"))
            .send_empty()
            .map_err(transport_error)?;
        match check_response(response) {
            Err(EndpointError::Rejected(reason)) => Err(EndpointError::Unauthorized(reason)),
            other => other,
        }
    }

    fn send(&self, target: &str, credential: &str, body: &str) -> Result<(), EndpointError> {
        let payload = json!({ "target": target, "text": body }).to_string();
        let response = self
            .agent
            .post(self.url("messages"))
            .header("Authorization", format!("Bearer {credential}"))
            .header("Content-Type", "application/json")
            .send(payload.as_str())
            .map_err(transport_error)?;
        check_response(response)
    }

    fn logout(&self, credential: &str) -> Result<(), EndpointError> {
        let response = self
            .agent
            .delete(self.url("session"))
            .header("Authorization", format!("Bearer {credential}"))
            .call()
            .map_err(transport_error)?;
        check_response(response)
    }
}

fn transport_error(err: ureq::Error) -> EndpointError {
    match err {
        ureq::Error::Timeout(_) => EndpointError::Timeout,
        other => EndpointError::Transport(other.to_string()),
    }
}

fn check_response(response: Response<Body>) -> Result<(), EndpointError> {
    let status = response.status();
    let text = response.into_body().read_to_string().unwrap_or_default();
    debug!("Endpoint replied {}: {}", status, text);
    classify(status.as_u16(), &text)
}

/// Maps a status code and response body to the endpoint contract.
fn classify(status: u16, body: &str) -> Result<(), EndpointError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let reason = || {
        parsed
            .as_ref()
            .and_then(|value| {
                ["error", "message", "reason"]
                    .iter()
                    .find_map(|key| value.get(*key).and_then(Value::as_str))
            })
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"))
    };

    if !(200..300).contains(&status) {
        return if status == 401 || status == 403 {
            Err(EndpointError::Unauthorized(reason()))
        } else {
            Err(EndpointError::Rejected(reason()))
        };
    }
    match parsed.as_ref().and_then(|value| value.get("ok")) {
        Some(Value::Bool(false)) => Err(EndpointError::Rejected(reason())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_success() {
        assert_eq!(classify(200, ""), Ok(()));
        assert_eq!(classify(204, "not json"), Ok(()));
        assert_eq!(classify(200, r#"{"ok": true, "id": 7}"#), Ok(()));
    }

    #[test]
    fn explicit_negative_ack_is_a_rejection() {
        assert_eq!(
            classify(200, r#"{"ok": false, "error": "thread not found"}"#),
            Err(EndpointError::Rejected("thread not found".to_string()))
        );
    }

    #[test]
    fn status_codes_map_to_failures() {
        assert_eq!(
            classify(401, r#"{"message": "session expired"}"#),
            Err(EndpointError::Unauthorized("session expired".to_string()))
        );
        assert_eq!(
            classify(500, "boom"),
            Err(EndpointError::Rejected("HTTP 500".to_string()))
        );
    }

    #[test]
    fn base_url_is_normalised() {
        let endpoint = HttpEndpoint::new("http://127.0.0.1:9/api/", Duration::from_millis(50));
        assert_eq!(endpoint.url("messages"), "http://127.0.0.1:9/api/messages");
    }

    #[test]
    fn unreachable_host_is_a_transport_failure() {
        let endpoint = HttpEndpoint::new("http://127.0.0.1:9", Duration::from_millis(200));
        let err = endpoint.send("T1", "token", "hi").unwrap_err();
        assert!(matches!(err, EndpointError::Transport(_) | EndpointError::Timeout));
    }
}
