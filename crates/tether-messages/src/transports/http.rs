//! HTTP push transport (FCM v1 style).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use super::{PushMessage, PushTransport};
use crate::credential::Credential;
use crate::error::PushError;
use crate::{Error, Result};

use tether_core::config::PushConfig;

/// Posts messages to `{endpoint}/v1/projects/{project}/messages:send`.
#[derive(Debug, Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
    send_url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: WireMessage<'a>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    token: &'a str,
    notification: &'a super::Notification,
    data: &'a std::collections::BTreeMap<String, String>,
    android: AndroidOptions,
}

#[derive(Serialize)]
struct AndroidOptions {
    priority: super::Priority,
}

impl HttpPushTransport {
    pub fn new(endpoint: &str, project_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                endpoint.trim_end_matches('/'),
                project_id
            ),
        }
    }

    /// Build from configuration; `None` when no project is configured.
    pub fn from_config(config: &PushConfig) -> Result<Option<Self>> {
        match config.project_id.as_deref() {
            None => Ok(None),
            Some("") => Err(Error::InvalidConfiguration(
                "push.project_id is empty".to_string(),
            )),
            Some(project) => Ok(Some(Self::new(&config.endpoint, project))),
        }
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }
}

/// Map an error response onto a [`PushError`].
fn classify(status: StatusCode, body: &str) -> PushError {
    if status == StatusCode::NOT_FOUND || body.contains("UNREGISTERED") {
        return PushError::Unregistered(format!("{}: {}", status, body));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return PushError::Unauthorized(status.to_string());
    }
    PushError::Rejected {
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(
        &self,
        credential: &Credential,
        message: &PushMessage,
    ) -> std::result::Result<(), PushError> {
        let request = SendRequest {
            message: WireMessage {
                token: &message.token,
                notification: &message.notification,
                data: &message.data,
                android: AndroidOptions {
                    priority: message.priority,
                },
            },
        };

        let response = self
            .client
            .post(&self.send_url)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| PushError::Transport(format!("Push request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_url() {
        let transport = HttpPushTransport::new("https://push.example.com/", "proj");
        assert_eq!(
            transport.send_url(),
            "https://push.example.com/v1/projects/proj/messages:send"
        );
    }

    #[test]
    fn test_from_config_without_project() {
        let config = PushConfig::default();
        assert!(HttpPushTransport::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_classify_responses() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, ""),
            PushError::Unregistered(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, r#"{"errorCode":"UNREGISTERED"}"#),
            PushError::Unregistered(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, ""),
            PushError::Unauthorized(_)
        ));
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            PushError::Rejected {
                status: 500,
                message: "boom".to_string()
            }
        );
    }
}
