//! Tier 2: signed REST call to the backend.

use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use omnigate_auth::sign_request;

use crate::{AiReply, DispatchError, DispatchRequest};

/// Tier 2 request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct MoaClient {
    base_url: String,
    secret: Secret<String>,
    http: reqwest::Client,
}

impl MoaClient {
    #[must_use]
    pub fn new(base_url: String, secret: Secret<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            http: reqwest::Client::new(),
        }
    }

    /// POST the chat request, signed over the exact bytes sent.
    pub async fn chat(&self, req: &DispatchRequest) -> Result<AiReply, DispatchError> {
        let mut body = serde_json::json!({
            "user_id": req.user_id,
            "session_id": req.session_id,
            "content": req.content,
            "channel": req.channel,
        });
        if let Some(storage) = &req.content_for_storage {
            body["content_for_storage"] = serde_json::Value::String(storage.clone());
        }
        let payload = body.to_string();
        let signature = sign_request(&payload, self.secret.expose_secret());

        debug!(session = %req.session_id, channel = %req.channel, "calling backend");

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("X-Gateway-Auth", signature)
            .header("X-Gateway-Channel", &req.channel)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(DispatchError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DispatchRequest {
        DispatchRequest::for_sender("line", "U42", "what's the weather")
    }

    #[tokio::test]
    async fn chat_success_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_header("content-type", "application/json")
            .match_header("x-gateway-channel", "line")
            .with_status(200)
            .with_body(
                r#"{"reply":"sunny","model":"m1","category":"general",
                    "credits_used":2,"credits_remaining":98,
                    "key_source":"user","timestamp":"2026-08-01T00:00:00Z"}"#,
            )
            .create_async()
            .await;

        let client = MoaClient::new(server.url(), Secret::new("secret".into()));
        let reply = client.chat(&request()).await.unwrap();
        assert_eq!(reply.reply, "sunny");
        assert_eq!(reply.credits_remaining, Some(98));
        assert_eq!(reply.key_source, "user");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_sends_a_fresh_auth_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_header(
                "x-gateway-auth",
                mockito::Matcher::Regex(r"^\d+:[0-9a-f]{64}$".into()),
            )
            .with_status(200)
            .with_body(r#"{"reply":"ok"}"#)
            .create_async()
            .await;

        let client = MoaClient::new(server.url(), Secret::new("secret".into()));
        client.chat(&request()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_is_an_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = MoaClient::new(server.url(), Secret::new("secret".into()));
        match client.chat(&request()).await {
            Err(DispatchError::Upstream { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            },
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn storage_copy_is_forwarded_when_present() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"content_for_storage":"masked ***"}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"reply":"ok"}"#)
            .create_async()
            .await;

        let client = MoaClient::new(server.url(), Secret::new("secret".into()));
        let mut req = request();
        req.content_for_storage = Some("masked ***".into());
        client.chat(&req).await.unwrap();
        mock.assert_async().await;
    }
}
