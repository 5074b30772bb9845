//! Voice Credential Issuance
//!
//! Before a voice session can join a room it needs a short-lived token from
//! the backend. This module defines the seam for obtaining one and an
//! implementation that talks to the agent's HTTP API.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// How the voice agent gets into a newly created room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentDispatch {
    /// The room service dispatches the agent on its own.
    #[default]
    Automatic,
    /// The client asks the backend to start and stop the agent per room.
    Explicit,
}

/// Defines the contract for obtaining room credentials.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Issues a token allowing `user_id` to join `room_name`.
    async fn issue_token(&self, user_id: &str, room_name: &str) -> Result<String>;

    /// Called after the client has left `room_name`.
    async fn release(&self, _room_name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct AgentRequest<'a> {
    room_name: &'a str,
}

/// A `CredentialIssuer` backed by the agent HTTP API.
pub struct HttpCredentialIssuer {
    http: reqwest::Client,
    api_url: String,
    dispatch: AgentDispatch,
}

impl HttpCredentialIssuer {
    /// Creates an issuer for the API rooted at `api_url`
    /// (e.g. `http://localhost:8000/api/v1`).
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, dispatch: AgentDispatch) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            dispatch,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/agent/{}", self.api_url, path)
    }

    async fn post_agent(&self, path: &str, room_name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint(path))
            .json(&AgentRequest { room_name })
            .send()
            .await
            .with_context(|| format!("Failed to reach /agent/{path}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("/agent/{path} returned {status}: {body}"));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    #[instrument(skip(self))]
    async fn issue_token(&self, user_id: &str, room_name: &str) -> Result<String> {
        let response = self
            .http
            .get(self.endpoint("livekit-token"))
            .query(&[("user_id", user_id), ("room_name", room_name)])
            .send()
            .await
            .context("Failed to reach the voice token endpoint")?;

        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .with_context(|| format!("Voice token endpoint returned an unreadable body ({status})"))?;

        if let Some(error) = body.error {
            return Err(anyhow!(error));
        }
        if !status.is_success() {
            return Err(anyhow!("Voice token endpoint returned {status}"));
        }
        let token = body
            .token
            .context("Voice token endpoint returned no token")?;

        if self.dispatch == AgentDispatch::Explicit {
            self.post_agent("start-agent", room_name).await?;
            info!(%room_name, "Agent dispatched to room");
        }
        Ok(token)
    }

    async fn release(&self, room_name: &str) -> Result<()> {
        if self.dispatch == AgentDispatch::Explicit {
            if let Err(e) = self.post_agent("stop-agent", room_name).await {
                warn!(%room_name, error = %e, "Failed to stop agent");
            }
        }
        Ok(())
    }
}
