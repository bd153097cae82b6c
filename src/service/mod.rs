//! Session service boundary
//!
//! One-shot session creation: the service picks the session id, writes the
//! opening line and hands back the channel endpoint to connect to.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::store::{InterviewType, PlanTier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub interview_type: InterviewType,
    pub plan_tier: PlanTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_culture: Option<String>,
}

impl CreateSessionRequest {
    pub fn new(interview_type: InterviewType, plan_tier: PlanTier) -> Self {
        Self {
            interview_type,
            plan_tier,
            resume_data: None,
            job_description: None,
            company_culture: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub initial_greeting: String,
    pub channel_endpoint: String,
}

#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, ServiceError>;
}

/// HTTP client for the session service
pub struct HttpSessionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionService {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET /health
    pub async fn health(&self) -> Result<(), ServiceError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ServiceError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait::async_trait]
impl SessionService for HttpSessionService {
    /// POST /sessions
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, ServiceError> {
        let url = format!("{}/sessions", self.base_url);
        info!(
            "Creating {} session ({} tier) at {}",
            request.interview_type, request.plan_tier, url
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!("Session service unreachable: {}", e);
                ServiceError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Session service rejected request: HTTP {} {}", status, body);
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedSession = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        info!("Session created: {}", created.session_id);
        Ok(created)
    }
}
