//! reqwest-backed collaborators talking to the image server and the media CDN.

use async_trait::async_trait;
use media::{MediaConfig, MediaError, RenderRequest, PROVIDER_ERROR_HEADER};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ImageId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{CreditBalanceResponse, CreditUpdateRequest, ImageDraft, ImagePayload, UserProfile},
};
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

use crate::{CreditLedger, IdentityProvider, ImageRepository, MediaRenderer, RenderOutcome};

/// Identity, persistence and credits over the server's HTTP API, acting as
/// the holder of `session_token`.
pub struct HttpBackend {
    http: Client,
    server_url: String,
    session_token: String,
    user_id: Mutex<Option<UserId>>,
}

impl HttpBackend {
    pub fn new(server_url: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            session_token: session_token.into(),
            user_id: Mutex::new(None),
        }
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        let server_url = &self.server_url;
        let profile: UserProfile =
            send_json(self.authed(self.http.get(format!("{server_url}/users/me")))).await?;
        *self.user_id.lock().await = Some(profile.user_id);
        Ok(profile)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.session_token)
    }

    async fn check_acting_user(&self, acting_user: UserId) -> Result<(), ApiError> {
        match *self.user_id.lock().await {
            Some(user_id) if user_id != acting_user => Err(ApiError::forbidden(
                "acting user does not match the session token",
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpBackend {
    async fn current_user_id(&self) -> Option<UserId> {
        if let Some(user_id) = *self.user_id.lock().await {
            return Some(user_id);
        }
        match self.current_user().await {
            Ok(profile) => Some(profile.user_id),
            Err(err) => {
                warn!(error = %err, "could not resolve current user");
                None
            }
        }
    }
}

#[async_trait]
impl ImageRepository for HttpBackend {
    async fn create_image(
        &self,
        author: UserId,
        draft: &ImageDraft,
    ) -> Result<ImagePayload, ApiError> {
        self.check_acting_user(author).await?;
        let server_url = &self.server_url;
        send_json(
            self.authed(self.http.post(format!("{server_url}/images")))
                .json(draft),
        )
        .await
    }

    async fn update_image(
        &self,
        acting_user: UserId,
        image_id: ImageId,
        draft: &ImageDraft,
    ) -> Result<ImagePayload, ApiError> {
        self.check_acting_user(acting_user).await?;
        let server_url = &self.server_url;
        send_json(
            self.authed(self.http.put(format!("{server_url}/images/{image_id}")))
                .json(draft),
        )
        .await
    }

    async fn get_image(
        &self,
        _viewer: UserId,
        image_id: ImageId,
    ) -> Result<ImagePayload, ApiError> {
        let server_url = &self.server_url;
        send_json(self.authed(self.http.get(format!("{server_url}/images/{image_id}")))).await
    }
}

#[async_trait]
impl CreditLedger for HttpBackend {
    async fn deduct(&self, user: UserId, amount: i64) -> Result<i64, ApiError> {
        self.check_acting_user(user).await?;
        let server_url = &self.server_url;
        let response: CreditBalanceResponse = send_json(
            self.authed(self.http.post(format!("{server_url}/users/me/credits")))
                .json(&CreditUpdateRequest {
                    credit_fee: -amount,
                }),
        )
        .await?;
        Ok(response.credit_balance)
    }
}

/// Builds delivery URLs locally and fetches them to learn whether the
/// provider could render the requested variant.
pub struct HttpRenderer {
    http: Client,
    media: MediaConfig,
}

impl HttpRenderer {
    pub fn new(media: MediaConfig) -> Self {
        Self {
            http: Client::new(),
            media,
        }
    }
}

#[async_trait]
impl MediaRenderer for HttpRenderer {
    fn transformation_url(&self, request: &RenderRequest) -> Result<Url, MediaError> {
        media::transformation_url(&self.media, request)
    }

    async fn load(&self, url: &Url) -> RenderOutcome {
        match self.http.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => RenderOutcome::Loaded,
            Ok(response) => {
                let message = response
                    .headers()
                    .get(PROVIDER_ERROR_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("render failed with status {}", response.status()));
                RenderOutcome::Failed {
                    message: Some(message),
                }
            }
            Err(err) => RenderOutcome::Failed {
                message: Some(err.to_string()),
            },
        }
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
    let response = request.send().await.map_err(transport)?;
    let response = check_status(response).await?;
    response.json().await.map_err(transport)
}

/// Turns a non-2xx response into the [`ApiError`] the server put in the body.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| {
        ApiError::new(ErrorCode::Internal, format!("server returned {status}"))
    }))
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
