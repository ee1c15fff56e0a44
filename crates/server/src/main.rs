use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use media::MediaConfig;
use serde::Deserialize;
use server_api::{
    add_image, delete_image, get_all_images, get_image, get_user_images, session::AuthConfig,
    sync_identity, update_credits, update_image, ApiContext,
};
use shared::{
    domain::{ImageId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreditBalanceResponse, CreditUpdateRequest, IdentityEvent, ImageDraft, ImagePayload, Page,
        PageRequest, UserProfile,
    },
};
use storage::Storage;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod auth;
mod config;

use app_state::AppState;
use auth::current_user;
use config::{load_settings, prepare_database_url};

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Deserialize)]
struct ListImagesQuery {
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        media: MediaConfig {
            cloud_name: settings.media_cloud_name,
            base_url: settings.media_base_url,
        },
    };
    let state = AppState {
        api,
        auth: AuthConfig {
            secret: settings.auth_secret,
            ttl_seconds: settings.session_ttl_seconds,
        },
        webhook_secret: settings.webhook_secret,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/identity", post(identity_webhook))
        .route("/users/me", get(http_current_user))
        .route("/users/me/credits", post(http_update_credits))
        .route("/users/:user_id/images", get(http_user_images))
        .route("/images", get(http_list_images).post(http_add_image))
        .route(
            "/images/:image_id",
            get(http_get_image)
                .put(http_update_image)
                .delete(http_delete_image),
        )
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        error!(error = %e, "health check failed");
        reject(ApiError::new(ErrorCode::Internal, "storage unavailable"))
    })?;
    Ok("ok")
}

async fn identity_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<IdentityEvent>,
) -> HttpResult<Json<Option<UserProfile>>> {
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented != Some(state.webhook_secret.as_str()) {
        warn!("identity webhook rejected: bad secret");
        return Err(reject(ApiError::new(
            ErrorCode::Unauthorized,
            "invalid webhook secret",
        )));
    }
    let profile = sync_identity(&state.api, event).await.map_err(reject)?;
    Ok(Json(profile))
}

async fn http_current_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<Json<UserProfile>> {
    Ok(Json(current_user(&state, &headers).await?))
}

async fn http_update_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreditUpdateRequest>,
) -> HttpResult<Json<CreditBalanceResponse>> {
    let user = current_user(&state, &headers).await?;
    let balance = update_credits(&state.api, user.user_id, req.credit_fee)
        .await
        .map_err(reject)?;
    info!(
        user_id = %user.user_id,
        credit_fee = req.credit_fee,
        balance = balance.credit_balance,
        "credits updated"
    );
    Ok(Json(balance))
}

async fn http_user_images(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Query(page): Query<PageRequest>,
) -> HttpResult<Json<Page<ImagePayload>>> {
    let user = current_user(&state, &headers).await?;
    if user.user_id != UserId(user_id) {
        return Err(reject(ApiError::forbidden(
            "cannot list another user's images",
        )));
    }
    let images = get_user_images(&state.api, user.user_id, page)
        .await
        .map_err(reject)?;
    Ok(Json(images))
}

async fn http_list_images(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListImagesQuery>,
) -> HttpResult<Json<Page<ImagePayload>>> {
    let page = PageRequest {
        page: q.page,
        limit: q.limit,
    };
    let images = get_all_images(&state.api, page, q.search.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(images))
}

async fn http_add_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(draft): Json<ImageDraft>,
) -> HttpResult<(StatusCode, Json<ImagePayload>)> {
    let user = current_user(&state, &headers).await?;
    let image = add_image(&state.api, user.user_id, draft)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(image)))
}

async fn http_get_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(image_id): Path<i64>,
) -> HttpResult<Json<ImagePayload>> {
    let user = current_user(&state, &headers).await?;
    let image = get_image(&state.api, user.user_id, ImageId(image_id))
        .await
        .map_err(reject)?;
    Ok(Json(image))
}

async fn http_update_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(image_id): Path<i64>,
    Json(draft): Json<ImageDraft>,
) -> HttpResult<Json<ImagePayload>> {
    let user = current_user(&state, &headers).await?;
    let image = update_image(&state.api, user.user_id, ImageId(image_id), draft)
        .await
        .map_err(reject)?;
    Ok(Json(image))
}

async fn http_delete_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(image_id): Path<i64>,
) -> HttpResult<StatusCode> {
    let user = current_user(&state, &headers).await?;
    delete_image(&state.api, user.user_id, ImageId(image_id))
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
