use super::*;
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tokio::net::TcpListener;

use crate::error::SessionError;

const TOKEN: &str = "session-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some("Bearer session-token")
}

fn profile() -> UserProfile {
    UserProfile {
        user_id: UserId(5),
        external_id: "ext_5".into(),
        email: "five@example.com".into(),
        username: "five".into(),
        photo: "https://img.example.com/5.png".into(),
        first_name: None,
        last_name: None,
        plan_id: 1,
        credit_balance: 10,
    }
}

async fn me(headers: HeaderMap) -> Result<Json<UserProfile>, (StatusCode, Json<ApiError>)> {
    if !authorized(&headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new(ErrorCode::Unauthorized, "missing token")),
        ));
    }
    Ok(Json(profile()))
}

async fn credits(
    Json(req): Json<CreditUpdateRequest>,
) -> Result<Json<CreditBalanceResponse>, (StatusCode, Json<ApiError>)> {
    let credit_balance = 10 + req.credit_fee;
    if credit_balance < 0 {
        return Err((
            StatusCode::PAYMENT_REQUIRED,
            Json(ApiError::new(ErrorCode::InsufficientCredits, "insufficient credits")),
        ));
    }
    Ok(Json(CreditBalanceResponse { credit_balance }))
}

async fn update(Path(_image_id): Path<i64>) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::FORBIDDEN,
        Json(ApiError::forbidden("unauthorized to update this image")),
    )
}

async fn render(Path(rest): Path<String>) -> impl IntoResponse {
    if rest.contains("e_gen_recolor") {
        let mut headers = HeaderMap::new();
        headers.insert(
            PROVIDER_ERROR_HEADER,
            "Recolor prompt not found in image".parse().expect("header"),
        );
        (StatusCode::BAD_REQUEST, headers, "").into_response()
    } else {
        (StatusCode::OK, "image-bytes").into_response()
    }
}

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/users/me", get(me))
        .route("/users/me/credits", post(credits))
        .route("/images/:image_id", put(update))
        .route("/demo/image/upload/*rest", get(render));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn draft() -> ImageDraft {
    ImageDraft {
        title: "dog".into(),
        transformation_type: shared::domain::TransformationType::Fill,
        public_id: "imaginify/dog".into(),
        secure_url: "https://res.cloudinary.com/demo/image/upload/imaginify/dog".into(),
        width: None,
        height: None,
        config: None,
        transformation_url: None,
        aspect_ratio: None,
        color: None,
        prompt: None,
        is_private: false,
    }
}

#[tokio::test]
async fn resolves_and_caches_current_user() {
    let server_url = spawn_server().await;
    let backend = HttpBackend::new(format!("{server_url}/"), TOKEN);
    assert_eq!(backend.current_user_id().await, Some(UserId(5)));
    assert_eq!(backend.current_user_id().await, Some(UserId(5)));

    let anonymous = HttpBackend::new(server_url, "wrong");
    assert_eq!(anonymous.current_user_id().await, None);
}

#[tokio::test]
async fn deduct_sends_negative_fee() {
    let server_url = spawn_server().await;
    let backend = HttpBackend::new(server_url, TOKEN);
    assert_eq!(backend.deduct(UserId(5), 1).await.expect("deduct"), 9);

    let err = backend.deduct(UserId(5), 50).await.expect_err("overdraft");
    assert_eq!(err.code, ErrorCode::InsufficientCredits);
}

#[tokio::test]
async fn forbidden_update_surfaces_as_unauthorized() {
    let server_url = spawn_server().await;
    let backend = HttpBackend::new(server_url, TOKEN);
    let err = backend
        .update_image(UserId(5), ImageId(3), &draft())
        .await
        .expect_err("forbidden");
    assert_eq!(err.code, ErrorCode::Forbidden);
    assert!(matches!(
        SessionError::from(err),
        SessionError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn acting_user_must_match_token_holder() {
    let server_url = spawn_server().await;
    let backend = HttpBackend::new(server_url, TOKEN);
    backend.current_user().await.expect("profile");

    let err = backend
        .create_image(UserId(6), &draft())
        .await
        .expect_err("mismatch");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn renderer_reports_provider_error_header() {
    let server_url = spawn_server().await;
    let mut media = MediaConfig::new("demo");
    media.base_url = server_url;
    let renderer = HttpRenderer::new(media);

    let plain = renderer
        .transformation_url(&RenderRequest {
            public_id: "imaginify/dog".into(),
            ..RenderRequest::default()
        })
        .expect("url");
    assert_eq!(renderer.load(&plain).await, RenderOutcome::Loaded);

    let recolor = renderer
        .transformation_url(&RenderRequest {
            public_id: "imaginify/dog".into(),
            config: shared::transformation::TransformationConfig::from_value(serde_json::json!({
                "recolor": { "prompt": "car", "to": "blue" }
            })),
            ..RenderRequest::default()
        })
        .expect("url");
    assert_eq!(
        renderer.load(&recolor).await,
        RenderOutcome::Failed {
            message: Some("Recolor prompt not found in image".into()),
        }
    );
}
