use server_api::{session::AuthConfig, ApiContext};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) auth: AuthConfig,
    pub(crate) webhook_secret: String,
}
