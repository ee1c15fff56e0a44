use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use media::{MediaError, RenderRequest};
use shared::{
    domain::{ImageId, UserId, TRANSFORMATION_CREDIT_FEE},
    error::{ApiError, ErrorCode},
    protocol::{ImageDraft, ImagePayload},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinSet,
};
use tracing::{debug, info, warn};
use url::Url;

pub mod debounce;
pub mod error;
pub mod http;
pub mod session;

use debounce::{DebounceTimer, DEFAULT_DEBOUNCE_DELAY};
use error::SessionError;
use session::{FreeformField, SessionState};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when nobody is signed in.
    async fn current_user_id(&self) -> Option<UserId>;
}

#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn create_image(
        &self,
        author: UserId,
        draft: &ImageDraft,
    ) -> Result<ImagePayload, ApiError>;
    /// Rejects with [`ErrorCode::Forbidden`] unless `acting_user` wrote the image.
    async fn update_image(
        &self,
        acting_user: UserId,
        image_id: ImageId,
        draft: &ImageDraft,
    ) -> Result<ImagePayload, ApiError>;
    async fn get_image(&self, viewer: UserId, image_id: ImageId)
        -> Result<ImagePayload, ApiError>;
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Charges `amount` credits and returns the remaining balance.
    async fn deduct(&self, user: UserId, amount: i64) -> Result<i64, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Loaded,
    /// `message` carries the provider's error header when one was sent.
    Failed { message: Option<String> },
}

#[async_trait]
pub trait MediaRenderer: Send + Sync {
    fn transformation_url(&self, request: &RenderRequest) -> Result<Url, MediaError>;
    async fn load(&self, url: &Url) -> RenderOutcome;
}

/// The collaborators a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub images: Arc<dyn ImageRepository>,
    pub credits: Arc<dyn CreditLedger>,
    pub renderer: Arc<dyn MediaRenderer>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PendingChanged,
    TransformationApplied { url: String },
    RenderLoaded,
    RenderFailed { message: Option<String> },
    CreditsDeducted { balance: i64 },
    CreditDeductionFailed { message: String },
    Saved { image_id: ImageId },
}

/// Drives one edit session: debounces field edits, applies pending
/// transformations, charges credits and persists the result.
///
/// Dropping the manager cancels pending field commits and any in-flight
/// render probe or credit call.
pub struct TransformationManager {
    collaborators: Collaborators,
    state: Arc<Mutex<SessionState>>,
    timers: Mutex<HashMap<FreeformField, DebounceTimer>>,
    background: Mutex<JoinSet<()>>,
    debounce_delay: Duration,
    credit_fee: i64,
    events: broadcast::Sender<SessionEvent>,
}

impl TransformationManager {
    pub fn new(state: SessionState, collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            collaborators,
            state: Arc::new(Mutex::new(state)),
            timers: Mutex::new(HashMap::new()),
            background: Mutex::new(JoinSet::new()),
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            credit_fee: TRANSFORMATION_CREDIT_FEE,
            events,
        }
    }

    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    pub fn with_credit_fee(mut self, credit_fee: i64) -> Self {
        self.credit_fee = credit_fee;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn set_title(&self, title: impl Into<String>) {
        self.state.lock().await.form.title = title.into();
    }

    pub async fn set_private(&self, is_private: bool) {
        self.state.lock().await.form.is_private = is_private;
    }

    pub async fn set_uploaded_image(
        &self,
        public_id: impl Into<String>,
        secure_url: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
    ) {
        self.state
            .lock()
            .await
            .set_uploaded_image(public_id, secure_url, width, height);
    }

    /// Returns `false` for an unknown option key.
    pub async fn select_aspect_ratio(&self, key: &str) -> bool {
        let selected = self.state.lock().await.select_aspect_ratio(key);
        if selected {
            let _ = self.events.send(SessionEvent::PendingChanged);
        } else {
            debug!(key, "ignoring unknown aspect ratio");
        }
        selected
    }

    /// Shows `value` in the form right away and commits it into the pending
    /// transformation once the field has been quiet for the debounce delay.
    pub async fn update_freeform_field(
        &self,
        field: FreeformField,
        value: &str,
        transformation_key: &str,
    ) {
        self.state.lock().await.record_field_input(field, value);

        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let value = value.to_string();
        let transformation_key = transformation_key.to_string();

        let mut timers = self.timers.lock().await;
        timers
            .entry(field)
            .or_insert_with(|| DebounceTimer::new(self.debounce_delay))
            .schedule(async move {
                state
                    .lock()
                    .await
                    .commit_field(field, &value, &transformation_key);
                let _ = events.send(SessionEvent::PendingChanged);
            });
    }

    /// Applies the pending transformation. Returns `Ok(false)` when there was
    /// nothing to apply or a render is still in flight.
    pub async fn apply_transformation(&self) -> Result<bool, SessionError> {
        let (ticket, url) = {
            let mut state = self.state.lock().await;
            let Some(ticket) = state.begin_apply()? else {
                return Ok(false);
            };
            match self.collaborators.renderer.transformation_url(&ticket.request) {
                Ok(url) => {
                    state.set_transformation_url(ticket.generation, url.to_string());
                    (ticket, url)
                }
                Err(err) => {
                    state.abort_apply(ticket);
                    let message = err.to_string();
                    warn!(error = %message, "could not build transformation url");
                    let _ = self.events.send(SessionEvent::RenderFailed {
                        message: Some(message.clone()),
                    });
                    return Err(SessionError::Validation(message));
                }
            }
        };
        info!(generation = ticket.generation, %url, "transformation applied");
        let _ = self.events.send(SessionEvent::TransformationApplied {
            url: url.to_string(),
        });

        let mut background = self.background.lock().await;
        while background.try_join_next().is_some() {}
        background.spawn(deduct_credits(
            Arc::clone(&self.collaborators.identity),
            Arc::clone(&self.collaborators.credits),
            self.credit_fee,
            self.events.clone(),
        ));
        background.spawn(probe_render(
            Arc::clone(&self.collaborators.renderer),
            Arc::clone(&self.state),
            ticket.generation,
            url,
            self.events.clone(),
        ));
        Ok(true)
    }

    /// Persists the session as a new record or as an update of the record it
    /// was opened from. Returns `Ok(None)` while another save is running.
    pub async fn save(&self) -> Result<Option<ImagePayload>, SessionError> {
        let Some(ticket) = self.state.lock().await.begin_save()? else {
            return Ok(None);
        };

        let result = self.persist(ticket).await;

        let mut state = self.state.lock().await;
        state.finish_save(result.as_ref().ok());
        drop(state);

        match &result {
            Ok(image) => {
                info!(image_id = %image.image_id, "image saved");
                let _ = self.events.send(SessionEvent::Saved {
                    image_id: image.image_id,
                });
            }
            Err(err) => warn!(error = %err, "image save failed"),
        }
        result.map(Some)
    }

    async fn persist(&self, ticket: session::SaveTicket) -> Result<ImagePayload, SessionError> {
        let user = self
            .collaborators
            .identity
            .current_user_id()
            .await
            .ok_or(SessionError::NotAuthenticated)?;

        let Some(existing) = ticket.existing else {
            return Ok(self
                .collaborators
                .images
                .create_image(user, &ticket.draft)
                .await?);
        };
        if existing.author_id != user {
            return Err(SessionError::Unauthorized(
                "only the author can update this image".into(),
            ));
        }
        Ok(self
            .collaborators
            .images
            .update_image(user, existing.image_id, &ticket.draft)
            .await?)
    }
}

async fn deduct_credits(
    identity: Arc<dyn IdentityProvider>,
    credits: Arc<dyn CreditLedger>,
    credit_fee: i64,
    events: broadcast::Sender<SessionEvent>,
) {
    let outcome = match identity.current_user_id().await {
        Some(user) => credits.deduct(user, credit_fee).await,
        None => Err(ApiError::new(ErrorCode::Unauthorized, "no signed-in user")),
    };
    match outcome {
        Ok(balance) => {
            debug!(balance, "credits deducted");
            let _ = events.send(SessionEvent::CreditsDeducted { balance });
        }
        Err(err) => {
            warn!(error = %err, credit_fee, "credit deduction failed");
            let _ = events.send(SessionEvent::CreditDeductionFailed {
                message: err.message,
            });
        }
    }
}

async fn probe_render(
    renderer: Arc<dyn MediaRenderer>,
    state: Arc<Mutex<SessionState>>,
    generation: u64,
    url: Url,
    events: broadcast::Sender<SessionEvent>,
) {
    let outcome = renderer.load(&url).await;
    if !state.lock().await.finish_render(generation) {
        return;
    }
    let event = match outcome {
        RenderOutcome::Loaded => SessionEvent::RenderLoaded,
        RenderOutcome::Failed { message } => {
            warn!(%url, error = message.as_deref().unwrap_or("unknown"), "render failed");
            SessionEvent::RenderFailed { message }
        }
    };
    let _ = events.send(event);
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
