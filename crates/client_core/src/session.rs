//! Edit-session state for one image and the transitions that drive it.
//!
//! Everything here is synchronous and side-effect free; [`crate::TransformationManager`]
//! owns a [`SessionState`] and performs the I/O each transition asks for.

use media::RenderRequest;
use shared::{
    domain::{AspectRatioOption, ImageId, TransformationType, UserId},
    protocol::{ImageDraft, ImagePayload},
    transformation::{deep_merge, TransformationConfig},
};

use crate::error::SessionError;

/// Display attributes of the image being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageState {
    pub public_id: Option<String>,
    pub secure_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues {
    pub title: String,
    /// Key of the selected [`AspectRatioOption`].
    pub aspect_ratio: Option<String>,
    pub color: Option<String>,
    pub prompt: Option<String>,
    pub is_private: bool,
}

/// Free-text inputs whose edits are debounced before reaching the pending
/// transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreeformField {
    Prompt,
    Color,
}

impl FreeformField {
    /// Parameter name written under the transformation key.
    pub fn config_key(self) -> &'static str {
        match self {
            FreeformField::Prompt => "prompt",
            FreeformField::Color => "to",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    PendingChange,
    Applying,
}

/// The record this session edits, once it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingRecord {
    pub image_id: ImageId,
    pub author_id: UserId,
}

/// Work handed out by [`SessionState::begin_apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyTicket {
    pub generation: u64,
    pub request: RenderRequest,
    previous_pending: Option<TransformationConfig>,
    previous_config: Option<TransformationConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveTicket {
    pub draft: ImageDraft,
    pub existing: Option<ExistingRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub transformation_type: TransformationType,
    pub image: ImageState,
    pub form: FormValues,
    pub pending_transformation: Option<TransformationConfig>,
    pub transformation_config: Option<TransformationConfig>,
    pub transformation_url: Option<String>,
    pub is_transforming: bool,
    pub is_submitting: bool,
    existing: Option<ExistingRecord>,
    render_generation: u64,
}

impl SessionState {
    pub fn new(transformation_type: TransformationType) -> Self {
        Self {
            transformation_type,
            image: ImageState::default(),
            form: FormValues::default(),
            pending_transformation: None,
            transformation_config: None,
            transformation_url: None,
            is_transforming: false,
            is_submitting: false,
            existing: None,
            render_generation: 0,
        }
    }

    /// Seeds a session from a persisted record so later saves update it.
    pub fn from_record(record: &ImagePayload) -> Self {
        let draft = &record.draft;
        let aspect_key = draft
            .aspect_ratio
            .as_deref()
            .and_then(AspectRatioOption::lookup)
            .map(|option| option.key().to_string());
        Self {
            transformation_type: draft.transformation_type,
            image: ImageState {
                public_id: Some(draft.public_id.clone()),
                secure_url: Some(draft.secure_url.clone()),
                width: draft.width,
                height: draft.height,
                aspect_ratio: draft.aspect_ratio.clone(),
            },
            form: FormValues {
                title: draft.title.clone(),
                aspect_ratio: aspect_key,
                color: draft.color.clone(),
                prompt: draft.prompt.clone(),
                is_private: draft.is_private,
            },
            pending_transformation: None,
            transformation_config: draft.config.clone(),
            transformation_url: draft.transformation_url.clone(),
            is_transforming: false,
            is_submitting: false,
            existing: Some(ExistingRecord {
                image_id: record.image_id,
                author_id: record.author.user_id,
            }),
            render_generation: 0,
        }
    }

    pub fn existing(&self) -> Option<ExistingRecord> {
        self.existing
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_transforming {
            SessionPhase::Applying
        } else if self.pending_transformation.is_some() {
            SessionPhase::PendingChange
        } else {
            SessionPhase::Idle
        }
    }

    /// Whether an apply would currently be accepted.
    pub fn can_apply(&self) -> bool {
        self.pending_transformation.is_some() && !self.is_transforming
    }

    /// Records the asset returned by an upload.
    pub fn set_uploaded_image(
        &mut self,
        public_id: impl Into<String>,
        secure_url: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
    ) {
        self.image.public_id = Some(public_id.into());
        self.image.secure_url = Some(secure_url.into());
        self.image.width = width;
        self.image.height = height;
    }

    /// Unknown keys are ignored. Replaces, rather than merges, the pending
    /// transformation with the session type's template.
    pub fn select_aspect_ratio(&mut self, key: &str) -> bool {
        let Some(option) = AspectRatioOption::lookup(key) else {
            return false;
        };
        self.image.width = Some(option.width());
        self.image.height = Some(option.height());
        self.image.aspect_ratio = Some(option.aspect_ratio().to_string());
        self.form.aspect_ratio = Some(option.key().to_string());
        self.pending_transformation = Some(self.transformation_type.config_template());
        true
    }

    /// Updates the visible form value; the pending transformation is only
    /// touched by [`SessionState::commit_field`].
    pub fn record_field_input(&mut self, field: FreeformField, value: &str) {
        let slot = match field {
            FreeformField::Prompt => &mut self.form.prompt,
            FreeformField::Color => &mut self.form.color,
        };
        *slot = Some(value.to_string());
    }

    pub fn commit_field(&mut self, field: FreeformField, value: &str, transformation_key: &str) {
        self.pending_transformation
            .get_or_insert_with(TransformationConfig::new)
            .set_field(transformation_key, field.config_key(), value);
    }

    /// Merges the pending transformation into the applied config. Returns
    /// `Ok(None)` without touching state when there is nothing to apply or
    /// a render is already in flight.
    pub fn begin_apply(&mut self) -> Result<Option<ApplyTicket>, SessionError> {
        if !self.can_apply() {
            return Ok(None);
        }
        let public_id = match self.image.public_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(SessionError::Validation(
                    "upload an image before applying a transformation".into(),
                ))
            }
        };

        self.is_transforming = true;
        let previous_pending = self.pending_transformation.take();
        let previous_config = self.transformation_config.clone();
        self.transformation_config =
            deep_merge(previous_pending.as_ref(), previous_config.as_ref());
        self.render_generation += 1;

        Ok(Some(ApplyTicket {
            generation: self.render_generation,
            request: RenderRequest {
                public_id,
                width: self.image.width,
                height: self.image.height,
                config: self.transformation_config.clone(),
            },
            previous_pending,
            previous_config,
        }))
    }

    /// Undoes `begin_apply` when no URL could be built for the merged config,
    /// so the rejected values stay pending and never reach a save.
    pub fn abort_apply(&mut self, ticket: ApplyTicket) {
        if !self.finish_render(ticket.generation) {
            return;
        }
        self.pending_transformation = ticket.previous_pending;
        self.transformation_config = ticket.previous_config;
    }

    pub fn set_transformation_url(&mut self, generation: u64, url: String) {
        if generation == self.render_generation {
            self.transformation_url = Some(url);
        }
    }

    /// Ends the render started by `generation`. The first report wins; stale
    /// or repeated reports return `false` and change nothing.
    pub fn finish_render(&mut self, generation: u64) -> bool {
        if !self.is_transforming || generation != self.render_generation {
            return false;
        }
        self.is_transforming = false;
        true
    }

    /// Returns `Ok(None)` while a save is already running.
    pub fn begin_save(&mut self) -> Result<Option<SaveTicket>, SessionError> {
        if self.is_submitting {
            return Ok(None);
        }
        let title = self.form.title.trim();
        if title.is_empty() {
            return Err(SessionError::Validation("title must not be empty".into()));
        }
        let (Some(public_id), Some(secure_url)) =
            (self.image.public_id.clone(), self.image.secure_url.clone())
        else {
            return Err(SessionError::Validation(
                "upload an image before saving".into(),
            ));
        };

        self.is_submitting = true;
        Ok(Some(SaveTicket {
            draft: ImageDraft {
                title: title.to_string(),
                transformation_type: self.transformation_type,
                public_id,
                secure_url,
                width: self.image.width,
                height: self.image.height,
                config: self.transformation_config.clone(),
                transformation_url: self.transformation_url.clone(),
                aspect_ratio: self.image.aspect_ratio.clone(),
                color: self.form.color.clone(),
                prompt: self.form.prompt.clone(),
                is_private: self.form.is_private,
            },
            existing: self.existing,
        }))
    }

    pub fn finish_save(&mut self, saved: Option<&ImagePayload>) {
        self.is_submitting = false;
        if let Some(record) = saved {
            self.existing = Some(ExistingRecord {
                image_id: record.image_id,
                author_id: record.author.user_id,
            });
            self.transformation_url = record.draft.transformation_url.clone();
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
