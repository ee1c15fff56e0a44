use media::{transformation_url, MediaConfig, RenderRequest};
use shared::{
    domain::{ImageId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        total_pages, CreditBalanceResponse, IdentityEvent, IdentityUser, ImageAuthor, ImageDraft,
        ImagePayload, Page, PageRequest, UserProfile,
    },
};
use storage::{
    CreditOutcome, Storage, StoredImage, StoredUser, UserProfileFields, WriteOutcome,
};
use tracing::{info, warn};

pub mod session;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub media: MediaConfig,
}

const MAX_TITLE_BYTES: usize = 200;

/// Applies a user lifecycle notification from the identity provider.
pub async fn sync_identity(
    ctx: &ApiContext,
    event: IdentityEvent,
) -> Result<Option<UserProfile>, ApiError> {
    match event {
        IdentityEvent::UserCreated(user) => {
            let stored = ctx
                .storage
                .create_user(&user.id, &profile_fields(&user))
                .await
                .map_err(internal)?;
            info!(external_id = %user.id, user_id = %stored.user_id, "user created");
            Ok(Some(user_profile(stored)))
        }
        IdentityEvent::UserUpdated(user) => {
            let stored = ctx
                .storage
                .update_user_by_external_id(&user.id, &profile_fields(&user))
                .await
                .map_err(internal)?
                .ok_or_else(|| ApiError::not_found("user not found"))?;
            info!(external_id = %user.id, "user updated");
            Ok(Some(user_profile(stored)))
        }
        IdentityEvent::UserDeleted(deleted) => {
            let removed = ctx
                .storage
                .delete_user_by_external_id(&deleted.id)
                .await
                .map_err(internal)?;
            if removed.is_none() {
                warn!(external_id = %deleted.id, "delete requested for unknown user");
            }
            Ok(None)
        }
    }
}

pub async fn get_user_by_external_id(
    ctx: &ApiContext,
    external_id: &str,
) -> Result<UserProfile, ApiError> {
    ctx.storage
        .get_user_by_external_id(external_id)
        .await
        .map_err(internal)?
        .map(user_profile)
        .ok_or_else(|| ApiError::not_found("user not found"))
}

pub async fn get_user(ctx: &ApiContext, user_id: UserId) -> Result<UserProfile, ApiError> {
    ctx.storage
        .get_user(user_id)
        .await
        .map_err(internal)?
        .map(user_profile)
        .ok_or_else(|| ApiError::not_found("user not found"))
}

/// Adds `credit_fee` (negative for a charge) to the user's balance.
/// Charges `credit_fee` (a negative amount) to the user. Grants go through
/// the tools binary, never through this path.
pub async fn update_credits(
    ctx: &ApiContext,
    user_id: UserId,
    credit_fee: i64,
) -> Result<CreditBalanceResponse, ApiError> {
    if credit_fee >= 0 {
        return Err(ApiError::validation("credit fee must be negative"));
    }
    match ctx
        .storage
        .update_credits(user_id, credit_fee)
        .await
        .map_err(internal)?
    {
        CreditOutcome::Updated { credit_balance } => Ok(CreditBalanceResponse { credit_balance }),
        CreditOutcome::Insufficient { credit_balance } => Err(ApiError::new(
            ErrorCode::InsufficientCredits,
            format!("insufficient credits: balance is {credit_balance}"),
        )),
        CreditOutcome::UserNotFound => Err(ApiError::not_found("user not found")),
    }
}

pub async fn add_image(
    ctx: &ApiContext,
    user_id: UserId,
    draft: ImageDraft,
) -> Result<ImagePayload, ApiError> {
    let draft = prepare_draft(ctx, draft)?;
    match ctx
        .storage
        .create_image(user_id, &draft)
        .await
        .map_err(internal)?
    {
        WriteOutcome::Done(image) => {
            info!(image_id = %image.image_id, author = %user_id, "image added");
            Ok(image_payload(image))
        }
        WriteOutcome::NotFound => Err(ApiError::not_found("author not found")),
        WriteOutcome::Forbidden => Err(ApiError::forbidden("not allowed to add image")),
    }
}

pub async fn update_image(
    ctx: &ApiContext,
    user_id: UserId,
    image_id: ImageId,
    draft: ImageDraft,
) -> Result<ImagePayload, ApiError> {
    let draft = prepare_draft(ctx, draft)?;
    match ctx
        .storage
        .update_image(user_id, image_id, &draft)
        .await
        .map_err(internal)?
    {
        WriteOutcome::Done(image) => {
            info!(%image_id, author = %user_id, "image updated");
            Ok(image_payload(image))
        }
        WriteOutcome::NotFound => Err(ApiError::not_found("image not found")),
        WriteOutcome::Forbidden => {
            warn!(%image_id, acting_user = %user_id, "rejected update by non-author");
            Err(ApiError::forbidden("unauthorized to update this image"))
        }
    }
}

pub async fn delete_image(
    ctx: &ApiContext,
    user_id: UserId,
    image_id: ImageId,
) -> Result<(), ApiError> {
    match ctx
        .storage
        .delete_image(user_id, image_id)
        .await
        .map_err(internal)?
    {
        WriteOutcome::Done(()) => {
            info!(%image_id, author = %user_id, "image deleted");
            Ok(())
        }
        WriteOutcome::NotFound => Err(ApiError::not_found("image not found")),
        WriteOutcome::Forbidden => Err(ApiError::forbidden("unauthorized to delete this image")),
    }
}

/// Private images are only visible to their author.
pub async fn get_image(
    ctx: &ApiContext,
    viewer: UserId,
    image_id: ImageId,
) -> Result<ImagePayload, ApiError> {
    let image = ctx
        .storage
        .get_image(image_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("image not found"))?;
    if image.draft.is_private && image.author_id != viewer {
        return Err(ApiError::not_found("image not found"));
    }
    Ok(image_payload(image))
}

pub async fn get_user_images(
    ctx: &ApiContext,
    author_id: UserId,
    page: PageRequest,
) -> Result<Page<ImagePayload>, ApiError> {
    let (images, total) = ctx
        .storage
        .list_images_by_author(author_id, page.limit(), page.offset())
        .await
        .map_err(internal)?;
    Ok(Page {
        data: images.into_iter().map(image_payload).collect(),
        total_pages: total_pages(total, page.limit()),
    })
}

pub async fn get_all_images(
    ctx: &ApiContext,
    page: PageRequest,
    search: Option<&str>,
) -> Result<Page<ImagePayload>, ApiError> {
    let (images, total) = ctx
        .storage
        .list_public_images(search, page.limit(), page.offset())
        .await
        .map_err(internal)?;
    Ok(Page {
        data: images.into_iter().map(image_payload).collect(),
        total_pages: total_pages(total, page.limit()),
    })
}

fn prepare_draft(ctx: &ApiContext, mut draft: ImageDraft) -> Result<ImageDraft, ApiError> {
    draft.title = draft.title.trim().to_string();
    if draft.title.is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }
    if draft.title.len() > MAX_TITLE_BYTES {
        return Err(ApiError::validation("title is too long"));
    }
    if draft.public_id.trim().is_empty() {
        return Err(ApiError::validation("public id must not be empty"));
    }
    if draft.secure_url.trim().is_empty() {
        return Err(ApiError::validation("secure url must not be empty"));
    }

    // The stored URL always reflects the stored config.
    if draft.config.is_some() {
        let url = transformation_url(
            &ctx.media,
            &RenderRequest {
                public_id: draft.public_id.clone(),
                width: draft.width,
                height: draft.height,
                config: draft.config.clone(),
            },
        )
        .map_err(|e| ApiError::validation(e.to_string()))?;
        draft.transformation_url = Some(url.to_string());
    }
    Ok(draft)
}

fn profile_fields(user: &IdentityUser) -> UserProfileFields {
    UserProfileFields {
        email: user.email.clone(),
        username: user.username.clone(),
        photo: user.photo.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    }
}

fn user_profile(user: StoredUser) -> UserProfile {
    UserProfile {
        user_id: user.user_id,
        external_id: user.external_id,
        email: user.email,
        username: user.username,
        photo: user.photo,
        first_name: user.first_name,
        last_name: user.last_name,
        plan_id: user.plan_id,
        credit_balance: user.credit_balance,
    }
}

fn image_payload(image: StoredImage) -> ImagePayload {
    ImagePayload {
        image_id: image.image_id,
        draft: image.draft,
        author: ImageAuthor {
            user_id: image.author_id,
            external_id: image.author_external_id,
            first_name: image.author_first_name,
            last_name: image.author_last_name,
        },
        created_at: image.created_at,
        updated_at: image.updated_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
