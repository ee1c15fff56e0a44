use super::*;
use serde_json::json;
use shared::{domain::TransformationType, protocol::DeletedIdentity, transformation::TransformationConfig};

async fn setup() -> (ApiContext, UserProfile) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let ctx = ApiContext {
        storage,
        media: MediaConfig::new("demo"),
    };
    let alice = sync_identity(&ctx, IdentityEvent::UserCreated(identity("ext_alice", "alice")))
        .await
        .expect("sync")
        .expect("profile");
    (ctx, alice)
}

fn identity(id: &str, username: &str) -> IdentityUser {
    IdentityUser {
        id: id.to_string(),
        email: format!("{username}@example.com"),
        username: username.to_string(),
        photo: "https://img.example.com/p.png".into(),
        first_name: Some("Al".into()),
        last_name: None,
    }
}

fn draft(title: &str) -> ImageDraft {
    ImageDraft {
        title: title.to_string(),
        transformation_type: TransformationType::Recolor,
        public_id: "imaginify/car".into(),
        secure_url: "https://res.cloudinary.com/demo/image/upload/imaginify/car".into(),
        width: Some(800),
        height: Some(600),
        config: TransformationConfig::from_value(json!({
            "recolor": { "prompt": "car", "to": "blue" }
        })),
        transformation_url: None,
        aspect_ratio: None,
        color: Some("blue".into()),
        prompt: Some("car".into()),
        is_private: false,
    }
}

#[tokio::test]
async fn identity_sync_creates_updates_and_deletes_users() {
    let (ctx, alice) = setup().await;
    assert_eq!(alice.credit_balance, 10);
    assert_eq!(alice.plan_id, 1);

    let mut renamed = identity("ext_alice", "alice2");
    renamed.last_name = Some("Liddell".into());
    let updated = sync_identity(&ctx, IdentityEvent::UserUpdated(renamed))
        .await
        .expect("sync")
        .expect("profile");
    assert_eq!(updated.username, "alice2");
    assert_eq!(updated.user_id, alice.user_id);

    sync_identity(
        &ctx,
        IdentityEvent::UserDeleted(DeletedIdentity {
            id: "ext_alice".into(),
        }),
    )
    .await
    .expect("sync");
    let err = get_user_by_external_id(&ctx, "ext_alice")
        .await
        .expect_err("deleted");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn updating_unknown_identity_is_not_found() {
    let (ctx, _) = setup().await;
    let err = sync_identity(&ctx, IdentityEvent::UserUpdated(identity("ext_nobody", "nobody")))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn add_image_fills_transformation_url() {
    let (ctx, alice) = setup().await;
    let image = add_image(&ctx, alice.user_id, draft("red car"))
        .await
        .expect("add");
    assert_eq!(image.author.user_id, alice.user_id);
    assert_eq!(image.author.external_id, "ext_alice");
    let url = image.draft.transformation_url.expect("url");
    assert!(url.contains("e_gen_recolor:prompt_car;to-color_blue"), "{url}");
}

#[tokio::test]
async fn add_image_rejects_blank_title() {
    let (ctx, alice) = setup().await;
    let err = add_image(&ctx, alice.user_id, draft("   "))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn non_author_update_is_forbidden_and_leaves_record_untouched() {
    let (ctx, alice) = setup().await;
    let bob = sync_identity(&ctx, IdentityEvent::UserCreated(identity("ext_bob", "bob")))
        .await
        .expect("sync")
        .expect("profile");
    let image = add_image(&ctx, alice.user_id, draft("original"))
        .await
        .expect("add");

    let err = update_image(&ctx, bob.user_id, image.image_id, draft("hijacked"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let reloaded = get_image(&ctx, alice.user_id, image.image_id)
        .await
        .expect("get");
    assert_eq!(reloaded.draft.title, "original");

    let err = delete_image(&ctx, bob.user_id, image.image_id)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn private_images_are_hidden_from_other_users() {
    let (ctx, alice) = setup().await;
    let bob = sync_identity(&ctx, IdentityEvent::UserCreated(identity("ext_bob", "bob")))
        .await
        .expect("sync")
        .expect("profile");
    let mut private = draft("secret");
    private.is_private = true;
    let image = add_image(&ctx, alice.user_id, private).await.expect("add");

    assert!(get_image(&ctx, alice.user_id, image.image_id).await.is_ok());
    let err = get_image(&ctx, bob.user_id, image.image_id)
        .await
        .expect_err("hidden");
    assert_eq!(err.code, ErrorCode::NotFound);

    let public = get_all_images(&ctx, PageRequest::default(), None)
        .await
        .expect("list");
    assert!(public.data.is_empty());
    assert_eq!(public.total_pages, 0);
}

#[tokio::test]
async fn user_images_report_total_pages() {
    let (ctx, alice) = setup().await;
    for n in 0..5 {
        add_image(&ctx, alice.user_id, draft(&format!("image {n}")))
            .await
            .expect("add");
    }
    let page = get_user_images(
        &ctx,
        alice.user_id,
        PageRequest {
            page: Some(2),
            limit: Some(2),
        },
    )
    .await
    .expect("list");
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.data[0].draft.title, "image 2");
}

#[tokio::test]
async fn credit_charge_fails_when_balance_is_exhausted() {
    let (ctx, alice) = setup().await;
    let balance = update_credits(&ctx, alice.user_id, -10).await.expect("charge");
    assert_eq!(balance.credit_balance, 0);

    let err = update_credits(&ctx, alice.user_id, -1)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::InsufficientCredits);

    let err = update_credits(&ctx, UserId(404), -1)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn credit_route_refuses_grants() {
    let (ctx, alice) = setup().await;
    for fee in [1000, 0] {
        let err = update_credits(&ctx, alice.user_id, fee)
            .await
            .expect_err("grant");
        assert_eq!(err.code, ErrorCode::Validation);
    }
    let user = get_user(&ctx, alice.user_id).await.expect("user");
    assert_eq!(user.credit_balance, 10);
}

#[tokio::test]
async fn add_image_rejects_delimiters_in_config_text() {
    let (ctx, alice) = setup().await;
    let mut injected = draft("grey cup");
    injected.config = TransformationConfig::from_value(json!({
        "recolor": { "prompt": "cup,e_grayscale", "to": "blue;multiple_true" }
    }));
    let err = add_image(&ctx, alice.user_id, injected)
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);

    let page = get_user_images(&ctx, alice.user_id, PageRequest::default())
        .await
        .expect("list");
    assert!(page.data.is_empty());
}
