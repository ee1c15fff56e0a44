use super::*;
use serde_json::json;

fn profile(username: &str) -> UserProfileFields {
    UserProfileFields {
        email: format!("{username}@example.com"),
        username: username.to_string(),
        photo: format!("https://img.example.com/{username}.png"),
        first_name: Some(username.to_uppercase()),
        last_name: None,
    }
}

fn draft(title: &str) -> ImageDraft {
    ImageDraft {
        title: title.to_string(),
        transformation_type: TransformationType::Fill,
        public_id: format!("imaginify/{title}"),
        secure_url: format!("https://res.cloudinary.com/demo/image/upload/imaginify/{title}"),
        width: Some(1000),
        height: Some(1000),
        config: TransformationConfig::from_value(json!({ "fillBackground": true })),
        transformation_url: None,
        aspect_ratio: Some("1:1".into()),
        color: None,
        prompt: None,
        is_private: false,
    }
}

async fn create_image(storage: &Storage, author: UserId, draft: &ImageDraft) -> StoredImage {
    match storage.create_image(author, draft).await.expect("create") {
        WriteOutcome::Done(image) => image,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("imagecraft_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn new_users_start_with_default_plan_and_credits() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_alice", &profile("alice"))
        .await
        .expect("user");
    assert_eq!(user.plan_id, DEFAULT_PLAN_ID);
    assert_eq!(user.credit_balance, DEFAULT_CREDIT_BALANCE);

    let by_external = storage
        .get_user_by_external_id("ext_alice")
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(by_external, user);
}

#[tokio::test]
async fn duplicate_external_id_is_rejected() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_user("ext_dup", &profile("dup"))
        .await
        .expect("user");
    assert!(storage
        .create_user("ext_dup", &profile("dup2"))
        .await
        .is_err());
}

#[tokio::test]
async fn updates_profile_by_external_id() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_user("ext_bob", &profile("bob"))
        .await
        .expect("user");
    let mut changed = profile("bobby");
    changed.last_name = Some("Builder".into());
    let updated = storage
        .update_user_by_external_id("ext_bob", &changed)
        .await
        .expect("update")
        .expect("present");
    assert_eq!(updated.username, "bobby");
    assert_eq!(updated.last_name.as_deref(), Some("Builder"));

    assert!(storage
        .update_user_by_external_id("ext_missing", &changed)
        .await
        .expect("update")
        .is_none());
}

#[tokio::test]
async fn credits_never_drop_below_zero() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_carol", &profile("carol"))
        .await
        .expect("user");

    assert_eq!(
        storage.update_credits(user.user_id, -4).await.expect("debit"),
        CreditOutcome::Updated { credit_balance: 6 }
    );
    assert_eq!(
        storage.update_credits(user.user_id, -7).await.expect("debit"),
        CreditOutcome::Insufficient { credit_balance: 6 }
    );
    assert_eq!(
        storage.update_credits(UserId(999), -1).await.expect("debit"),
        CreditOutcome::UserNotFound
    );
}

#[tokio::test]
async fn creates_and_reads_back_image_with_config() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_dave", &profile("dave"))
        .await
        .expect("user");
    let image = create_image(&storage, user.user_id, &draft("beach")).await;

    assert_eq!(image.draft, draft("beach"));
    assert_eq!(image.author_id, user.user_id);
    assert_eq!(image.author_external_id, "ext_dave");
    assert_eq!(image.created_at, image.updated_at);

    let loaded = storage
        .get_image(image.image_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(loaded, image);
}

#[tokio::test]
async fn image_creation_requires_existing_author() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let outcome = storage
        .create_image(UserId(42), &draft("orphan"))
        .await
        .expect("create");
    assert_eq!(outcome, WriteOutcome::NotFound);
}

#[tokio::test]
async fn only_author_can_update_or_delete() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage
        .create_user("ext_owner", &profile("owner"))
        .await
        .expect("owner");
    let other = storage
        .create_user("ext_other", &profile("other"))
        .await
        .expect("other");
    let image = create_image(&storage, owner.user_id, &draft("sunset")).await;

    let mut changed = draft("sunset-edited");
    changed.config = TransformationConfig::from_value(json!({ "restore": true }));
    let outcome = storage
        .update_image(other.user_id, image.image_id, &changed)
        .await
        .expect("update");
    assert_eq!(outcome, WriteOutcome::Forbidden);
    let untouched = storage
        .get_image(image.image_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(untouched.draft.title, "sunset");

    let WriteOutcome::Done(updated) = storage
        .update_image(owner.user_id, image.image_id, &changed)
        .await
        .expect("update")
    else {
        panic!("owner update should succeed");
    };
    assert_eq!(updated.draft, changed);
    assert!(updated.updated_at >= image.updated_at);

    assert_eq!(
        storage
            .delete_image(other.user_id, image.image_id)
            .await
            .expect("delete"),
        WriteOutcome::Forbidden
    );
    assert_eq!(
        storage
            .delete_image(owner.user_id, image.image_id)
            .await
            .expect("delete"),
        WriteOutcome::Done(())
    );
    assert_eq!(
        storage
            .delete_image(owner.user_id, image.image_id)
            .await
            .expect("delete"),
        WriteOutcome::NotFound
    );
}

#[tokio::test]
async fn author_listing_is_newest_first_and_paginated() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_erin", &profile("erin"))
        .await
        .expect("user");
    let first = create_image(&storage, user.user_id, &draft("one")).await;
    let second = create_image(&storage, user.user_id, &draft("two")).await;
    let third = create_image(&storage, user.user_id, &draft("three")).await;

    let (page_one, total) = storage
        .list_images_by_author(user.user_id, 2, 0)
        .await
        .expect("list");
    assert_eq!(total, 3);
    assert_eq!(
        page_one.iter().map(|i| i.image_id).collect::<Vec<_>>(),
        vec![third.image_id, second.image_id]
    );

    let (page_two, _) = storage
        .list_images_by_author(user.user_id, 2, 2)
        .await
        .expect("list");
    assert_eq!(page_two.len(), 1);
    assert_eq!(page_two[0].image_id, first.image_id);

    // Touching the oldest image moves it to the front.
    storage
        .update_image(user.user_id, first.image_id, &draft("one-again"))
        .await
        .expect("update");
    let (reordered, _) = storage
        .list_images_by_author(user.user_id, 1, 0)
        .await
        .expect("list");
    assert_eq!(reordered[0].image_id, first.image_id);
}

#[tokio::test]
async fn public_listing_hides_private_images_and_filters_titles() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_fay", &profile("fay"))
        .await
        .expect("user");
    create_image(&storage, user.user_id, &draft("Mountain Lake")).await;
    create_image(&storage, user.user_id, &draft("city")).await;
    let mut hidden = draft("mountain secret");
    hidden.is_private = true;
    create_image(&storage, user.user_id, &hidden).await;

    let (all, total) = storage
        .list_public_images(None, 10, 0)
        .await
        .expect("list");
    assert_eq!(total, 2);
    assert!(all.iter().all(|image| !image.draft.is_private));

    let (found, total) = storage
        .list_public_images(Some("mountain"), 10, 0)
        .await
        .expect("search");
    assert_eq!(total, 1);
    assert_eq!(found[0].draft.title, "Mountain Lake");
}

#[tokio::test]
async fn title_search_treats_wildcards_literally() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_hal", &profile("hal"))
        .await
        .expect("user");
    create_image(&storage, user.user_id, &draft("snake_case")).await;
    create_image(&storage, user.user_id, &draft("100% cotton")).await;
    create_image(&storage, user.user_id, &draft("back\\slash")).await;
    create_image(&storage, user.user_id, &draft("plain")).await;

    for (search, expected) in [("_", "snake_case"), ("%", "100% cotton"), ("\\", "back\\slash")] {
        let (found, total) = storage
            .list_public_images(Some(search), 10, 0)
            .await
            .expect("search");
        assert_eq!(total, 1, "{search}");
        assert_eq!(found.len(), 1, "{search}");
        assert_eq!(found[0].draft.title, expected);
    }
}

#[tokio::test]
async fn deleting_user_removes_their_images() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage
        .create_user("ext_gus", &profile("gus"))
        .await
        .expect("user");
    let image = create_image(&storage, user.user_id, &draft("gone")).await;

    let deleted = storage
        .delete_user_by_external_id("ext_gus")
        .await
        .expect("delete");
    assert_eq!(deleted, Some(user.user_id));
    assert!(storage.get_image(image.image_id).await.expect("get").is_none());
    assert!(storage
        .delete_user_by_external_id("ext_gus")
        .await
        .expect("delete")
        .is_none());
}
