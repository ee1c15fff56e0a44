use serde_json::json;
use shared::{
    domain::{TransformationType, TRANSFORMATION_CREDIT_FEE},
    protocol::ImageDraft,
    transformation::{deep_merge, TransformationConfig},
};
use storage::{CreditOutcome, Storage, UserProfileFields, WriteOutcome};

fn config(value: serde_json::Value) -> TransformationConfig {
    TransformationConfig::from_value(value).expect("object")
}

#[tokio::test]
async fn recolor_session_charges_credits_and_persists_merged_config() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let author = storage
        .create_user(
            "ext_painter",
            &UserProfileFields {
                email: "painter@example.com".into(),
                username: "painter".into(),
                photo: "https://img.example.com/painter.png".into(),
                first_name: Some("Pat".into()),
                last_name: None,
            },
        )
        .await
        .expect("user");

    let first = config(json!({ "recolor": { "prompt": "car", "to": "red", "multiple": true } }));
    let second = config(json!({ "recolor": { "to": "blue" } }));
    let merged = deep_merge(Some(&second), Some(&first));

    for _ in 0..2 {
        let outcome = storage
            .update_credits(author.user_id, -TRANSFORMATION_CREDIT_FEE)
            .await
            .expect("charge");
        assert!(matches!(outcome, CreditOutcome::Updated { .. }));
    }

    let mut draft = ImageDraft {
        title: "red car".into(),
        transformation_type: TransformationType::Recolor,
        public_id: "imaginify/car".into(),
        secure_url: "https://res.cloudinary.com/demo/image/upload/imaginify/car".into(),
        width: Some(1000),
        height: Some(1334),
        config: Some(first),
        transformation_url: None,
        aspect_ratio: Some("3:4".into()),
        color: Some("red".into()),
        prompt: Some("car".into()),
        is_private: true,
    };
    let WriteOutcome::Done(created) = storage
        .create_image(author.user_id, &draft)
        .await
        .expect("create")
    else {
        panic!("author exists");
    };

    draft.title = "blue car".into();
    draft.color = Some("blue".into());
    draft.config = merged.clone();
    let WriteOutcome::Done(updated) = storage
        .update_image(author.user_id, created.image_id, &draft)
        .await
        .expect("update")
    else {
        panic!("author may update");
    };

    let stored = storage
        .get_image(created.image_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.draft.config, merged);
    assert_eq!(
        stored.draft.config,
        Some(config(json!({ "recolor": { "prompt": "car", "to": "blue", "multiple": true } })))
    );
    assert_eq!(stored.draft.title, "blue car");
    assert!(stored.draft.is_private);
    assert_eq!(stored.author_first_name.as_deref(), Some("Pat"));
    assert!(updated.updated_at >= created.updated_at);

    let (public, total) = storage
        .list_public_images(None, 9, 0)
        .await
        .expect("public");
    assert!(public.is_empty());
    assert_eq!(total, 0);

    let user = storage
        .get_user(author.user_id)
        .await
        .expect("get user")
        .expect("user");
    assert_eq!(user.credit_balance, 8);

    storage
        .delete_user_by_external_id("ext_painter")
        .await
        .expect("delete")
        .expect("deleted");
    assert!(storage
        .get_image(created.image_id)
        .await
        .expect("get")
        .is_none());
}
