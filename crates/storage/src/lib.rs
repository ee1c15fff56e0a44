use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{ImageId, TransformationType, UserId, DEFAULT_CREDIT_BALANCE, DEFAULT_PLAN_ID},
    protocol::ImageDraft,
    transformation::TransformationConfig,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: UserId,
    pub external_id: String,
    pub email: String,
    pub username: String,
    pub photo: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub plan_id: i64,
    pub credit_balance: i64,
}

/// Profile fields mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfileFields {
    pub email: String,
    pub username: String,
    pub photo: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub image_id: ImageId,
    pub draft: ImageDraft,
    pub author_id: UserId,
    pub author_external_id: String,
    pub author_first_name: Option<String>,
    pub author_last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a write that is only allowed for an existing record's author.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    Done(T),
    NotFound,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Updated { credit_balance: i64 },
    Insufficient { credit_balance: i64 },
    UserNotFound,
}

const IMAGE_SELECT: &str = "SELECT i.id, i.title, i.transformation_type, i.public_id, i.secure_url,
        i.width, i.height, i.config, i.transformation_url, i.aspect_ratio, i.color, i.prompt,
        i.is_private, i.created_at, i.updated_at,
        u.id AS author_id, u.external_id, u.first_name, u.last_name
     FROM images i
     INNER JOIN users u ON u.id = i.author_id";

const USER_SELECT: &str = "SELECT id, external_id, email, username, photo, first_name, last_name, plan_id, credit_balance FROM users";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(
        &self,
        external_id: &str,
        profile: &UserProfileFields,
    ) -> Result<StoredUser> {
        let row = sqlx::query(
            "INSERT INTO users (external_id, email, username, photo, first_name, last_name, plan_id, credit_balance)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, external_id, email, username, photo, first_name, last_name, plan_id, credit_balance",
        )
        .bind(external_id)
        .bind(&profile.email)
        .bind(&profile.username)
        .bind(&profile.photo)
        .bind(profile.first_name.as_deref())
        .bind(profile.last_name.as_deref())
        .bind(DEFAULT_PLAN_ID)
        .bind(DEFAULT_CREDIT_BALANCE)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create user '{external_id}'"))?;
        Ok(user_from_row(&row))
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE id = ?"))
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE external_id = ?"))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn update_user_by_external_id(
        &self,
        external_id: &str,
        profile: &UserProfileFields,
    ) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "UPDATE users
             SET email = ?, username = ?, photo = ?, first_name = ?, last_name = ?
             WHERE external_id = ?
             RETURNING id, external_id, email, username, photo, first_name, last_name, plan_id, credit_balance",
        )
        .bind(&profile.email)
        .bind(&profile.username)
        .bind(&profile.photo)
        .bind(profile.first_name.as_deref())
        .bind(profile.last_name.as_deref())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// Removes the user and every image they authored.
    pub async fn delete_user_by_external_id(&self, external_id: &str) -> Result<Option<UserId>> {
        let mut tx = self.pool.begin().await?;
        let Some(user_id) = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM images WHERE author_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(UserId(user_id)))
    }

    /// Applies a signed credit delta; the balance never drops below zero.
    pub async fn update_credits(&self, user_id: UserId, delta: i64) -> Result<CreditOutcome> {
        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET credit_balance = credit_balance + ?
             WHERE id = ? AND credit_balance + ? >= 0
             RETURNING credit_balance",
        )
        .bind(delta)
        .bind(user_id.0)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(credit_balance) = updated {
            return Ok(CreditOutcome::Updated { credit_balance });
        }

        let current = sqlx::query_scalar::<_, i64>("SELECT credit_balance FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match current {
            Some(credit_balance) => CreditOutcome::Insufficient { credit_balance },
            None => CreditOutcome::UserNotFound,
        })
    }

    /// `NotFound` when the author does not exist.
    pub async fn create_image(
        &self,
        author_id: UserId,
        draft: &ImageDraft,
    ) -> Result<WriteOutcome<StoredImage>> {
        if self.get_user(author_id).await?.is_none() {
            return Ok(WriteOutcome::NotFound);
        }

        let config = encode_config(draft.config.as_ref())?;
        let now = Utc::now();
        let image_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO images (
                title, transformation_type, public_id, secure_url, width, height, config,
                transformation_url, aspect_ratio, color, prompt, author_id, is_private,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&draft.title)
        .bind(draft.transformation_type.key())
        .bind(&draft.public_id)
        .bind(&draft.secure_url)
        .bind(draft.width.map(i64::from))
        .bind(draft.height.map(i64::from))
        .bind(config)
        .bind(draft.transformation_url.as_deref())
        .bind(draft.aspect_ratio.as_deref())
        .bind(draft.color.as_deref())
        .bind(draft.prompt.as_deref())
        .bind(author_id.0)
        .bind(draft.is_private)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert image")?;

        let image = self
            .get_image(ImageId(image_id))
            .await?
            .ok_or_else(|| anyhow!("image {image_id} vanished after insert"))?;
        Ok(WriteOutcome::Done(image))
    }

    pub async fn get_image(&self, image_id: ImageId) -> Result<Option<StoredImage>> {
        let row = sqlx::query(&format!("{IMAGE_SELECT} WHERE i.id = ?"))
            .bind(image_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(image_from_row).transpose()
    }

    /// Replaces the writable fields of an image owned by `acting_user`.
    pub async fn update_image(
        &self,
        acting_user: UserId,
        image_id: ImageId,
        draft: &ImageDraft,
    ) -> Result<WriteOutcome<StoredImage>> {
        let config = encode_config(draft.config.as_ref())?;
        let mut tx = self.pool.begin().await?;
        let author = sqlx::query_scalar::<_, i64>("SELECT author_id FROM images WHERE id = ?")
            .bind(image_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        match author {
            None => return Ok(WriteOutcome::NotFound),
            Some(author) if author != acting_user.0 => return Ok(WriteOutcome::Forbidden),
            Some(_) => {}
        }

        sqlx::query(
            "UPDATE images SET
                title = ?, transformation_type = ?, public_id = ?, secure_url = ?, width = ?,
                height = ?, config = ?, transformation_url = ?, aspect_ratio = ?, color = ?,
                prompt = ?, is_private = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&draft.title)
        .bind(draft.transformation_type.key())
        .bind(&draft.public_id)
        .bind(&draft.secure_url)
        .bind(draft.width.map(i64::from))
        .bind(draft.height.map(i64::from))
        .bind(config)
        .bind(draft.transformation_url.as_deref())
        .bind(draft.aspect_ratio.as_deref())
        .bind(draft.color.as_deref())
        .bind(draft.prompt.as_deref())
        .bind(draft.is_private)
        .bind(Utc::now())
        .bind(image_id.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to update image {image_id}"))?;
        tx.commit().await?;

        let image = self
            .get_image(image_id)
            .await?
            .ok_or_else(|| anyhow!("image {image_id} vanished after update"))?;
        Ok(WriteOutcome::Done(image))
    }

    pub async fn delete_image(
        &self,
        acting_user: UserId,
        image_id: ImageId,
    ) -> Result<WriteOutcome<()>> {
        let mut tx = self.pool.begin().await?;
        let author = sqlx::query_scalar::<_, i64>("SELECT author_id FROM images WHERE id = ?")
            .bind(image_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        match author {
            None => return Ok(WriteOutcome::NotFound),
            Some(author) if author != acting_user.0 => return Ok(WriteOutcome::Forbidden),
            Some(_) => {}
        }
        sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(image_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(WriteOutcome::Done(()))
    }

    /// Author's images, most recently updated first, with the total count.
    pub async fn list_images_by_author(
        &self,
        author_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<StoredImage>, u64)> {
        let rows = sqlx::query(&format!(
            "{IMAGE_SELECT} WHERE i.author_id = ? ORDER BY i.updated_at DESC, i.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(author_id.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE author_id = ?")
            .bind(author_id.0)
            .fetch_one(&self.pool)
            .await?;

        let images = rows.iter().map(image_from_row).collect::<Result<Vec<_>>>()?;
        Ok((images, u64::try_from(total).unwrap_or_default()))
    }

    /// Non-private images, optionally filtered by a case-insensitive title match.
    pub async fn list_public_images(
        &self,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<StoredImage>, u64)> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(&s.to_lowercase())));

        let rows = sqlx::query(&format!(
            "{IMAGE_SELECT}
             WHERE i.is_private = 0 AND (? IS NULL OR lower(i.title) LIKE ? ESCAPE '\\')
             ORDER BY i.updated_at DESC, i.id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM images
             WHERE is_private = 0 AND (? IS NULL OR lower(title) LIKE ? ESCAPE '\\')",
        )
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let images = rows.iter().map(image_from_row).collect::<Result<Vec<_>>>()?;
        Ok((images, u64::try_from(total).unwrap_or_default()))
    }
}

/// Makes `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn encode_config(config: Option<&TransformationConfig>) -> Result<Option<String>> {
    config
        .map(serde_json::to_string)
        .transpose()
        .context("failed to encode transformation config")
}

fn user_from_row(row: &SqliteRow) -> StoredUser {
    StoredUser {
        user_id: UserId(row.get::<i64, _>("id")),
        external_id: row.get("external_id"),
        email: row.get("email"),
        username: row.get("username"),
        photo: row.get("photo"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        plan_id: row.get("plan_id"),
        credit_balance: row.get("credit_balance"),
    }
}

fn image_from_row(row: &SqliteRow) -> Result<StoredImage> {
    let image_id = row.get::<i64, _>("id");
    let kind = row.get::<String, _>("transformation_type");
    let transformation_type = TransformationType::from_str(&kind)
        .with_context(|| format!("image {image_id} has unknown transformation type"))?;
    let config = row
        .get::<Option<String>, _>("config")
        .map(|raw| serde_json::from_str::<TransformationConfig>(&raw))
        .transpose()
        .with_context(|| format!("image {image_id} has malformed config"))?;

    Ok(StoredImage {
        image_id: ImageId(image_id),
        draft: ImageDraft {
            title: row.get("title"),
            transformation_type,
            public_id: row.get("public_id"),
            secure_url: row.get("secure_url"),
            width: dimension(row.get("width")),
            height: dimension(row.get("height")),
            config,
            transformation_url: row.get("transformation_url"),
            aspect_ratio: row.get("aspect_ratio"),
            color: row.get("color"),
            prompt: row.get("prompt"),
            is_private: row.get("is_private"),
        },
        author_id: UserId(row.get::<i64, _>("author_id")),
        author_external_id: row.get("external_id"),
        author_first_name: row.get("first_name"),
        author_last_name: row.get("last_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn dimension(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
