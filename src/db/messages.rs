use sqlx::{Pool, Sqlite};
use uuid::Uuid;
use crate::db::models::Message;
use crate::error::AppError;

pub struct MessageRepository;

impl MessageRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        sender_id: &str,
        receiver_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        let message = sqlx::query_as::<_, Message>(
            r#"
INSERT INTO messages (id, sender_id, receiver_id, text, image, edited, deleted, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
RETURNING *
            "#,
        )
        .bind(&id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(text)
        .bind(image)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(message)
    }

    pub async fn get_by_id(
        pool: &Pool<Sqlite>,
        id: &str,
    ) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// Full history between two users, oldest first
    pub async fn list_conversation(
        pool: &Pool<Sqlite>,
        user_id: &str,
        peer_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
SELECT * FROM messages
WHERE (sender_id = ? AND receiver_id = ?)
   OR (sender_id = ? AND receiver_id = ?)
ORDER BY created_at ASC, rowid ASC
            "#
        )
        .bind(user_id)
        .bind(peer_id)
        .bind(peer_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    pub async fn update_text(
        pool: &Pool<Sqlite>,
        id: &str,
        text: Option<&str>,
    ) -> Result<Option<Message>, AppError> {
        let now = chrono::Utc::now().timestamp_millis();

        let message = sqlx::query_as::<_, Message>(
            r#"
UPDATE messages SET text = ?, edited = 1, updated_at = ?
WHERE id = ? AND deleted = 0
RETURNING *
            "#
        )
        .bind(text)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// Tombstone a message. Content is cleared, the row stays.
    pub async fn mark_deleted(
        pool: &Pool<Sqlite>,
        id: &str,
    ) -> Result<Option<Message>, AppError> {
        let now = chrono::Utc::now().timestamp_millis();

        let message = sqlx::query_as::<_, Message>(
            r#"
UPDATE messages SET deleted = 1, text = NULL, image = NULL, updated_at = ?
WHERE id = ?
RETURNING *
            "#
        )
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }
}
