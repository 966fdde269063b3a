use sqlx::{Pool, Sqlite};
use uuid::Uuid;
use crate::db::models::User;
use crate::error::AppError;

pub struct UserRepository;

impl UserRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        email: &str,
        full_name: &str,
        password_hash: &str,
    ) -> Result<User, AppError> {
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().timestamp_millis();

        let user = sqlx::query_as::<_, User>(
            r#"
INSERT INTO users (id, email, full_name, password_hash, profile_pic, created_at)
VALUES (?, ?, ?, ?, '', ?)
RETURNING *
            "#,
        )
        .bind(&id)
        .bind(email)
        .bind(full_name)
        .bind(password_hash)
        .bind(created_at)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn get_by_email(
        pool: &Pool<Sqlite>,
        email: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email = ?"
        )
        .bind(email)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn get_by_id(
        pool: &Pool<Sqlite>,
        id: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Everyone except `id`, for the sidebar
    pub async fn list_except(
        pool: &Pool<Sqlite>,
        id: &str,
    ) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id != ? ORDER BY full_name ASC"
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(users)
    }

    pub async fn update_profile_pic(
        pool: &Pool<Sqlite>,
        id: &str,
        profile_pic: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET profile_pic = ? WHERE id = ? RETURNING *"
        )
        .bind(profile_pic)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }
}
