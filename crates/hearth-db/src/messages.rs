use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for MessageRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            user_id: row.try_get("user_id")?,
            content: row.try_get("content")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

/// A message joined with its author's email, as replayed in history batches.
#[derive(Debug, Clone)]
pub struct MessageWithAuthorRow {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for MessageWithAuthorRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            user_id: row.try_get("user_id")?,
            user_email: row.try_get("user_email")?,
            content: row.try_get("content")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

/// The durable id is assigned here by the storage layer; rowid autoincrement
/// keeps it monotonic within every room.
pub async fn insert_message(
    pool: &DbPool,
    room_id: i64,
    user_id: i64,
    content: &str,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (room_id, user_id, content, created_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id, room_id, user_id, content, created_at",
    )
    .bind(room_id)
    .bind(user_id)
    .bind(content)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// The most recent `limit` messages for a room, oldest first. Fetches the
/// newest N then reverses, so the batch is chronological regardless of how
/// much history the room holds.
pub async fn list_recent_messages(
    pool: &DbPool,
    room_id: i64,
    limit: i64,
) -> Result<Vec<MessageWithAuthorRow>, DbError> {
    let mut rows = sqlx::query_as::<_, MessageWithAuthorRow>(
        "SELECT m.id, m.room_id, m.user_id, u.email AS user_email, m.content, m.created_at
         FROM messages m
         INNER JOIN users u ON u.id = m.user_id
         WHERE m.room_id = $1
         ORDER BY m.id DESC
         LIMIT $2",
    )
    .bind(room_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}
