use crate::{DbError, DbPool};
use hearth_models::Room;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub created_by: Option<i64>,
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Room {
            id: row.id,
            name: row.name,
            description: row.description,
            is_public: row.is_public,
            created_by: row.created_by,
        }
    }
}

pub async fn create_room(
    pool: &DbPool,
    name: &str,
    description: Option<&str>,
    created_by: i64,
) -> Result<RoomRow, DbError> {
    let row = sqlx::query_as::<_, RoomRow>(
        "INSERT INTO rooms (name, description, is_public, created_by) VALUES (?1, ?2, 1, ?3)
         RETURNING id, name, description, is_public, created_by",
    )
    .bind(name)
    .bind(description)
    .bind(created_by)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_room(pool: &DbPool, room_id: i64) -> Result<Option<RoomRow>, DbError> {
    let row = sqlx::query_as::<_, RoomRow>(
        "SELECT id, name, description, is_public, created_by FROM rooms WHERE id = ?1",
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_rooms(pool: &DbPool) -> Result<Vec<RoomRow>, DbError> {
    let rows = sqlx::query_as::<_, RoomRow>(
        "SELECT id, name, description, is_public, created_by FROM rooms ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Rooms the user holds a membership in, for the `auth:ok` payload.
pub async fn list_rooms_for_user(pool: &DbPool, user_id: i64) -> Result<Vec<RoomRow>, DbError> {
    let rows = sqlx::query_as::<_, RoomRow>(
        "SELECT r.id, r.name, r.description, r.is_public, r.created_by
         FROM memberships m
         INNER JOIN rooms r ON r.id = m.room_id
         WHERE m.user_id = ?1
         ORDER BY r.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
