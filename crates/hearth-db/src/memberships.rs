use crate::{DbError, DbPool};

pub async fn add_membership(pool: &DbPool, user_id: i64, room_id: i64) -> Result<(), DbError> {
    sqlx::query("INSERT INTO memberships (user_id, room_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .bind(room_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn is_member(pool: &DbPool, user_id: i64, room_id: i64) -> Result<bool, DbError> {
    let row: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM memberships WHERE user_id = ?1 AND room_id = ?2")
            .bind(user_id)
            .bind(room_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub async fn list_room_ids_for_user(pool: &DbPool, user_id: i64) -> Result<Vec<i64>, DbError> {
    let ids = sqlx::query_scalar(
        "SELECT room_id FROM memberships WHERE user_id = ?1 ORDER BY room_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
