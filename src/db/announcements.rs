//! In-app announcements, shown on the user dashboard.

use super::{AnnouncementRow, Database};
use crate::ledger::{LedgerError, Result};

const ANNOUNCEMENT_COLS: &str = "id, title, body, is_active, created_at";

impl Database {
    pub async fn list_announcements(&self, include_inactive: bool) -> Result<Vec<AnnouncementRow>> {
        let sql = if include_inactive {
            format!("SELECT {ANNOUNCEMENT_COLS} FROM announcements ORDER BY created_at DESC")
        } else {
            format!(
                "SELECT {ANNOUNCEMENT_COLS} FROM announcements WHERE is_active \
                 ORDER BY created_at DESC"
            )
        };
        Ok(sqlx::query_as::<_, AnnouncementRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn create_announcement(&self, title: &str, body: &str) -> Result<AnnouncementRow> {
        if title.trim().is_empty() {
            return Err(LedgerError::validation("title", "must not be empty"));
        }
        Ok(sqlx::query_as::<_, AnnouncementRow>(&format!(
            "INSERT INTO announcements (title, body) VALUES ($1, $2) \
             RETURNING {ANNOUNCEMENT_COLS}"
        ))
        .bind(title.trim())
        .bind(body)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn update_announcement(
        &self,
        id: i64,
        title: &str,
        body: &str,
        is_active: bool,
    ) -> Result<AnnouncementRow> {
        if title.trim().is_empty() {
            return Err(LedgerError::validation("title", "must not be empty"));
        }
        sqlx::query_as::<_, AnnouncementRow>(&format!(
            "UPDATE announcements SET title = $2, body = $3, is_active = $4 \
             WHERE id = $1 RETURNING {ANNOUNCEMENT_COLS}"
        ))
        .bind(id)
        .bind(title.trim())
        .bind(body)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("announcement"))
    }

    pub async fn delete_announcement(&self, id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM announcements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::NotFound("announcement"));
        }
        Ok(())
    }
}
