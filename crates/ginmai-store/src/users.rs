//! User profiles and derived participation statistics.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use ginmai_shared::constants::FALLBACK_DISPLAY_NAME;
use ginmai_shared::reliability::{self, ReliabilityStats};
use ginmai_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{User, UserStats};
use crate::rows::{get_id, get_ts, ts};

const MAX_FIRST_NAME_CHARS: usize = 40;

impl Database {
    /// Insert or update a profile. `created_at` is kept on update.
    pub fn upsert_user(
        &self,
        id: UserId,
        first_name: &str,
        push_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let first_name = first_name.trim();
        if first_name.is_empty() {
            return Err(StoreError::validation("first name must not be empty"));
        }
        if first_name.chars().count() > MAX_FIRST_NAME_CHARS {
            return Err(StoreError::validation(format!(
                "first name must be at most {MAX_FIRST_NAME_CHARS} characters"
            )));
        }

        self.conn().execute(
            "INSERT INTO users (id, first_name, push_token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                push_token = COALESCE(excluded.push_token, users.push_token),
                updated_at = excluded.updated_at",
            params![id.to_string(), first_name, push_token, ts(&now)],
        )?;

        tracing::debug!(user = %id, "profile saved");

        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, first_name, push_token, created_at, updated_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(User {
                        id: get_id(row, 0)?,
                        first_name: row.get(1)?,
                        push_token: row.get(2)?,
                        created_at: get_ts(row, 3)?,
                        updated_at: get_ts(row, 4)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound("user"))
    }

    /// First name for notifications, or the generic fallback.
    pub fn display_name(&self, id: UserId) -> Result<String> {
        match self.get_user(id) {
            Ok(user) => Ok(user.first_name),
            Err(StoreError::NotFound(_)) => Ok(FALLBACK_DISPLAY_NAME.to_string()),
            Err(e) => Err(e),
        }
    }

    pub fn push_token(&self, id: UserId) -> Result<Option<String>> {
        let token: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT push_token FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.flatten())
    }

    /// Hosted, joined and no-show counts, derived from the ledger.
    pub fn user_stats(&self, id: UserId) -> Result<UserStats> {
        let user = id.to_string();
        let conn = self.conn();

        let meals_hosted: u32 = conn.query_row(
            "SELECT COUNT(*) FROM moments WHERE host_id = ?1 AND status = 'completed'",
            params![user],
            |row| row.get(0),
        )?;
        let meals_joined: u32 = conn.query_row(
            "SELECT COUNT(*) FROM connections
             WHERE user_id = ?1 AND status IN ('completed', 'arrived', 'no_show')",
            params![user],
            |row| row.get(0),
        )?;
        let no_shows: u32 = conn.query_row(
            "SELECT COUNT(*) FROM connections WHERE user_id = ?1 AND status = 'no_show'",
            params![user],
            |row| row.get(0),
        )?;

        Ok(UserStats {
            meals_hosted,
            meals_joined,
            no_shows,
        })
    }

    pub fn reliability(&self, id: UserId) -> Result<ReliabilityStats> {
        let stats = self.user_stats(id)?;
        Ok(reliability::score(
            stats.meals_hosted,
            stats.meals_joined,
            stats.no_shows,
        ))
    }
}
