//! Blocks and reports.
//!
//! A block in either direction hides the blocker's and blocked user's
//! moments from each other and stops either from joining the other's table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use tracing::info;

use ginmai_shared::types::{BlockId, MomentId, ReportCategory, ReportId, ReportStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Block, Report};
use crate::moments::load_moment;
use crate::rows::{get_enum, get_id, get_opt_id, get_ts, ts};

const MAX_REPORT_CHARS: usize = 1000;

/// Input for [`Database::submit_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub reporter_id: UserId,
    pub reported_user_id: UserId,
    pub moment_id: Option<MomentId>,
    pub category: ReportCategory,
    pub description: Option<String>,
}

impl Database {
    /// Block another user. Blocking twice returns the existing record.
    pub fn block_user(&self, blocker: UserId, blocked: UserId, now: DateTime<Utc>) -> Result<Block> {
        if blocker == blocked {
            return Err(StoreError::validation("you cannot block yourself"));
        }

        let inserted = self.conn().execute(
            "INSERT INTO blocks (id, blocker_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(blocker_id, blocked_id) DO NOTHING",
            params![
                BlockId::new().to_string(),
                blocker.to_string(),
                blocked.to_string(),
                ts(&now)
            ],
        )?;
        if inserted > 0 {
            info!(blocker = %blocker, blocked = %blocked, "user blocked");
        }

        self.conn()
            .query_row(
                "SELECT id, blocker_id, blocked_id, created_at
                 FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                params![blocker.to_string(), blocked.to_string()],
                row_to_block,
            )
            .optional()?
            .ok_or(StoreError::NotFound("block"))
    }

    /// Remove a block. Returns whether one existed.
    pub fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker.to_string(), blocked.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Users `blocker` has blocked, newest first.
    pub fn list_blocks(&self, blocker: UserId) -> Result<Vec<Block>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, blocker_id, blocked_id, created_at
             FROM blocks WHERE blocker_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![blocker.to_string()], row_to_block)?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Whether either user has blocked the other.
    pub fn is_blocked(&self, a: UserId, b: UserId) -> Result<bool> {
        is_blocked_pair(self.conn(), a, b)
    }

    pub fn submit_report(&self, new: &NewReport, now: DateTime<Utc>) -> Result<Report> {
        if new.reporter_id == new.reported_user_id {
            return Err(StoreError::validation("you cannot report yourself"));
        }
        let description = new
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if description
            .as_deref()
            .is_some_and(|d| d.chars().count() > MAX_REPORT_CHARS)
        {
            return Err(StoreError::validation(format!(
                "description must be at most {MAX_REPORT_CHARS} characters"
            )));
        }
        if let Some(moment) = new.moment_id {
            load_moment(self.conn(), moment)?;
        }

        let report = Report {
            id: ReportId::new(),
            reporter_id: new.reporter_id,
            reported_user_id: new.reported_user_id,
            moment_id: new.moment_id,
            category: new.category,
            description,
            status: ReportStatus::Pending,
            created_at: now,
        };

        self.conn().execute(
            "INSERT INTO reports
                (id, reporter_id, reported_user_id, moment_id, category, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.id.to_string(),
                report.reporter_id.to_string(),
                report.reported_user_id.to_string(),
                report.moment_id.map(|m| m.to_string()),
                report.category.as_str(),
                report.description,
                report.status.as_str(),
                ts(&report.created_at),
            ],
        )?;

        info!(
            report = %report.id,
            reported = %report.reported_user_id,
            category = %report.category,
            "report submitted"
        );

        Ok(report)
    }

    /// Reports filed by `reporter`, newest first.
    pub fn list_user_reports(&self, reporter: UserId) -> Result<Vec<Report>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, reporter_id, reported_user_id, moment_id, category, description, status, created_at
             FROM reports WHERE reporter_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![reporter.to_string()], |row| {
            Ok(Report {
                id: get_id(row, 0)?,
                reporter_id: get_id(row, 1)?,
                reported_user_id: get_id(row, 2)?,
                moment_id: get_opt_id(row, 3)?,
                category: get_enum(row, 4)?,
                description: row.get(5)?,
                status: get_enum(row, 6)?,
                created_at: get_ts(row, 7)?,
            })
        })?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row?);
        }
        Ok(reports)
    }
}

pub(crate) fn is_blocked_pair(conn: &SqlConnection, a: UserId, b: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM blocks
             WHERE (blocker_id = ?1 AND blocked_id = ?2)
                OR (blocker_id = ?2 AND blocked_id = ?1)
             LIMIT 1",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: get_id(row, 0)?,
        blocker_id: get_id(row, 1)?,
        blocked_id: get_id(row, 2)?,
        created_at: get_ts(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use ginmai_shared::Conflict;

    use super::*;
    use crate::models::ActiveQuery;
    use crate::moments::tests::{bangkok, new_moment, now};

    #[test]
    fn block_is_idempotent_and_reversible() {
        let db = Database::open_in_memory().unwrap();
        let (me, them) = (UserId::new(), UserId::new());

        let first = db.block_user(me, them, now()).unwrap();
        let again = db.block_user(me, them, now()).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(db.list_blocks(me).unwrap().len(), 1);
        assert!(db.is_blocked(them, me).unwrap());

        assert!(db.unblock_user(me, them).unwrap());
        assert!(!db.unblock_user(me, them).unwrap());
        assert!(!db.is_blocked(me, them).unwrap());
    }

    #[test]
    fn blocked_hosts_are_hidden_and_unjoinable() {
        let mut db = Database::open_in_memory().unwrap();
        let host = UserId::new();
        let viewer = UserId::new();
        let moment = db.create_moment(&new_moment(host, 2), now()).unwrap();

        // The host blocked the viewer; the hide works in both directions.
        db.block_user(host, viewer, now()).unwrap();

        let mut query = ActiveQuery::near(bangkok());
        query.viewer = Some(viewer);
        assert!(db.list_active(&query, now()).unwrap().is_empty());

        query.viewer = Some(UserId::new());
        assert_eq!(db.list_active(&query, now()).unwrap().len(), 1);

        let err = db.join(moment.id, viewer, now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::Blocked)));
        assert_eq!(db.get_moment(moment.id).unwrap().seats_taken, 0);
    }

    #[test]
    fn reports_are_listed_for_their_author() {
        let db = Database::open_in_memory().unwrap();
        let host = UserId::new();
        let me = UserId::new();
        let moment = db.create_moment(&new_moment(host, 2), now()).unwrap();

        let report = db
            .submit_report(
                &NewReport {
                    reporter_id: me,
                    reported_user_id: host,
                    moment_id: Some(moment.id),
                    category: ReportCategory::NoShow,
                    description: Some("  never came  ".into()),
                },
                now(),
            )
            .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.description.as_deref(), Some("never came"));

        let mine = db.list_user_reports(me).unwrap();
        assert_eq!(mine, vec![report]);
        assert!(db.list_user_reports(host).unwrap().is_empty());
    }

    #[test]
    fn report_about_unknown_moment_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .submit_report(
                &NewReport {
                    reporter_id: UserId::new(),
                    reported_user_id: UserId::new(),
                    moment_id: Some(MomentId::new()),
                    category: ReportCategory::Other,
                    description: None,
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound("moment")));
    }
}
