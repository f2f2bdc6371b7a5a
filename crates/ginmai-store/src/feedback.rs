//! Post-meal feedback and mutual "eat again" matches.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use tracing::info;

use ginmai_shared::constants::FALLBACK_DISPLAY_NAME;
use ginmai_shared::types::{FeedbackId, MatchId, MomentId, UserId};
use ginmai_shared::Conflict;

use crate::database::Database;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::models::{
    canonical_pair, validate_note, EatAgainMatch, Feedback, MatchOutcome, MatchedUser, Moment,
    NewFeedback,
};
use crate::moments::load_moment;
use crate::rows::{get_id, get_ts, ts};

impl Database {
    /// Store one user's rating of another for a shared moment.
    ///
    /// Both users must have taken part, either as host or as a guest who
    /// held a seat. One record per (moment, from, about).
    pub fn record_feedback(&self, new: &NewFeedback, now: DateTime<Utc>) -> Result<Feedback> {
        insert_feedback(self.conn(), new, now)
    }

    /// Create a match when both users said they would eat together again.
    ///
    /// Safe to call from both sides at once; the pair is stored in
    /// canonical order and the unique key settles who wins.
    pub fn detect_and_record_match(
        &mut self,
        moment: MomentId,
        a: UserId,
        b: UserId,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome> {
        let tx = self.write_tx()?;
        let outcome = record_match(&tx, moment, a, b, now)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Record feedback and, for an "eat again", check for a match in the
    /// same transaction. Either both land or neither does.
    pub fn submit_feedback(
        &mut self,
        new: &NewFeedback,
        now: DateTime<Utc>,
    ) -> Result<(Feedback, MatchOutcome)> {
        let tx = self.write_tx()?;
        let feedback = insert_feedback(&tx, new, now)?;
        let outcome = if feedback.eat_again == Some(true) {
            record_match(&tx, feedback.moment_id, feedback.from_user, feedback.about_user, now)?
        } else {
            MatchOutcome::NotReciprocated
        };
        tx.commit()?;
        Ok((feedback, outcome))
    }

    /// Matches involving `user`, newest first.
    pub fn list_user_matches(&self, user: UserId) -> Result<Vec<EatAgainMatch>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_a_id, user_b_id, moment_id, matched_at
             FROM eat_again_matches
             WHERE user_a_id = ?1 OR user_b_id = ?1
             ORDER BY matched_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            Ok(EatAgainMatch {
                id: get_id(row, 0)?,
                user_a: get_id(row, 1)?,
                user_b: get_id(row, 2)?,
                moment_id: get_id(row, 3)?,
                matched_at: get_ts(row, 4)?,
            })
        })?;

        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?);
        }
        Ok(matches)
    }

    /// Matches grouped per counterpart, most recent meal first.
    pub fn matched_users(&self, user: UserId) -> Result<Vec<MatchedUser>> {
        let mut grouped: HashMap<UserId, MatchedUser> = HashMap::new();

        for m in self.list_user_matches(user)? {
            let other = m.other(user);
            let entry = grouped.entry(other).or_insert_with(|| MatchedUser {
                user_id: other,
                first_name: String::new(),
                total_meals_together: 0,
                last_meal_together: m.matched_at,
            });
            entry.total_meals_together += 1;
            if m.matched_at > entry.last_meal_together {
                entry.last_meal_together = m.matched_at;
            }
        }

        let mut users: Vec<MatchedUser> = grouped.into_values().collect();
        for u in &mut users {
            u.first_name = self
                .conn()
                .query_row(
                    "SELECT first_name FROM users WHERE id = ?1",
                    params![u.user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
        }
        users.sort_by(|x, y| y.last_meal_together.cmp(&x.last_meal_together));

        Ok(users)
    }
}

fn insert_feedback(conn: &SqlConnection, new: &NewFeedback, now: DateTime<Utc>) -> Result<Feedback> {
    if new.from_user == new.about_user {
        return Err(StoreError::validation("you cannot rate yourself"));
    }
    validate_note(new.note.as_deref())?;

    let moment = load_moment(conn, new.moment_id)?;
    if !is_participant(conn, &moment, new.from_user)?
        || !is_participant(conn, &moment, new.about_user)?
    {
        return Err(Conflict::NotConnected.into());
    }

    let feedback = Feedback {
        id: FeedbackId::new(),
        moment_id: new.moment_id,
        from_user: new.from_user,
        about_user: new.about_user,
        rating: new.rating,
        eat_again: new.eat_again,
        note: new
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        created_at: now,
    };

    conn.execute(
        "INSERT INTO feedback
            (id, moment_id, from_user, about_user, rating, eat_again, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            feedback.id.to_string(),
            feedback.moment_id.to_string(),
            feedback.from_user.to_string(),
            feedback.about_user.to_string(),
            feedback.rating.as_str(),
            feedback.eat_again,
            feedback.note,
            ts(&feedback.created_at),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict(Conflict::DuplicateFeedback)
        } else {
            StoreError::Sqlite(e)
        }
    })?;

    info!(
        moment = %feedback.moment_id,
        from = %feedback.from_user,
        rating = %feedback.rating,
        "feedback recorded"
    );

    Ok(feedback)
}

/// A failed insert on the unique pair only aborts that statement, so the
/// surrounding transaction stays usable after `AlreadyMatched`.
fn record_match(
    conn: &SqlConnection,
    moment: MomentId,
    a: UserId,
    b: UserId,
    now: DateTime<Utc>,
) -> Result<MatchOutcome> {
    if a == b {
        return Ok(MatchOutcome::NotReciprocated);
    }

    let mutual: i64 = conn.query_row(
        "SELECT COUNT(*) FROM feedback
         WHERE moment_id = ?1 AND eat_again = 1
           AND ((from_user = ?2 AND about_user = ?3) OR (from_user = ?3 AND about_user = ?2))",
        params![moment.to_string(), a.to_string(), b.to_string()],
        |row| row.get(0),
    )?;
    if mutual < 2 {
        return Ok(MatchOutcome::NotReciprocated);
    }

    let (user_a, user_b) = canonical_pair(a, b);
    let matched = EatAgainMatch {
        id: MatchId::new(),
        user_a,
        user_b,
        moment_id: moment,
        matched_at: now,
    };

    let inserted = conn.execute(
        "INSERT INTO eat_again_matches (id, user_a_id, user_b_id, moment_id, matched_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            matched.id.to_string(),
            matched.user_a.to_string(),
            matched.user_b.to_string(),
            matched.moment_id.to_string(),
            ts(&matched.matched_at),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Ok(MatchOutcome::AlreadyMatched),
        Err(e) => return Err(e.into()),
    }

    info!(moment = %moment, user_a = %user_a, user_b = %user_b, "eat-again match");

    Ok(MatchOutcome::Created { matched })
}

fn is_participant(conn: &SqlConnection, moment: &Moment, user: UserId) -> Result<bool> {
    if moment.is_hosted_by(user) {
        return Ok(true);
    }
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM connections
             WHERE moment_id = ?1 AND user_id = ?2
               AND status IN ('confirmed', 'arrived', 'completed')
             LIMIT 1",
            params![moment.id.to_string(), user.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use ginmai_shared::types::Rating;

    use super::*;
    use crate::moments::tests::{new_moment, now};

    struct Table {
        db: Database,
        moment: MomentId,
        host: UserId,
        guest: UserId,
    }

    fn shared_meal() -> Table {
        let mut db = Database::open_in_memory().unwrap();
        let host = UserId::new();
        let moment = db.create_moment(&new_moment(host, 2), now()).unwrap();
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();
        Table {
            db,
            moment: moment.id,
            host,
            guest,
        }
    }

    fn rate(t: &Table, from: UserId, about: UserId, eat_again: Option<bool>) -> Result<Feedback> {
        t.db.record_feedback(
            &NewFeedback {
                moment_id: t.moment,
                from_user: from,
                about_user: about,
                rating: Rating::Great,
                eat_again,
                note: None,
            },
            now(),
        )
    }

    #[test]
    fn duplicate_feedback_is_rejected() {
        let t = shared_meal();
        rate(&t, t.guest, t.host, Some(true)).unwrap();
        let err = rate(&t, t.guest, t.host, Some(false)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::DuplicateFeedback)));
    }

    #[test]
    fn outsiders_cannot_leave_feedback() {
        let t = shared_meal();
        let stranger = UserId::new();
        assert!(matches!(
            rate(&t, stranger, t.host, None),
            Err(StoreError::Conflict(Conflict::NotConnected))
        ));
        assert!(matches!(
            rate(&t, t.host, stranger, None),
            Err(StoreError::Conflict(Conflict::NotConnected))
        ));
    }

    #[test]
    fn self_feedback_is_invalid() {
        let t = shared_meal();
        assert!(matches!(rate(&t, t.host, t.host, None), Err(StoreError::Validation(_))));
    }

    #[test]
    fn one_sided_eat_again_does_not_match() {
        let mut t = shared_meal();
        rate(&t, t.guest, t.host, Some(true)).unwrap();
        rate(&t, t.host, t.guest, Some(false)).unwrap();

        let outcome = t
            .db
            .detect_and_record_match(t.moment, t.guest, t.host, now())
            .unwrap();
        assert_eq!(outcome, MatchOutcome::NotReciprocated);
        assert!(t.db.list_user_matches(t.host).unwrap().is_empty());
    }

    #[test]
    fn mutual_eat_again_matches_once() {
        let mut t = shared_meal();
        rate(&t, t.guest, t.host, Some(true)).unwrap();
        rate(&t, t.host, t.guest, Some(true)).unwrap();

        let first = t
            .db
            .detect_and_record_match(t.moment, t.host, t.guest, now())
            .unwrap();
        let MatchOutcome::Created { matched } = first else {
            panic!("expected a new match, got {first:?}");
        };
        assert!(matched.user_a < matched.user_b);

        // Detection from the other side finds the existing row.
        let second = t
            .db
            .detect_and_record_match(t.moment, t.guest, t.host, now())
            .unwrap();
        assert_eq!(second, MatchOutcome::AlreadyMatched);
        assert_eq!(t.db.list_user_matches(t.guest).unwrap().len(), 1);
    }

    #[test]
    fn matched_users_aggregates_per_counterpart() {
        let mut t = shared_meal();
        t.db.upsert_user(t.host, "Nok", None, now()).unwrap();
        rate(&t, t.guest, t.host, Some(true)).unwrap();
        rate(&t, t.host, t.guest, Some(true)).unwrap();
        t.db.detect_and_record_match(t.moment, t.host, t.guest, now())
            .unwrap();

        let users = t.db.matched_users(t.guest).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, t.host);
        assert_eq!(users[0].first_name, "Nok");
        assert_eq!(users[0].total_meals_together, 1);
    }

    fn eat_again(t: &Table, from: UserId, about: UserId) -> NewFeedback {
        NewFeedback {
            moment_id: t.moment,
            from_user: from,
            about_user: about,
            rating: Rating::Great,
            eat_again: Some(true),
            note: None,
        }
    }

    fn feedback_count(db: &Database, from: UserId) -> i64 {
        db.conn()
            .query_row(
                "SELECT COUNT(*) FROM feedback WHERE from_user = ?1",
                params![from.to_string()],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn submit_feedback_matches_in_one_step() {
        let mut t = shared_meal();
        let (_, first) = t.db.submit_feedback(&eat_again(&t, t.guest, t.host), now()).unwrap();
        assert_eq!(first, MatchOutcome::NotReciprocated);

        let (_, second) = t.db.submit_feedback(&eat_again(&t, t.host, t.guest), now()).unwrap();
        assert!(matches!(second, MatchOutcome::Created { .. }));
        assert_eq!(t.db.list_user_matches(t.guest).unwrap().len(), 1);
    }

    #[test]
    fn failed_match_detection_keeps_feedback_retryable() {
        let mut t = shared_meal();
        t.db.submit_feedback(&eat_again(&t, t.guest, t.host), now()).unwrap();

        // Break the match table so detection fails after the insert.
        t.db.conn()
            .execute_batch("ALTER TABLE eat_again_matches RENAME TO matches_gone")
            .unwrap();
        assert!(t.db.submit_feedback(&eat_again(&t, t.host, t.guest), now()).is_err());
        assert_eq!(feedback_count(&t.db, t.host), 0);

        t.db.conn()
            .execute_batch("ALTER TABLE matches_gone RENAME TO eat_again_matches")
            .unwrap();
        let (_, outcome) = t.db.submit_feedback(&eat_again(&t, t.host, t.guest), now()).unwrap();
        assert!(matches!(outcome, MatchOutcome::Created { .. }));
    }
}
