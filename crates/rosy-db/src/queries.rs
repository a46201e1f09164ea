use std::collections::BTreeSet;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use rosy_types::models::{ProofOutcome, ProofSubmission, RewardTransaction, User};

use crate::Database;
use crate::models::{ProofRow, RewardRow, UserRow};

/// Outcome of [`Database::apply_reward`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardApplied {
    Credited(User),
    AlreadyCredited,
    UnknownUser,
    UnknownSubmission,
    /// The stored submission has already been settled some other way.
    NotPending(ProofOutcome),
}

impl Database {
    // -- Users --

    pub fn get_user(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, email)?.map(user_from_row).transpose())
    }

    /// Loads the profile for a freshly verified email, creating it on first login.
    pub fn login_user(&self, email: &str) -> Result<User> {
        self.with_conn_mut(|conn| {
            let fresh = User::new(email);
            conn.execute(
                "INSERT OR IGNORE INTO users (email, name) VALUES (?1, ?2)",
                (&fresh.email, &fresh.name),
            )?;
            conn.execute(
                "UPDATE users SET updated_at = datetime('now') WHERE email = ?1",
                [email],
            )?;
            let row = query_user(conn, email)?.ok_or_else(|| anyhow!("User vanished: {}", email))?;
            user_from_row(row)
        })
    }

    // -- Proof submissions --

    pub fn insert_proof(&self, proof: &ProofSubmission) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO proof_submissions (id, user_email, image_ref, filename, outcome, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    proof.id.to_string(),
                    &proof.user_email,
                    &proof.image_ref,
                    &proof.filename,
                    proof.outcome.as_str(),
                    proof.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Records a rejection. Only pending rows move; returns whether one did.
    pub fn reject_proof(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE proof_submissions SET outcome = 'rejected' WHERE id = ?1 AND outcome = 'pending'",
                [id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_proof(&self, id: Uuid) -> Result<Option<ProofSubmission>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_email, image_ref, filename, outcome, created_at
                 FROM proof_submissions WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([id.to_string()], |row| {
                    Ok(ProofRow {
                        id: row.get(0)?,
                        user_email: row.get(1)?,
                        image_ref: row.get(2)?,
                        filename: row.get(3)?,
                        outcome: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .optional()?;
            row.map(proof_from_row).transpose()
        })
    }

    // -- Rewards --

    /// Credits one accepted submission in a single SQL transaction: the
    /// counter update, the ledger row and the submission's outcome move
    /// together or not at all. `award` may add badges to the updated user.
    pub fn apply_reward<F>(&self, reward: &RewardTransaction, award: F) -> Result<RewardApplied>
    where
        F: FnOnce(&mut User),
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if reward_exists(&tx, reward.submission_id)? {
                return Ok(RewardApplied::AlreadyCredited);
            }
            let Some(row) = query_user(&tx, &reward.user_email)? else {
                return Ok(RewardApplied::UnknownUser);
            };
            let stored: Option<String> = tx
                .query_row(
                    "SELECT outcome FROM proof_submissions WHERE id = ?1 AND user_email = ?2",
                    (reward.submission_id.to_string(), &reward.user_email),
                    |row| row.get(0),
                )
                .optional()?;
            let Some(stored) = stored else {
                return Ok(RewardApplied::UnknownSubmission);
            };
            let stored = stored.parse::<ProofOutcome>().map_err(|e| anyhow!(e))?;
            if stored != ProofOutcome::Pending {
                return Ok(RewardApplied::NotPending(stored));
            }

            let mut user = user_from_row(row)?;
            user.points = user.points.saturating_add(reward.points_delta);
            user.deposits = user.deposits.saturating_add(reward.deposits_delta);
            award(&mut user);

            tx.execute(
                "UPDATE users SET points = ?1, deposits = ?2, badges = ?3, updated_at = datetime('now')
                 WHERE email = ?4",
                rusqlite::params![
                    user.points,
                    user.deposits,
                    serde_json::to_string(&user.badges)?,
                    &user.email,
                ],
            )?;
            tx.execute(
                "INSERT INTO reward_transactions (id, submission_id, user_email, points_delta, deposits_delta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    reward.id.to_string(),
                    reward.submission_id.to_string(),
                    &reward.user_email,
                    reward.points_delta,
                    reward.deposits_delta,
                    reward.created_at.to_rfc3339(),
                ],
            )?;
            let moved = tx.execute(
                "UPDATE proof_submissions SET outcome = 'accepted' WHERE id = ?1 AND outcome = 'pending'",
                [reward.submission_id.to_string()],
            )?;
            if moved != 1 {
                return Err(anyhow!("submission {} left pending state mid-credit", reward.submission_id));
            }

            tx.commit()?;
            Ok(RewardApplied::Credited(user))
        })
    }

    pub fn list_rewards(&self, email: &str) -> Result<Vec<RewardTransaction>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, submission_id, user_email, points_delta, deposits_delta, created_at
                 FROM reward_transactions
                 WHERE user_email = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([email], |row| {
                    Ok(RewardRow {
                        id: row.get(0)?,
                        submission_id: row.get(1)?,
                        user_email: row.get(2)?,
                        points_delta: row.get(3)?,
                        deposits_delta: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(reward_from_row).collect()
        })
    }
}

fn query_user(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT email, name, points, deposits, badges FROM users WHERE email = ?1")?;

    let row = stmt
        .query_row([email], |row| {
            Ok(UserRow {
                email: row.get(0)?,
                name: row.get(1)?,
                points: row.get(2)?,
                deposits: row.get(3)?,
                badges: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn reward_exists(conn: &Connection, submission_id: Uuid) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM reward_transactions WHERE submission_id = ?1)",
        [submission_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn user_from_row(row: UserRow) -> Result<User> {
    let badges: BTreeSet<String> = serde_json::from_str(&row.badges).unwrap_or_else(|e| {
        warn!("Corrupt badges '{}' for user '{}': {}", row.badges, row.email, e);
        BTreeSet::new()
    });
    Ok(User {
        email: row.email,
        name: row.name,
        points: row.points,
        deposits: row.deposits,
        badges,
    })
}

fn proof_from_row(row: ProofRow) -> Result<ProofSubmission> {
    Ok(ProofSubmission {
        id: row.id.parse()?,
        user_email: row.user_email,
        image_ref: row.image_ref,
        filename: row.filename,
        outcome: row.outcome.parse::<ProofOutcome>().map_err(|e| anyhow!(e))?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn reward_from_row(row: RewardRow) -> Result<RewardTransaction> {
    Ok(RewardTransaction {
        id: row.id.parse()?,
        submission_id: row.submission_id.parse()?,
        user_email: row.user_email,
        points_delta: row.points_delta,
        deposits_delta: row.deposits_delta,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user(email: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.login_user(email).unwrap();
        db
    }

    fn accepted_proof(db: &Database, email: &str) -> ProofSubmission {
        let mut proof = ProofSubmission::new(Uuid::new_v4(), email, "uploads/p", "receipt.jpg");
        db.insert_proof(&proof).unwrap();
        proof.resolve(true);
        proof
    }

    #[test]
    fn login_creates_then_reuses_profile() {
        let db = Database::open_in_memory().unwrap();
        let user = db.login_user("alice@gmail.com").unwrap();
        assert_eq!(user, User::new("alice@gmail.com"));
        assert_eq!(db.get_user("alice@gmail.com").unwrap(), Some(user.clone()));
        assert_eq!(db.login_user("alice@gmail.com").unwrap(), user);
        assert_eq!(db.get_user("bob@gmail.com").unwrap(), None);
    }

    #[test]
    fn reward_applies_once() {
        let db = db_with_user("alice@gmail.com");
        let proof = accepted_proof(&db, "alice@gmail.com");
        let reward = RewardTransaction::for_deposit(&proof);

        let user = match db.apply_reward(&reward, |_| {}).unwrap() {
            RewardApplied::Credited(user) => user,
            other => panic!("expected credit, got {:?}", other),
        };
        assert_eq!(user.points, 50);
        assert_eq!(user.deposits, 1);

        let again = RewardTransaction::for_deposit(&proof);
        assert_eq!(db.apply_reward(&again, |_| {}).unwrap(), RewardApplied::AlreadyCredited);

        let stored = db.get_user("alice@gmail.com").unwrap().unwrap();
        assert_eq!(stored.points, 50);
        assert_eq!(stored.deposits, 1);
        assert_eq!(db.list_rewards("alice@gmail.com").unwrap().len(), 1);
        assert_eq!(
            db.get_proof(proof.id).unwrap().unwrap().outcome,
            ProofOutcome::Accepted
        );
    }

    #[test]
    fn award_closure_persists_badges() {
        let db = db_with_user("alice@gmail.com");
        let proof = accepted_proof(&db, "alice@gmail.com");
        db.apply_reward(&RewardTransaction::for_deposit(&proof), |u| {
            u.badges.insert("rosy-sticker".into());
        })
        .unwrap();
        let stored = db.get_user("alice@gmail.com").unwrap().unwrap();
        assert!(stored.badges.contains("rosy-sticker"));
    }

    #[test]
    fn unknown_user_and_submission_are_reported() {
        let db = db_with_user("alice@gmail.com");
        let stray = ProofSubmission::new(Uuid::new_v4(), "ghost@gmail.com", "x", "receipt.jpg");
        assert_eq!(
            db.apply_reward(&RewardTransaction::for_deposit(&stray), |_| {}).unwrap(),
            RewardApplied::UnknownUser
        );

        let unsaved = ProofSubmission::new(Uuid::new_v4(), "alice@gmail.com", "x", "receipt.jpg");
        assert_eq!(
            db.apply_reward(&RewardTransaction::for_deposit(&unsaved), |_| {}).unwrap(),
            RewardApplied::UnknownSubmission
        );
        assert_eq!(db.get_user("alice@gmail.com").unwrap().unwrap().points, 0);
    }

    #[test]
    fn rejection_only_moves_pending_rows() {
        let db = db_with_user("alice@gmail.com");
        let proof = ProofSubmission::new(Uuid::new_v4(), "alice@gmail.com", "x", "IMG_1.jpg");
        db.insert_proof(&proof).unwrap();
        assert!(db.reject_proof(proof.id).unwrap());
        assert!(!db.reject_proof(proof.id).unwrap());
        assert_eq!(
            db.get_proof(proof.id).unwrap().unwrap().outcome,
            ProofOutcome::Rejected
        );
    }

    #[test]
    fn rejected_row_is_never_credited() {
        let db = db_with_user("alice@gmail.com");
        let mut proof = ProofSubmission::new(Uuid::new_v4(), "alice@gmail.com", "x", "IMG_1.jpg");
        db.insert_proof(&proof).unwrap();
        db.reject_proof(proof.id).unwrap();
        proof.resolve(true);

        assert_eq!(
            db.apply_reward(&RewardTransaction::for_deposit(&proof), |_| {}).unwrap(),
            RewardApplied::NotPending(ProofOutcome::Rejected)
        );
        assert_eq!(
            db.get_proof(proof.id).unwrap().unwrap().outcome,
            ProofOutcome::Rejected
        );
        let stored = db.get_user("alice@gmail.com").unwrap().unwrap();
        assert_eq!((stored.points, stored.deposits), (0, 0));
        assert!(db.list_rewards("alice@gmail.com").unwrap().is_empty());
    }
}
