use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            email       TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            points      INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
            deposits    INTEGER NOT NULL DEFAULT 0 CHECK (deposits >= 0),
            badges      TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS proof_submissions (
            id          TEXT PRIMARY KEY,
            user_email  TEXT NOT NULL REFERENCES users(email),
            image_ref   TEXT NOT NULL,
            filename    TEXT NOT NULL,
            outcome     TEXT NOT NULL DEFAULT 'pending'
                        CHECK (outcome IN ('pending', 'accepted', 'rejected')),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_proofs_user
            ON proof_submissions(user_email, created_at);

        -- One credit per submission, enforced by the schema
        CREATE TABLE IF NOT EXISTS reward_transactions (
            id              TEXT PRIMARY KEY,
            submission_id   TEXT NOT NULL UNIQUE REFERENCES proof_submissions(id),
            user_email      TEXT NOT NULL REFERENCES users(email),
            points_delta    INTEGER NOT NULL,
            deposits_delta  INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rewards_user
            ON reward_transactions(user_email, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
