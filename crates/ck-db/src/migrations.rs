use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use ck_types::models::{SEEDED_ROLES, SINGLETON_STATUSES};

/// Index name surfaced by SQLite when a second holder of a singleton status is written.
pub const SINGLETON_STATUS_INDEX: &str = "idx_users_singleton_status";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                status      TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE roles (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                role_name   TEXT NOT NULL UNIQUE
            );

            CREATE TABLE user_roles (
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role_id     INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, role_id)
            );

            CREATE TABLE posts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                author      TEXT NOT NULL,
                content     TEXT NOT NULL,
                visibility  TEXT NOT NULL CHECK (visibility IN ('public', 'members', 'officers')),
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_posts_created ON posts(created_at);

            CREATE TABLE post_attachments (
                post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL,
                path        TEXT NOT NULL,
                PRIMARY KEY (post_id, position)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (singleton status index)");
        let statuses = SINGLETON_STATUSES
            .iter()
            .map(|s| format!("'{}'", s.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!(
            "
            CREATE UNIQUE INDEX {index}
                ON users(trim(status)) WHERE trim(status) IN ({statuses});

            INSERT INTO schema_version (version) VALUES (2);
            ",
            index = SINGLETON_STATUS_INDEX,
            statuses = statuses,
        ))?;
    }

    seed_roles(conn)?;

    info!("Database migrations complete");
    Ok(())
}

/// Idempotently inserts the fixed role catalog.
fn seed_roles(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO roles (role_name) VALUES (?1)")?;
    for role in SEEDED_ROLES {
        stmt.execute([role])?;
    }
    Ok(())
}
