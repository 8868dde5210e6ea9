use std::collections::HashMap;

use crate::Database;
use crate::migrations::SINGLETON_STATUS_INDEX;
use crate::models::{PostRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, ErrorCode};

/// Failure of a write that touches the users table's unique constraints.
#[derive(Debug, thiserror::Error)]
pub enum UserWriteError {
    #[error("username already exists")]
    UsernameTaken,
    #[error("status is already held by another account")]
    StatusTaken,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for UserWriteError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, Some(msg)) = &e {
            if err.code == ErrorCode::ConstraintViolation {
                if msg.contains("users.username") {
                    return Self::UsernameTaken;
                }
                if msg.contains(SINGLETON_STATUS_INDEX) {
                    return Self::StatusTaken;
                }
            }
        }
        Self::Store(e.into())
    }
}

/// Lookups the registration policy needs before an account is written.
pub trait UserDirectory {
    fn username_exists(&self, username: &str) -> Result<bool>;

    /// Username of the account currently holding `status` (trimmed match).
    fn status_holder(&self, status: &str) -> Result<Option<String>>;
}

/// Lookups the authorization engine needs.
pub trait RoleDirectory {
    /// Explicit role names assigned to `username`. Empty for unknown users.
    fn roles_of(&self, username: &str) -> Result<Vec<String>>;
}

impl UserDirectory for Connection {
    fn username_exists(&self, username: &str) -> Result<bool> {
        let found = self
            .query_row("SELECT 1 FROM users WHERE username = ?1", [username], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn status_holder(&self, status: &str) -> Result<Option<String>> {
        self.query_row(
            "SELECT username FROM users WHERE trim(status) = trim(?1) LIMIT 1",
            [status],
            |row| row.get(0),
        )
        .optional()
    }
}

impl RoleDirectory for Connection {
    fn roles_of(&self, username: &str) -> Result<Vec<String>> {
        let mut stmt = self.prepare(
            "SELECT r.role_name
             FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             JOIN users u ON u.id = ur.user_id
             WHERE u.username = ?1
             ORDER BY r.role_name",
        )?;
        let roles = stmt
            .query_map([username], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(roles)
    }
}

impl UserDirectory for Database {
    fn username_exists(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| conn.username_exists(username))
    }

    fn status_holder(&self, status: &str) -> Result<Option<String>> {
        self.with_conn(|conn| conn.status_holder(status))
    }
}

impl RoleDirectory for Database {
    fn roles_of(&self, username: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| conn.roles_of(username))
    }
}

// -- Users --

/// Inserts a user row and returns its id. Intended to run inside
/// [`Database::with_tx`] after the registration checks.
pub fn insert_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    status: Option<&str>,
) -> std::result::Result<i64, UserWriteError> {
    conn.execute(
        "INSERT INTO users (username, password, status) VALUES (?1, ?2, ?3)",
        rusqlite::params![username, password_hash, status],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Sets or clears a user's status. Returns `false` if the user does not exist.
pub fn update_status(
    conn: &Connection,
    username: &str,
    status: Option<&str>,
) -> std::result::Result<bool, UserWriteError> {
    let changed = conn.execute(
        "UPDATE users SET status = ?1 WHERE username = ?2",
        rusqlite::params![status, username],
    )?;
    Ok(changed == 1)
}

impl Database {
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, status, created_at FROM users ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                rusqlite::params![password_hash, id],
            )?;
            Ok(())
        })
    }

    /// Deletes a user and their role assignments. Returns the number of
    /// assignment rows removed, or `None` if the user did not exist.
    pub fn delete_user(&self, username: &str) -> Result<Option<usize>> {
        self.with_tx(|conn| {
            let Some(user) = query_user_by_username(conn, username)? else {
                return Ok(None);
            };
            let roles = conn.execute("DELETE FROM user_roles WHERE user_id = ?1", [user.id])?;
            conn.execute("DELETE FROM users WHERE id = ?1", [user.id])?;
            Ok(Some(roles))
        })
    }

    // -- Roles --

    /// Assigns a role, creating the role if it is not in the catalog yet.
    /// Returns `true` if a new assignment row was written.
    pub fn grant_role(&self, user_id: i64, role_name: &str) -> Result<bool> {
        self.with_tx(|conn| {
            let role_id = ensure_role(conn, role_name)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                [user_id, role_id],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Removes an assignment. Returns `false` when the user did not hold the role.
    pub fn revoke_role(&self, user_id: i64, role_name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM user_roles
                 WHERE user_id = ?1
                   AND role_id = (SELECT id FROM roles WHERE role_name = ?2)",
                rusqlite::params![user_id, role_name],
            )?;
            Ok(removed > 0)
        })
    }

    /// Explicit roles of every user that has any, keyed by user id.
    pub fn roles_by_user(&self) -> Result<HashMap<i64, Vec<String>>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ur.user_id, r.role_name
                 FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id
                 ORDER BY ur.user_id, r.role_name",
            )?;
            let mut map: HashMap<i64, Vec<String>> = HashMap::new();
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (user_id, role) = row?;
                map.entry(user_id).or_default().push(role);
            }
            Ok(map)
        })
    }

    pub fn count_role_assignments(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM user_roles WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    // -- Posts --

    pub fn insert_post(
        &self,
        author: &str,
        content: &str,
        visibility: &str,
        attachments: &[String],
    ) -> Result<PostRow> {
        self.with_tx(|conn| {
            conn.execute(
                "INSERT INTO posts (author, content, visibility) VALUES (?1, ?2, ?3)",
                rusqlite::params![author, content, visibility],
            )?;
            let id = conn.last_insert_rowid();

            let mut stmt = conn.prepare(
                "INSERT INTO post_attachments (post_id, position, path) VALUES (?1, ?2, ?3)",
            )?;
            for (position, path) in attachments.iter().enumerate() {
                stmt.execute(rusqlite::params![id, position as i64, path])?;
            }

            query_post(conn, id)?.ok_or_else(|| anyhow::anyhow!("post {} vanished after insert", id))
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// Newest posts whose visibility is one of `visibilities`.
    pub fn list_posts(&self, visibilities: &[&str], limit: u32) -> Result<Vec<PostRow>> {
        if visibilities.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=visibilities.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, author, content, visibility, created_at FROM posts
                 WHERE visibility IN ({})
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&limit];
            params.extend(visibilities.iter().map(|v| v as &dyn rusqlite::types::ToSql));

            let mut rows = stmt
                .query_map(params.as_slice(), map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let mut attachments = query_attachments(conn, &ids)?;
            for row in &mut rows {
                row.attachments = attachments.remove(&row.id).unwrap_or_default();
            }

            Ok(rows)
        })
    }

    pub fn delete_post(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(removed == 1)
        })
    }
}

fn ensure_role(conn: &Connection, role_name: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO roles (role_name) VALUES (?1)", [role_name])?;
    let id = conn.query_row("SELECT id FROM roles WHERE role_name = ?1", [role_name], |row| {
        row.get(0)
    })?;
    Ok(id)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author: row.get(1)?,
        content: row.get(2)?,
        visibility: row.get(3)?,
        created_at: row.get(4)?,
        attachments: vec![],
    })
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password, status, created_at FROM users WHERE username = ?1",
    )?;

    let row = stmt.query_row([username], map_user).optional()?;

    Ok(row)
}

fn query_post(conn: &Connection, id: i64) -> Result<Option<PostRow>> {
    let row = conn
        .query_row(
            "SELECT id, author, content, visibility, created_at FROM posts WHERE id = ?1",
            [id],
            map_post,
        )
        .optional()?;

    let Some(mut post) = row else {
        return Ok(None);
    };
    post.attachments = query_attachments(conn, &[id])?.remove(&id).unwrap_or_default();
    Ok(Some(post))
}

/// Batch-fetch attachment paths for a set of post ids, ordered by position.
fn query_attachments(conn: &Connection, post_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
    if post_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT post_id, path FROM post_attachments WHERE post_id IN ({}) ORDER BY post_id, position",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (post_id, path) = row?;
        map.entry(post_id).or_default().push(path);
    }
    Ok(map)
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
    use ck_types::models::{ROLE_MEMBER, ROLE_MODERATOR, ROLE_SUPERADMIN};

    fn db_with_user(username: &str, status: Option<&str>) -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .with_tx(|conn| insert_user(conn, username, "hash", status))
            .unwrap();
        (db, id)
    }

    #[test]
    fn roles_are_seeded_once() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| migrations_again(conn)).unwrap();
        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM roles", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 3);
    }

    fn migrations_again(conn: &Connection) -> Result<()> {
        crate::migrations::run(conn)
    }

    #[test]
    fn duplicate_username_maps_to_typed_error() {
        let (db, _) = db_with_user("alice", None);
        let err = db
            .with_tx(|conn| insert_user(conn, "alice", "other", None))
            .unwrap_err();
        assert!(matches!(err, UserWriteError::UsernameTaken));
    }

    #[test]
    fn usernames_are_case_sensitive() {
        let (db, _) = db_with_user("alice", None);
        assert!(db.with_tx(|conn| insert_user(conn, "Alice", "h", None)).is_ok());
        assert!(db.username_exists("alice").unwrap());
        assert!(!db.username_exists("ALICE").unwrap());
    }

    #[test]
    fn singleton_status_index_rejects_second_holder() {
        let (db, _) = db_with_user("alice", Some("Elnök"));
        let err = db
            .with_tx(|conn| insert_user(conn, "bob", "h", Some(" Elnök ")))
            .unwrap_err();
        assert!(matches!(err, UserWriteError::StatusTaken));

        // Non-singleton statuses may repeat.
        db.with_tx(|conn| insert_user(conn, "carol", "h", Some("Titkár"))).unwrap();
        db.with_tx(|conn| insert_user(conn, "dave", "h", Some("Titkár"))).unwrap();
        assert_eq!(db.status_holder("Elnök").unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn grant_is_idempotent_and_revoke_tolerates_missing() {
        let (db, id) = db_with_user("alice", None);

        assert!(db.grant_role(id, ROLE_MEMBER).unwrap());
        assert!(!db.grant_role(id, ROLE_MEMBER).unwrap());
        assert_eq!(db.count_role_assignments(id).unwrap(), 1);

        assert!(!db.revoke_role(id, ROLE_MODERATOR).unwrap());
        assert!(!db.revoke_role(id, "no-such-role").unwrap());
        assert!(db.revoke_role(id, ROLE_MEMBER).unwrap());
        assert_eq!(db.count_role_assignments(id).unwrap(), 0);
    }

    #[test]
    fn grant_creates_unknown_role() {
        let (db, id) = db_with_user("alice", None);
        db.grant_role(id, "editor").unwrap();
        assert_eq!(db.roles_of("alice").unwrap(), vec!["editor".to_string()]);
    }

    #[test]
    fn delete_user_cascades_assignments() {
        let (db, id) = db_with_user("alice", None);
        db.grant_role(id, ROLE_MEMBER).unwrap();
        db.grant_role(id, ROLE_SUPERADMIN).unwrap();

        assert_eq!(db.delete_user("alice").unwrap(), Some(2));
        assert_eq!(db.count_role_assignments(id).unwrap(), 0);
        assert!(db.get_user_by_username("alice").unwrap().is_none());
        assert_eq!(db.delete_user("alice").unwrap(), None);
    }

    #[test]
    fn posts_keep_attachment_order_and_filter_visibility() {
        let db = Database::open_in_memory().unwrap();
        let attachments = vec!["/uploads/b.png".to_string(), "/uploads/a.png".to_string()];
        let post = db.insert_post("alice", "hello", "members", &attachments).unwrap();
        assert_eq!(post.attachments, attachments);
        db.insert_post("bob", "open", "public", &[]).unwrap();

        let public = db.list_posts(&["public"], 50).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].author, "bob");

        let all = db.list_posts(&["public", "members"], 50).unwrap();
        assert_eq!(all.len(), 2);
        let members_post = all.iter().find(|p| p.id == post.id).unwrap();
        assert_eq!(members_post.attachments, attachments);

        assert!(db.delete_post(post.id).unwrap());
        assert!(db.get_post(post.id).unwrap().is_none());
    }
}
