use anyhow::{Result, bail};
use tracing::info;

use ck_api::password;
use ck_db::{Database, RoleDirectory};

/// Re-hash any stored password that is still plain text.
/// Returns (rehashed, already hashed).
pub fn hash_passwords(db: &Database) -> Result<(usize, usize)> {
    let mut rehashed = 0;
    let mut skipped = 0;

    for user in db.list_users()? {
        if password::is_hashed(&user.password) {
            skipped += 1;
            continue;
        }
        let hash = password::hash(&user.password)?;
        db.update_password(user.id, &hash)?;
        info!("Re-hashed password for {}", user.username);
        rehashed += 1;
    }

    Ok((rehashed, skipped))
}

pub fn check_admin(db: &Database, username: &str) -> Result<String> {
    let Some(user) = db.get_user_by_username(username)? else {
        bail!("no such user: {}", username);
    };
    let roles = db.roles_of(username)?;

    Ok(format!(
        "id: {}\nusername: {}\nstatus: {}\nroles: {}",
        user.id,
        user.username,
        user.status.as_deref().unwrap_or("-"),
        if roles.is_empty() {
            "-".to_string()
        } else {
            roles.join(", ")
        }
    ))
}

pub fn check_db(db: &Database) -> Result<Vec<(&'static str, i64)>> {
    db.with_conn(|conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;

        let mut counts = Vec::new();
        for table in ["users", "roles", "user_roles", "posts", "post_attachments"] {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            counts.push((table, n));
        }
        Ok(counts)
    })
}

/// Grant the super-admin role to an existing account. Missing accounts are
/// reported, not created.
pub fn ensure_superadmin(db: &Database, username: &str) -> Result<bool> {
    let Some(user) = db.get_user_by_username(username)? else {
        bail!("super-admin account '{}' does not exist yet", username);
    };
    db.grant_role(user.id, ck_types::models::ROLE_SUPERADMIN)
}
