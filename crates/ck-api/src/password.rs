use std::sync::LazyLock;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Hash a password with Argon2id into a PHC string.
pub fn hash(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// `false` for a wrong password and for stored values that are not PHC hashes.
pub fn verify(plain: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Hash checked when the account does not exist, so a miss costs the same
/// Argon2 work as a wrong password.
static ABSENT_USER_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash("ck-absent-user").ok());

/// Burn one verification against a fixed hash. Always `false`.
pub fn verify_absent(plain: &str) -> bool {
    if let Some(stored) = ABSENT_USER_HASH.as_deref() {
        let _ = verify(plain, stored);
    }
    false
}

/// Whether a stored password value is already a PHC hash string.
pub fn is_hashed(stored: &str) -> bool {
    PasswordHash::new(stored).is_ok()
}
