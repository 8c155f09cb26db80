use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Salted SHA-256 credential digest, stored as `salt$hex`.
/// Session handling lives outside this process; we only guarantee that
/// raw passwords never reach the record store.
pub fn hash_password(raw: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest(&salt, raw))
}

#[allow(dead_code)]
pub fn verify_password(stored: &str, raw: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, hex)) => digest(salt, raw) == hex,
        None => false,
    }
}

fn digest(salt: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
