use anyhow::{bail, Context};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version, ARGON2ID_IDENT,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

/// Every credential in the store is argon2id v19 with default cost.
fn hasher() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default())
}

/// Hash `plain` with a fresh random salt into a PHC string for the
/// `password_hash` column.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    if plain.is_empty() {
        bail!("refusing to hash an empty password");
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })
        .context("hash password")?;
    Ok(hash.to_string())
}

/// Check `plain` against a stored credential. Blank or non-argon2id values
/// are store corruption, not a wrong password, and come back as errors.
pub fn verify_password(plain: &str, stored: &str) -> anyhow::Result<bool> {
    if stored.trim().is_empty() {
        bail!("stored password hash is empty");
    }
    let parsed = PasswordHash::new(stored).map_err(|e| {
        warn!(error = %e, "unparsable password hash in store");
        anyhow::anyhow!("malformed password hash: {e}")
    })?;
    if parsed.algorithm != ARGON2ID_IDENT {
        bail!("unsupported password hash algorithm `{}`", parsed.algorithm);
    }
    // Parameters come from the PHC string, so older cost settings still verify.
    Ok(hasher().verify_password(plain.as_bytes(), &parsed).is_ok())
}
