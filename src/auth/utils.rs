use anyhow::{bail, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::SignUpMetadata;

const TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 7;
const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok(hash)
}

pub fn verify_password(hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn create_jwt(user_id: &str, email: Option<&str>, secret: &str) -> Result<String> {
    let exp = (chrono::Utc::now().timestamp() + TOKEN_TTL_SECS) as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.map(str::to_string),
        exp,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if !EMAIL_RE.is_match(email) {
        bail!("Invalid email address");
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("Password should be at least {MIN_PASSWORD_LEN} characters");
    }
    Ok(())
}

pub fn validate_metadata(metadata: &SignUpMetadata) -> Result<()> {
    for (field, value) in [
        ("full_name", &metadata.full_name),
        ("university", &metadata.university),
        ("program", &metadata.program),
    ] {
        if value.trim().is_empty() {
            bail!("{field} is required");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password(&hash, "hunter22").unwrap());
        assert!(!verify_password(&hash, "hunter23").unwrap());
    }

    #[test]
    fn jwt_carries_subject_and_rejects_wrong_secret() {
        let token = create_jwt("u1", Some("a@b.co"), "secret").unwrap();
        let claims = decode_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("a@b.co"));
        assert!(decode_jwt(&token, "other").is_err());
    }

    #[test]
    fn credentials_are_checked() {
        assert!(validate_credentials("jane@example.com", "secret1").is_ok());
        assert!(validate_credentials("jane@example", "secret1").is_err());
        assert!(validate_credentials("jane@example.com", "short").is_err());
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }

    #[test]
    fn metadata_fields_are_required() {
        let mut meta = SignUpMetadata {
            full_name: "Jane Doe".into(),
            university: "Mukuba University".into(),
            program: "Bachelor in Law".into(),
        };
        assert!(validate_metadata(&meta).is_ok());
        meta.program = " ".into();
        assert_eq!(
            validate_metadata(&meta).unwrap_err().to_string(),
            "program is required"
        );
    }
}
