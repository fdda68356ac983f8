use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn generate_access_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Per-attempt callback secret, roughly 285 bits of entropy.
pub fn generate_secret_key() -> String {
    generate_access_token(48)
}

/// Claims of a learner-facing launch link. `jti` makes each link single use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchClaims {
    pub jti: String,
    pub exam_id: i64,
    pub learner_id: i64,
    pub iat: i64,
    pub exp: i64,
}

impl LaunchClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

pub fn issue_launch_token(
    secret: &str,
    exam_id: i64,
    learner_id: i64,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<(String, LaunchClaims), jsonwebtoken::errors::Error> {
    let claims = LaunchClaims {
        jti: Uuid::new_v4().to_string(),
        exam_id,
        learner_id,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, claims))
}

/// Checks signature and ids, and expiry against the service clock rather
/// than the library's wall clock.
pub fn verify_launch_token(
    secret: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<LaunchClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    let data = decode::<LaunchClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    if data.claims.exp <= now.timestamp() {
        return Err(ErrorKind::ExpiredSignature.into());
    }
    Ok(data.claims)
}
