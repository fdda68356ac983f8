use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time comparison of a caller-supplied secret against the stored one.
/// Slices of different length compare unequal; an empty stored secret never matches.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into()
}

/// Attempt ids are derived from creation time, exam and content revision only,
/// so they never change once the attempt exists.
pub fn derive_attempt_id(
    created_at: DateTime<Utc>,
    exam_id: i64,
    content_revision_ref: &str,
) -> String {
    let nanos = created_at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| created_at.timestamp_micros().saturating_mul(1_000));
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", nanos, exam_id, content_revision_ref).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exact_secret_matches() {
        assert!(secrets_match("abcDEF123", "abcDEF123"));
    }

    #[test]
    fn one_character_off_is_rejected() {
        assert!(!secrets_match("abcDEF124", "abcDEF123"));
        assert!(!secrets_match("bbcDEF123", "abcDEF123"));
    }

    #[test]
    fn different_length_is_rejected() {
        assert!(!secrets_match("abcDEF12", "abcDEF123"));
        assert!(!secrets_match("abcDEF1234", "abcDEF123"));
        assert!(!secrets_match("", "abcDEF123"));
    }

    #[test]
    fn empty_stored_secret_never_matches() {
        assert!(!secrets_match("", ""));
    }

    #[test]
    fn attempt_id_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let a = derive_attempt_id(at, 42, "rev-7");
        let b = derive_attempt_id(at, 42, "rev-7");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn attempt_id_depends_on_every_input() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let base = derive_attempt_id(at, 42, "rev-7");
        assert_ne!(base, derive_attempt_id(at, 43, "rev-7"));
        assert_ne!(base, derive_attempt_id(at, 42, "rev-8"));
        assert_ne!(
            base,
            derive_attempt_id(at + chrono::Duration::nanoseconds(1), 42, "rev-7")
        );
    }
}
