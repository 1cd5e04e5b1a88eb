use getrandom::getrandom;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const REQUEST_SUFFIX_SPACE: u32 = 36 * 36 * 36 * 36;

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-' or '_'"
    ))
}

pub fn validate_request_id_value(value: &str) -> Result<(), String> {
    validate_identifier_value("request id", value)
}

/// Actor identities come from the identity provider and are usually
/// login names or email addresses, so only whitespace and control
/// characters are refused.
pub fn validate_actor_value(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("actor must be non-empty".to_string());
    }
    if value
        .chars()
        .any(|ch| ch.is_whitespace() || ch.is_control())
    {
        return Err("actor must not contain whitespace or control characters".to_string());
    }
    Ok(())
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal, $validate:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                $validate(raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = String;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(|err| {
                    D::Error::custom(format!("invalid {} `{}`: {}", $kind, raw, err))
                })
            }
        }
    };
}

define_id_type!(RequestId, "request id", validate_request_id_value);
define_id_type!(ActorId, "actor", validate_actor_value);

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        let idx = (value % 36) as usize;
        chars.push(BASE36_ALPHABET[idx] as char);
        value /= 36;
    }
    chars.iter().rev().collect()
}

fn base36_encode_fixed_u32(mut value: u32, width: usize) -> String {
    let mut chars = vec!['0'; width];
    for idx in (0..width).rev() {
        chars[idx] = BASE36_ALPHABET[(value % 36) as usize] as char;
        value /= 36;
    }
    chars.into_iter().collect()
}

pub fn generate_request_id(now: i64) -> Result<RequestId, String> {
    let timestamp =
        u64::try_from(now).map_err(|_| "request ids require a non-negative timestamp".to_string())?;
    let mut bytes = [0_u8; 4];
    getrandom(&mut bytes)
        .map_err(|err| format!("failed to generate request id randomness: {err}"))?;
    let sample = u32::from_le_bytes(bytes) % REQUEST_SUFFIX_SPACE;
    RequestId::parse(&format!(
        "req-{}-{}",
        base36_encode_u64(timestamp),
        base36_encode_fixed_u32(sample, 4)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_rejects_path_characters() {
        assert!(RequestId::parse("req-1").is_ok());
        assert!(RequestId::parse("../req").is_err());
        assert!(RequestId::parse("").is_err());
    }

    #[test]
    fn actor_accepts_email_identities() {
        assert!(ActorId::parse("reviewer@example.com").is_ok());
        assert!(ActorId::parse("DOMAIN\\approver").is_ok());
        assert!(ActorId::parse("two words").is_err());
        assert!(ActorId::parse("   ").is_err());
    }

    #[test]
    fn generated_request_ids_are_valid_identifiers() {
        let id = generate_request_id(1_700_000_000).expect("generate");
        assert!(id.as_str().starts_with("req-"));
        assert_eq!(id.as_str().rsplit('-').next().map(str::len), Some(4));
    }
}
