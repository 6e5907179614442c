use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_SPACE: u32 = 36 * 36 * 36 * 36 * 36 * 36;

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

macro_rules! define_id_type {
    ($name:ident, $kind:literal, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                validate_identifier_value($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            /// Allocates a fresh id of the form `<prefix>-<base36 ts>-<random>`.
            pub fn generate(now: i64) -> Result<Self, String> {
                generate_compact_id($prefix, now).map(Self)
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

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
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

define_id_type!(SessionId, "session id", "session");
define_id_type!(ReportId, "report id", "report");

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

fn generate_compact_id(prefix: &str, now: i64) -> Result<String, String> {
    let timestamp =
        u64::try_from(now).map_err(|_| format!("{prefix} id requires a non-negative timestamp"))?;
    let mut bytes = [0_u8; 4];
    getrandom::getrandom(&mut bytes)
        .map_err(|err| format!("failed to generate {prefix} id randomness: {err}"))?;
    let sample = u32::from_le_bytes(bytes) % ID_SUFFIX_SPACE;
    Ok(format!(
        "{prefix}-{}-{}",
        base36_encode_u64(timestamp),
        base36_encode_fixed_u32(sample, 6)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_pass_their_own_validation() {
        let report = ReportId::generate(1_700_000_000).expect("report id");
        assert!(report.as_str().starts_with("report-"));
        assert_eq!(ReportId::parse(report.as_str()).expect("parse"), report);
    }

    #[test]
    fn parse_rejects_path_like_values() {
        assert!(SessionId::parse("../etc").is_err());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("main_session-1").is_ok());
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        assert!(SessionId::generate(-1).is_err());
    }
}
