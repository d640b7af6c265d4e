//! Deserialization helpers for the loose JSON shapes Xtream servers emit.
//!
//! Numeric fields regularly arrive as quoted strings (`"stream_id": "42"`),
//! and boolean flags as `"0"` / `"1"` strings. These visitors accept both.

use serde::de::{self, Unexpected, Visitor};
use serde::Deserializer;

pub fn string_or_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrI64Visitor;

    impl<'de> Visitor<'de> for StringOrI64Visitor {
        type Value = i64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            i64::try_from(value)
                .map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &self))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            value
                .parse()
                .map_err(|_| E::invalid_value(Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(StringOrI64Visitor)
}

pub fn string_or_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrI64OptionVisitor;

    impl<'de> Visitor<'de> for StringOrI64OptionVisitor {
        type Value = Option<i64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string, integer, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            i64::try_from(value)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &self))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            if value.is_empty() {
                return Ok(None);
            }
            value
                .parse()
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(StringOrI64OptionVisitor)
}

/// `0`/`1`, `"0"`/`"1"`, or a real boolean.
pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexibleBoolVisitor;

    impl<'de> Visitor<'de> for FlexibleBoolVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a boolean, integer flag, or string flag")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(value != 0)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(value != 0)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            match value {
                "" | "0" | "false" => Ok(false),
                _ => Ok(true),
            }
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(false)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(FlexibleBoolVisitor)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "super::string_or_i64")]
        id: i64,
        #[serde(deserialize_with = "super::string_or_i64_option", default)]
        num: Option<i64>,
        #[serde(deserialize_with = "super::flexible_bool", default)]
        adult: bool,
    }

    #[test]
    fn accepts_quoted_and_bare_numbers() {
        let p: Probe = serde_json::from_str(r#"{"id": "42", "num": 7, "adult": "1"}"#).unwrap();
        assert_eq!(p.id, 42);
        assert_eq!(p.num, Some(7));
        assert!(p.adult);

        let p: Probe = serde_json::from_str(r#"{"id": 42, "num": "7", "adult": 0}"#).unwrap();
        assert_eq!(p.id, 42);
        assert_eq!(p.num, Some(7));
        assert!(!p.adult);
    }

    #[test]
    fn empty_string_is_none() {
        let p: Probe = serde_json::from_str(r#"{"id": "1", "num": "", "adult": ""}"#).unwrap();
        assert_eq!(p.num, None);
        assert!(!p.adult);
    }
}
