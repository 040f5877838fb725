use std::{fmt, str::FromStr};

use alloy_primitives::U256;
use serde::{de, Deserializer};

/// Accepts either `"a,b,c"` (as env vars arrive) or a real sequence
pub fn deserialize_vec_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> de::Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a comma-separated string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(elem) = seq.next_element()? {
                vec.push(elem);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

struct U256Visitor;

impl<'de> de::Visitor<'de> for U256Visitor {
    type Value = U256;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an unsigned integer, as a number or a decimal/0x-hex string")
    }

    fn visit_u64<E>(self, value: u64) -> Result<U256, E>
    where
        E: de::Error,
    {
        Ok(U256::from(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<U256, E>
    where
        E: de::Error,
    {
        u64::try_from(value)
            .map(U256::from)
            .map_err(|_| E::custom(format!("negative amount: {value}")))
    }

    fn visit_str<E>(self, value: &str) -> Result<U256, E>
    where
        E: de::Error,
    {
        U256::from_str(value.trim()).map_err(|e| E::custom(format!("{value}: {e}")))
    }
}

/// Token amounts routinely exceed what TOML integers can hold,
/// so they may also be written as strings
pub fn deserialize_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(U256Visitor)
}

pub fn deserialize_optional_u256<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptionalU256;

    impl<'de> de::Visitor<'de> for OptionalU256 {
        type Value = Option<U256>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an optional unsigned integer")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserialize_u256(deserializer).map(Some)
        }
    }

    deserializer.deserialize_option(OptionalU256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Amounts {
        #[serde(deserialize_with = "deserialize_u256")]
        required: U256,
        #[serde(default, deserialize_with = "deserialize_optional_u256")]
        optional: Option<U256>,
        #[serde(default, deserialize_with = "deserialize_vec_string")]
        levels: Vec<String>,
    }

    #[test]
    fn amounts_from_numbers_and_strings() {
        let parsed: Amounts = serde_json::from_str(
            r#"{"required": "1000000000000000000000", "optional": 5, "levels": "info, flux_monitor=debug"}"#,
        )
        .unwrap();

        assert_eq!(
            parsed.required,
            U256::from(1_000_000_000_000_000_000_000u128)
        );
        assert_eq!(parsed.optional, Some(U256::from(5)));
        assert_eq!(parsed.levels, vec!["info", "flux_monitor=debug"]);

        let parsed: Amounts = serde_json::from_str(r#"{"required": 7}"#).unwrap();
        assert_eq!(parsed.required, U256::from(7));
        assert_eq!(parsed.optional, None);
        assert!(parsed.levels.is_empty());
    }

    #[test]
    fn negative_amount_is_rejected() {
        assert!(serde_json::from_str::<Amounts>(r#"{"required": -1}"#).is_err());
    }
}
