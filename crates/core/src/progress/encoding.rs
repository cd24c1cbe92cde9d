//! Numeric-safe serde helpers.
//!
//! Integers are written as decimal strings so that text storage and JSON
//! consumers with float-only numbers cannot truncate them. Readers accept
//! either a string or a plain JSON integer.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum IntRepr<T> {
    Text(String),
    Number(T),
}

impl<T> IntRepr<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn into_value<E: de::Error>(self) -> Result<T, E> {
        match self {
            Self::Number(value) => Ok(value),
            Self::Text(text) => text
                .trim()
                .parse::<T>()
                .map_err(|e| E::custom(format!("invalid integer '{}': {}", text, e))),
        }
    }
}

/// `T` <-> `"123"`.
pub mod int_string {
    use super::*;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        IntRepr::<T>::deserialize(deserializer)?.into_value()
    }
}

/// `Option<T>` <-> `"123"` or `null`.
pub mod opt_int_string {
    use super::*;

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        Option::<IntRepr<T>>::deserialize(deserializer)?
            .map(IntRepr::into_value)
            .transpose()
    }
}

/// `Vec<T>` <-> `["1", "2"]`.
pub mod vec_int_string {
    use super::*;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<T, S>(values: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        Vec::<IntRepr<T>>::deserialize(deserializer)?
            .into_iter()
            .map(IntRepr::into_value)
            .collect()
    }
}
