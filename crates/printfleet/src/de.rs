// Printers encode most numeric report fields as strings ("35", "0.4"), and
// some firmware revisions switch between strings and numbers for the same
// field. These helpers accept both encodings.

use alloc::format;
use alloc::string::String;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};

pub(crate) trait WireNumber: Sized + Default {
    fn from_number(number: &Number) -> Option<Self>;

    fn from_text(text: &str) -> Option<Self>;
}

macro_rules! wire_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireNumber for $ty {
                fn from_number(number: &Number) -> Option<Self> {
                    number
                        .as_i64()
                        .and_then(|value| Self::try_from(value).ok())
                        .or_else(|| number.as_u64().and_then(|value| Self::try_from(value).ok()))
                }

                fn from_text(text: &str) -> Option<Self> {
                    text.parse().ok()
                }
            }
        )*
    };
}

wire_integer!(u8, u32, i32, u64);

impl WireNumber for f64 {
    fn from_number(number: &Number) -> Option<Self> {
        number.as_f64()
    }

    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }
}

/// Deserializes a number that may be sent either as a `JSON` number or as a
/// string. `null` and blank strings become the type default.
pub(crate) fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: WireNumber,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(T::default()),
        Value::Number(number) => T::from_number(&number)
            .ok_or_else(|| D::Error::custom(format!("number `{number}` is out of range"))),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                Ok(T::default())
            } else {
                T::from_text(text)
                    .ok_or_else(|| D::Error::custom(format!("`{text}` is not a number")))
            }
        }
        other => Err(D::Error::custom(format!(
            "expected a number, found `{other}`"
        ))),
    }
}

/// Deserializes a string that may be sent as a `JSON` number.
pub(crate) fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(format!("{number}")),
        other => Err(D::Error::custom(format!(
            "expected a string, found `{other}`"
        ))),
    }
}

/// Deserializes an optional string-backed value. Absent, `null` and blank
/// strings all map to `None`.
pub(crate) fn non_blank<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|value| !value.trim().is_empty())
        .map(T::from))
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Sample {
        #[serde(deserialize_with = "super::number")]
        integer: u32,
        #[serde(deserialize_with = "super::number")]
        float: f64,
        #[serde(deserialize_with = "super::text")]
        text: String,
        #[serde(deserialize_with = "super::non_blank")]
        label: Option<String>,
    }

    #[test]
    fn blank_label_is_absent() {
        let blank: Sample = serde_json::from_value(json!({ "label": " " })).unwrap();
        let set: Sample = serde_json::from_value(json!({ "label": "RUNNING" })).unwrap();

        assert_eq!(blank.label, None);
        assert_eq!(set.label.as_deref(), Some("RUNNING"));
    }

    #[test]
    fn accepts_both_encodings() {
        let from_strings: Sample = serde_json::from_value(json!({
            "integer": "42",
            "float": " 0.4 ",
            "text": "0300_0100",
        }))
        .unwrap();

        let from_numbers: Sample = serde_json::from_value(json!({
            "integer": 42,
            "float": 0.4,
            "text": 1234,
        }))
        .unwrap();

        assert_eq!(from_strings.integer, 42);
        assert_eq!(from_numbers.integer, 42);
        assert_eq!(from_strings.float, 0.4);
        assert_eq!(from_numbers.float, 0.4);
        assert_eq!(from_strings.text, "0300_0100");
        assert_eq!(from_numbers.text, "1234");
    }

    #[test]
    fn blank_means_empty() {
        let sample: Sample = serde_json::from_value(json!({
            "integer": "",
            "float": null,
        }))
        .unwrap();

        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_value::<Sample>(json!({ "integer": "fast" })).is_err());
        assert!(serde_json::from_value::<Sample>(json!({ "integer": -1 })).is_err());
        assert!(serde_json::from_value::<Sample>(json!({ "float": [1] })).is_err());
    }
}
