//! Partitioning key values and their normalization.
//!
//! Every supported value is reduced to a [`HashKey`] before hashing, so equal
//! logical values hash the same no matter how the caller represents them.

#[cfg(feature = "derive")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed scale of decimal values: the unscaled integer counts units of 10^-12.
pub const DECIMAL_SCALE: u32 = 12;

const DECIMAL_FACTOR: i128 = 1_000_000_000_000;

/// The declared type of a partitioning column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "derive", derive(Serialize, Deserialize))]
pub enum ValueType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    String,
    VarBinary,
    Decimal,
    Timestamp,
    GeographyPoint,
    Geography,
}

impl ValueType {
    /// Value that stands for SQL NULL in the integer kinds.
    pub fn null_sentinel(&self) -> Option<i64> {
        match self {
            ValueType::TinyInt => Some(i8::MIN as i64),
            ValueType::SmallInt => Some(i16::MIN as i64),
            ValueType::Integer => Some(i32::MIN as i64),
            ValueType::BigInt | ValueType::Timestamp => Some(i64::MIN),
            _ => None,
        }
    }

    fn integer_bounds(&self) -> Option<(i64, i64)> {
        match self {
            ValueType::TinyInt => Some((i8::MIN as i64, i8::MAX as i64)),
            ValueType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            ValueType::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            ValueType::BigInt | ValueType::Timestamp => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

/// A partitioning parameter as supplied by a caller.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "derive", derive(Serialize, Deserialize))]
pub enum ParameterValue {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    String(String),
    Bytes(Vec<u8>),
    /// Unscaled decimal with [`DECIMAL_SCALE`] fractional digits.
    Decimal(i128),
    /// Microseconds since the epoch.
    Timestamp(i64),
    Array(Vec<ParameterValue>),
}

impl From<i8> for ParameterValue {
    fn from(value: i8) -> Self {
        ParameterValue::TinyInt(value)
    }
}

impl From<i16> for ParameterValue {
    fn from(value: i16) -> Self {
        ParameterValue::SmallInt(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::BigInt(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<Vec<u8>> for ParameterValue {
    fn from(value: Vec<u8>) -> Self {
        ParameterValue::Bytes(value)
    }
}

impl<T: Into<ParameterValue>> From<Option<T>> for ParameterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParameterValue::Null, Into::into)
    }
}

impl ParameterValue {
    fn as_integer(&self) -> Option<i64> {
        match self {
            ParameterValue::TinyInt(v) => Some(*v as i64),
            ParameterValue::SmallInt(v) => Some(*v as i64),
            ParameterValue::Integer(v) => Some(*v as i64),
            ParameterValue::BigInt(v) | ParameterValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }
}

/// Canonical form of a value, the only input of the token hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashKey {
    Null,
    Long(i64),
    Decimal(i128),
    Bytes(Vec<u8>),
}

/// Coerce `value` to the canonical key of `value_type`.
pub fn normalize(value_type: ValueType, value: &ParameterValue) -> Result<HashKey> {
    match value_type {
        ValueType::TinyInt
        | ValueType::SmallInt
        | ValueType::Integer
        | ValueType::BigInt
        | ValueType::Timestamp => normalize_integer(value_type, value),
        ValueType::String => normalize_string(value),
        ValueType::VarBinary => normalize_varbinary(value),
        ValueType::Decimal => normalize_decimal(value),
        ValueType::GeographyPoint | ValueType::Geography => {
            Err(Error::UnsupportedType(value_type))
        }
    }
}

fn invalid(value_type: ValueType, reason: impl Into<String>) -> Error {
    Error::InvalidValue {
        value_type,
        reason: reason.into(),
    }
}

fn normalize_integer(value_type: ValueType, value: &ParameterValue) -> Result<HashKey> {
    let number = match value {
        ParameterValue::Null => return Ok(HashKey::Null),
        ParameterValue::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|err| invalid(value_type, format!("{text:?}: {err}")))?,
        ParameterValue::Bytes(bytes) => integer_from_be_bytes(bytes)
            .ok_or_else(|| invalid(value_type, format!("{} byte integer", bytes.len())))?,
        ParameterValue::Decimal(_) | ParameterValue::Array(_) => {
            return Err(invalid(value_type, "not an integer"));
        }
        other => other
            .as_integer()
            .ok_or_else(|| invalid(value_type, "not an integer"))?,
    };

    if value_type.null_sentinel() == Some(number) {
        return Ok(HashKey::Null);
    }
    if let Some((min, max)) = value_type.integer_bounds() {
        if number < min || number > max {
            return Err(invalid(value_type, format!("{number} is out of range")));
        }
    }
    Ok(HashKey::Long(number))
}

// big-endian, sign-extended
fn integer_from_be_bytes(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        1 => Some(bytes[0] as i8 as i64),
        2 => Some(i16::from_be_bytes([bytes[0], bytes[1]]) as i64),
        4 => Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Some(i64::from_be_bytes(buf))
        }
        _ => None,
    }
}

fn normalize_string(value: &ParameterValue) -> Result<HashKey> {
    match value {
        ParameterValue::Null => Ok(HashKey::Null),
        ParameterValue::String(text) => Ok(HashKey::Bytes(text.as_bytes().to_vec())),
        ParameterValue::Bytes(bytes) => Ok(HashKey::Bytes(bytes.clone())),
        ParameterValue::Decimal(_) | ParameterValue::Array(_) => {
            Err(invalid(ValueType::String, "not a string"))
        }
        other => other
            .as_integer()
            .map(|number| HashKey::Bytes(number.to_string().into_bytes()))
            .ok_or_else(|| invalid(ValueType::String, "not a string")),
    }
}

fn normalize_varbinary(value: &ParameterValue) -> Result<HashKey> {
    match value {
        ParameterValue::Null => Ok(HashKey::Null),
        ParameterValue::Bytes(bytes) => Ok(HashKey::Bytes(bytes.clone())),
        ParameterValue::String(text) => hex::decode(text.trim())
            .map(HashKey::Bytes)
            .map_err(|err| invalid(ValueType::VarBinary, format!("{text:?}: {err}"))),
        ParameterValue::Array(elements) => elements
            .iter()
            .map(|element| match element {
                ParameterValue::TinyInt(byte) => Ok(*byte as u8),
                _ => Err(invalid(
                    ValueType::VarBinary,
                    "array elements must be tinyint",
                )),
            })
            .collect::<Result<Vec<u8>>>()
            .map(HashKey::Bytes),
        _ => Err(invalid(ValueType::VarBinary, "not a byte array")),
    }
}

fn normalize_decimal(value: &ParameterValue) -> Result<HashKey> {
    let unscaled = match value {
        ParameterValue::Null => return Ok(HashKey::Null),
        ParameterValue::Decimal(unscaled) => *unscaled,
        ParameterValue::String(text) => parse_decimal(text.trim())?,
        ParameterValue::Bytes(_) | ParameterValue::Array(_) => {
            return Err(invalid(ValueType::Decimal, "not a number"));
        }
        other => other
            .as_integer()
            .and_then(|number| (number as i128).checked_mul(DECIMAL_FACTOR))
            .ok_or_else(|| invalid(ValueType::Decimal, "not a number"))?,
    };

    if unscaled == i128::MIN {
        return Ok(HashKey::Null);
    }
    Ok(HashKey::Decimal(unscaled))
}

/// Parse `[-]digits[.digits]` into an unscaled decimal.
pub fn parse_decimal(text: &str) -> Result<i128> {
    let bad = |reason: &str| invalid(ValueType::Decimal, format!("{text:?}: {reason}"));

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

    if whole.is_empty() && fraction.is_empty() {
        return Err(bad("no digits"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(bad("not a decimal number"));
    }
    if fraction.len() > DECIMAL_SCALE as usize {
        return Err(bad("too many fractional digits"));
    }

    let whole: i128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| bad("out of range"))?
    };
    let mut fraction_value: i128 = if fraction.is_empty() {
        0
    } else {
        fraction.parse().map_err(|_| bad("out of range"))?
    };
    for _ in fraction.len()..DECIMAL_SCALE as usize {
        fraction_value *= 10;
    }

    let unscaled = whole
        .checked_mul(DECIMAL_FACTOR)
        .and_then(|scaled| scaled.checked_add(fraction_value))
        .ok_or_else(|| bad("out of range"))?;
    Ok(if negative { -unscaled } else { unscaled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_representations_agree() {
        let expected = HashKey::Long(1_000_000);
        for value in [
            ParameterValue::Integer(1_000_000),
            ParameterValue::BigInt(1_000_000),
            ParameterValue::from("1000000"),
            ParameterValue::Bytes(1_000_000i64.to_be_bytes().to_vec()),
            ParameterValue::Bytes(1_000_000i32.to_be_bytes().to_vec()),
        ] {
            assert_eq!(normalize(ValueType::BigInt, &value).unwrap(), expected);
        }
    }

    #[test]
    fn narrow_types_accept_wide_values_in_range() {
        assert_eq!(
            normalize(ValueType::SmallInt, &ParameterValue::BigInt(-7)).unwrap(),
            HashKey::Long(-7)
        );
        assert!(matches!(
            normalize(ValueType::TinyInt, &ParameterValue::Integer(300)),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn null_sentinels_normalize_to_null() {
        let cases = [
            (ValueType::TinyInt, ParameterValue::TinyInt(i8::MIN)),
            (ValueType::SmallInt, ParameterValue::SmallInt(i16::MIN)),
            (ValueType::Integer, ParameterValue::Integer(i32::MIN)),
            (ValueType::BigInt, ParameterValue::BigInt(i64::MIN)),
            (ValueType::Timestamp, ParameterValue::Timestamp(i64::MIN)),
            (ValueType::Decimal, ParameterValue::Decimal(i128::MIN)),
            (ValueType::String, ParameterValue::Null),
            (ValueType::VarBinary, ParameterValue::from(None::<Vec<u8>>)),
        ];
        for (value_type, value) in cases {
            assert_eq!(normalize(value_type, &value).unwrap(), HashKey::Null, "{value_type:?}");
        }
    }

    #[test]
    fn byte_array_and_boxed_bytes_agree() {
        let bytes = ParameterValue::Bytes(vec![1, 2, 0xff]);
        let boxed = ParameterValue::Array(vec![
            ParameterValue::TinyInt(1),
            ParameterValue::TinyInt(2),
            ParameterValue::TinyInt(-1),
        ]);
        let hex = ParameterValue::from("0102FF");

        let expected = normalize(ValueType::VarBinary, &bytes).unwrap();
        assert_eq!(normalize(ValueType::VarBinary, &boxed).unwrap(), expected);
        assert_eq!(normalize(ValueType::VarBinary, &hex).unwrap(), expected);
    }

    #[test]
    fn string_accepts_numbers() {
        assert_eq!(
            normalize(ValueType::String, &ParameterValue::BigInt(42)).unwrap(),
            normalize(ValueType::String, &ParameterValue::from("42")).unwrap()
        );
    }

    #[test]
    fn decimals_parse_to_fixed_scale() {
        assert_eq!(parse_decimal("1").unwrap(), DECIMAL_FACTOR);
        assert_eq!(parse_decimal("-1.5").unwrap(), -1_500_000_000_000);
        assert_eq!(parse_decimal(".25").unwrap(), 250_000_000_000);
        assert!(parse_decimal("1.0000000000001").is_err());
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("-").is_err());

        assert_eq!(
            normalize(ValueType::Decimal, &ParameterValue::Integer(3)).unwrap(),
            normalize(ValueType::Decimal, &ParameterValue::from("3.000")).unwrap()
        );
    }

    #[test]
    fn geography_is_unsupported() {
        for value_type in [ValueType::GeographyPoint, ValueType::Geography] {
            assert!(matches!(
                normalize(value_type, &ParameterValue::Null),
                Err(Error::UnsupportedType(t)) if t == value_type
            ));
        }
    }

    #[test]
    fn arrays_only_as_varbinary() {
        let array = ParameterValue::Array(vec![ParameterValue::BigInt(1)]);
        assert!(normalize(ValueType::BigInt, &array).is_err());
        assert!(normalize(ValueType::VarBinary, &array).is_err());
        assert!(normalize(ValueType::String, &array).is_err());
    }
}
