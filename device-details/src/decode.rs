//! Decoding of raw characteristic values into sensor readings.

use serde_derive::Deserialize;
use std::convert::TryInto;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// An error decoding a characteristic value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("Wrong length {length}, expected {expected_length}")]
    WrongLength {
        length: usize,
        expected_length: usize,
    },
    #[error("Hundredths byte {0} out of range")]
    InvalidHundredths(u8),
}

fn check_length(length: usize, expected_length: usize) -> Result<(), DecodeError> {
    if length != expected_length {
        Err(DecodeError::WrongLength {
            length,
            expected_length,
        })
    } else {
        Ok(())
    }
}

/// How the bytes of a sensor's characteristic value are laid out. All multi-byte integers are
/// little-endian.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// Arbitrary bytes, shown as hex.
    #[default]
    Raw,
    Utf8,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    /// A signed integer byte followed by a hundredths byte.
    Decimal8,
    /// A signed 32-bit integer followed by a hundredths byte.
    Decimal32,
}

/// A decoded sensor reading.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorValue {
    Bytes(Vec<u8>),
    Text(String),
    Integer(i64),
    Float(f32),
    /// A fixed point number with two decimal places.
    Decimal(f64),
}

impl Display for SensorValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            Self::Text(text) => f.write_str(text),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Decimal(value) => write!(f, "{:.2}", value),
        }
    }
}

impl ValueFormat {
    /// Decode the given characteristic value according to this format.
    pub fn decode(self, value: &[u8]) -> Result<SensorValue, DecodeError> {
        Ok(match self {
            Self::Raw => SensorValue::Bytes(value.to_vec()),
            Self::Utf8 => SensorValue::Text(String::from_utf8_lossy(value).into_owned()),
            Self::Uint8 => SensorValue::Integer(u8::from_le_bytes(fixed(value)?).into()),
            Self::Int8 => SensorValue::Integer(i8::from_le_bytes(fixed(value)?).into()),
            Self::Uint16 => SensorValue::Integer(u16::from_le_bytes(fixed(value)?).into()),
            Self::Int16 => SensorValue::Integer(i16::from_le_bytes(fixed(value)?).into()),
            Self::Uint32 => SensorValue::Integer(u32::from_le_bytes(fixed(value)?).into()),
            Self::Int32 => SensorValue::Integer(i32::from_le_bytes(fixed(value)?).into()),
            Self::Float32 => SensorValue::Float(f32::from_le_bytes(fixed(value)?)),
            Self::Decimal8 => {
                let [integer, hundredths] = fixed::<2>(value)?;
                decimal(i8::from_le_bytes([integer]).into(), hundredths)?
            }
            Self::Decimal32 => {
                check_length(value.len(), 5)?;
                let integer = i32::from_le_bytes(fixed(&value[..4])?);
                decimal(integer.into(), value[4])?
            }
        })
    }
}

fn fixed<const N: usize>(value: &[u8]) -> Result<[u8; N], DecodeError> {
    check_length(value.len(), N)?;
    value.try_into().map_err(|_| DecodeError::WrongLength {
        length: value.len(),
        expected_length: N,
    })
}

fn decimal(integer: i64, hundredths: u8) -> Result<SensorValue, DecodeError> {
    if hundredths > 99 {
        return Err(DecodeError::InvalidHundredths(hundredths));
    }
    Ok(SensorValue::Decimal(integer as f64 + f64::from(hundredths) * 0.01))
}
