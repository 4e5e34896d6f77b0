//! Argument and result values carried in frame payloads.
//!
//! Every command argument and every result travels as a [`Value`]. Handlers
//! declare the [`Shape`] of each parameter slot when they are registered, and
//! the dispatcher checks decoded values against those shapes before invoking
//! anything.
//!
//! Wire form of a value:
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ Tag(1B) │ Body                                         │
//! ├─────────┼──────────────────────────────────────────────┤
//! │ 0 Null  │ -                                            │
//! │ 1 Bool  │ 1 byte (0 / 1)                               │
//! │ 2 Int   │ i64 LE                                       │
//! │ 3 Float │ f64 bits LE                                  │
//! │ 4 Str   │ u32 LE length + UTF-8                        │
//! │ 5 Bytes │ u32 LE length + bytes                        │
//! │ 6 Json  │ u32 LE length + JSON text                    │
//! └─────────┴──────────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrameError, Result, ValueError};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_JSON: u8 = 6;

/// A single encoded argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    Json(serde_json::Value),
}

/// The decode contract of one parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// Structured data; any value converts to JSON.
    Json,
    /// No constraint.
    Any,
}

impl Shape {
    /// Whether a value satisfies this shape.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Shape::Any, _) | (Shape::Json, _) => true,
            (Shape::Null, Value::Null) => true,
            (Shape::Bool, Value::Bool(_)) => true,
            (Shape::Int, Value::Int(_)) => true,
            (Shape::Float, Value::Float(_) | Value::Int(_)) => true,
            (Shape::Str, Value::Str(_)) => true,
            (Shape::Bytes, Value::Bytes(_)) => true,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Shape::Null => "null",
            Shape::Bool => "bool",
            Shape::Int => "int",
            Shape::Float => "float",
            Shape::Str => "string",
            Shape::Bytes => "bytes",
            Shape::Json => "json",
            Shape::Any => "any",
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// The exact shape of this value.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Int(_) => Shape::Int,
            Value::Float(_) => Shape::Float,
            Value::Str(_) => Shape::Str,
            Value::Bytes(_) => Shape::Bytes,
            Value::Json(_) => Shape::Json,
        }
    }

    /// Convert into a JSON value. Bytes become an array of numbers.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Value::from(f),
            Value::Str(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::from(b.to_vec()),
            Value::Json(j) => j,
        }
    }

    /// Build a JSON value from any serializable type.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Self, ValueError> {
        serde_json::to_value(value)
            .map(Value::Json)
            .map_err(|err| ValueError::Json(err.to_string()))
    }

    fn mismatch(&self, expected: Shape) -> ValueError {
        ValueError::ShapeMismatch {
            expected: expected.name(),
            actual: self.shape().name(),
        }
    }
}

/// Encode a value into the wire format.
pub fn encode_value(value: &Value, dst: &mut BytesMut) -> Result<()> {
    match value {
        Value::Null => dst.put_u8(TAG_NULL),
        Value::Bool(b) => {
            dst.put_u8(TAG_BOOL);
            dst.put_u8(u8::from(*b));
        }
        Value::Int(i) => {
            dst.put_u8(TAG_INT);
            dst.put_i64_le(*i);
        }
        Value::Float(f) => {
            dst.put_u8(TAG_FLOAT);
            dst.put_u64_le(f.to_bits());
        }
        Value::Str(s) => put_sized(dst, TAG_STR, s.as_bytes())?,
        Value::Bytes(b) => put_sized(dst, TAG_BYTES, b)?,
        Value::Json(j) => {
            let text = serde_json::to_vec(j)
                .map_err(|err| FrameError::Malformed(format!("json value: {err}")))?;
            put_sized(dst, TAG_JSON, &text)?;
        }
    }
    Ok(())
}

fn put_sized(dst: &mut BytesMut, tag: u8, data: &[u8]) -> Result<()> {
    if data.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(5 + data.len());
    dst.put_u8(tag);
    dst.put_u32_le(data.len() as u32);
    dst.put_slice(data);
    Ok(())
}

/// Decode one value, consuming exactly its bytes from `src`.
pub fn decode_value(src: &mut Bytes) -> Result<Value> {
    if !src.has_remaining() {
        return Err(FrameError::Truncated("value tag"));
    }
    let tag = src.get_u8();
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => {
            if src.remaining() < 1 {
                return Err(FrameError::Truncated("bool"));
            }
            match src.get_u8() {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(FrameError::Malformed(format!("invalid bool byte {other}"))),
            }
        }
        TAG_INT => {
            if src.remaining() < 8 {
                return Err(FrameError::Truncated("int"));
            }
            Ok(Value::Int(src.get_i64_le()))
        }
        TAG_FLOAT => {
            if src.remaining() < 8 {
                return Err(FrameError::Truncated("float"));
            }
            Ok(Value::Float(f64::from_bits(src.get_u64_le())))
        }
        TAG_STR => {
            let raw = take_sized(src, "string")?;
            let text = String::from_utf8(raw.to_vec())
                .map_err(|_| FrameError::Malformed("string value is not UTF-8".to_string()))?;
            Ok(Value::Str(text))
        }
        TAG_BYTES => Ok(Value::Bytes(take_sized(src, "bytes")?)),
        TAG_JSON => {
            let raw = take_sized(src, "json")?;
            let json = serde_json::from_slice(&raw)
                .map_err(|err| FrameError::Malformed(format!("json value: {err}")))?;
            Ok(Value::Json(json))
        }
        other => Err(FrameError::Malformed(format!("unknown value tag {other}"))),
    }
}

fn take_sized(src: &mut Bytes, what: &'static str) -> Result<Bytes> {
    if src.remaining() < 4 {
        return Err(FrameError::Truncated(what));
    }
    let len = src.get_u32_le() as usize;
    if src.remaining() < len {
        return Err(FrameError::Truncated(what));
    }
    Ok(src.split_to(len))
}

/// Typed decoding out of a [`Value`].
pub trait FromValue: Sized {
    /// Shape this type accepts, recorded at registration time.
    const SHAPE: Shape;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError>;
}

/// Typed encoding into a [`Value`].
pub trait IntoValue {
    /// Shape this type produces.
    const SHAPE: Shape;

    fn into_value(self) -> std::result::Result<Value, ValueError>;
}

impl FromValue for Value {
    const SHAPE: Shape = Shape::Any;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        Ok(value)
    }
}

impl IntoValue for Value {
    const SHAPE: Shape = Shape::Any;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(self)
    }
}

impl FromValue for () {
    const SHAPE: Shape = Shape::Null;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        match value {
            Value::Null => Ok(()),
            other => Err(other.mismatch(Shape::Null)),
        }
    }
}

impl IntoValue for () {
    const SHAPE: Shape = Shape::Null;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Null)
    }
}

impl FromValue for bool {
    const SHAPE: Shape = Shape::Bool;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(other.mismatch(Shape::Bool)),
        }
    }
}

impl IntoValue for bool {
    const SHAPE: Shape = Shape::Bool;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Bool(self))
    }
}

macro_rules! impl_int_from {
    ($($ty:ty),*) => {$(
        impl FromValue for $ty {
            const SHAPE: Shape = Shape::Int;

            fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
                match value {
                    Value::Int(i) => <$ty>::try_from(i).map_err(|_| ValueError::OutOfRange {
                        value: i,
                        target: stringify!($ty),
                    }),
                    other => Err(other.mismatch(Shape::Int)),
                }
            }
        }
    )*};
}

macro_rules! impl_int_into {
    ($($ty:ty),*) => {$(
        impl IntoValue for $ty {
            const SHAPE: Shape = Shape::Int;

            fn into_value(self) -> std::result::Result<Value, ValueError> {
                Ok(Value::Int(i64::from(self)))
            }
        }
    )*};
}

impl_int_from!(i8, i16, i32, i64, u8, u16, u32, u64, usize);
impl_int_into!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_wide_int_into {
    ($($ty:ty),*) => {$(
        impl IntoValue for $ty {
            const SHAPE: Shape = Shape::Int;

            fn into_value(self) -> std::result::Result<Value, ValueError> {
                i64::try_from(self)
                    .map(Value::Int)
                    .map_err(|_| ValueError::Overflow(self as u64))
            }
        }
    )*};
}

impl_wide_int_into!(u64, usize);

impl FromValue for f64 {
    const SHAPE: Shape = Shape::Float;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(other.mismatch(Shape::Float)),
        }
    }
}

impl IntoValue for f64 {
    const SHAPE: Shape = Shape::Float;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Float(self))
    }
}

impl FromValue for f32 {
    const SHAPE: Shape = Shape::Float;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        let wide = f64::from_value(value)?;
        // Infinities and NaN carry over; finite values must fit.
        if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
            return Err(ValueError::FloatOutOfRange {
                value: wide,
                target: "f32",
            });
        }
        Ok(wide as f32)
    }
}

impl IntoValue for f32 {
    const SHAPE: Shape = Shape::Float;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Float(f64::from(self)))
    }
}

impl FromValue for String {
    const SHAPE: Shape = Shape::Str;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch(Shape::Str)),
        }
    }
}

impl IntoValue for String {
    const SHAPE: Shape = Shape::Str;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Str(self))
    }
}

impl IntoValue for &str {
    const SHAPE: Shape = Shape::Str;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Str(self.to_string()))
    }
}

impl FromValue for Bytes {
    const SHAPE: Shape = Shape::Bytes;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch(Shape::Bytes)),
        }
    }
}

impl IntoValue for Bytes {
    const SHAPE: Shape = Shape::Bytes;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Bytes(self))
    }
}

impl FromValue for Vec<u8> {
    const SHAPE: Shape = Shape::Bytes;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        Bytes::from_value(value).map(|b| b.to_vec())
    }
}

impl IntoValue for Vec<u8> {
    const SHAPE: Shape = Shape::Bytes;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Bytes(Bytes::from(self)))
    }
}

impl IntoValue for &[u8] {
    const SHAPE: Shape = Shape::Bytes;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Bytes(Bytes::copy_from_slice(self)))
    }
}

impl<const N: usize> FromValue for [u8; N] {
    const SHAPE: Shape = Shape::Bytes;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        let bytes = Bytes::from_value(value)?;
        <[u8; N]>::try_from(bytes.as_ref()).map_err(|_| ValueError::LengthMismatch {
            expected: N,
            actual: bytes.len(),
        })
    }
}

impl<const N: usize> IntoValue for [u8; N] {
    const SHAPE: Shape = Shape::Bytes;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Bytes(Bytes::copy_from_slice(&self)))
    }
}

impl FromValue for serde_json::Value {
    const SHAPE: Shape = Shape::Json;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        Ok(value.into_json())
    }
}

impl IntoValue for serde_json::Value {
    const SHAPE: Shape = Shape::Json;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Ok(Value::Json(self))
    }
}

/// `Null` is `None`; anything else must convert to `T`.
///
/// The slot is recorded as [`Shape::Any`] because it takes `Null` as well as
/// `T`'s shape; the check against `T` happens in `from_value`.
impl<T: FromValue> FromValue for Option<T> {
    const SHAPE: Shape = Shape::Any;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    const SHAPE: Shape = Shape::Any;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        match self {
            Some(inner) => inner.into_value(),
            None => Ok(Value::Null),
        }
    }
}

/// Carries any serde type as a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromValue for Json<T> {
    const SHAPE: Shape = Shape::Json;

    fn from_value(value: Value) -> std::result::Result<Self, ValueError> {
        serde_json::from_value(value.into_json())
            .map(Json)
            .map_err(|err| ValueError::Json(err.to_string()))
    }
}

impl<T: Serialize> IntoValue for Json<T> {
    const SHAPE: Shape = Shape::Json;

    fn into_value(self) -> std::result::Result<Value, ValueError> {
        Value::json(&self.0)
    }
}

/// Conversion of an argument list into payload values.
pub trait IntoArgs {
    fn into_args(self) -> std::result::Result<Vec<Value>, ValueError>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> std::result::Result<Vec<Value>, ValueError> {
        Ok(self)
    }
}

macro_rules! impl_into_args {
    ($($arg:ident),*) => {
        impl<$($arg: IntoValue,)*> IntoArgs for ($($arg,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> std::result::Result<Vec<Value>, ValueError> {
                let ($($arg,)*) = self;
                Ok(vec![$($arg.into_value()?,)*])
            }
        }
    };
}

impl_into_args!();
impl_into_args!(A1);
impl_into_args!(A1, A2);
impl_into_args!(A1, A2, A3);
impl_into_args!(A1, A2, A3, A4);
impl_into_args!(A1, A2, A3, A4, A5);
impl_into_args!(A1, A2, A3, A4, A5, A6);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) -> Value {
        let mut buf = BytesMut::new();
        encode_value(&value, &mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = decode_value(&mut bytes).unwrap();
        assert!(bytes.is_empty(), "decode must consume exactly one value");
        decoded
    }

    #[test]
    fn every_variant_roundtrips() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-42),
            Value::Int(0),
            Value::Int(i64::MIN),
            Value::Int(i64::MAX),
            Value::Float(2.5),
            Value::Float(-0.0),
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(f64::MIN_POSITIVE),
            Value::Str("héllo".to_string()),
            Value::Str(String::new()),
            Value::Bytes(Bytes::from_static(&[0, 1, 2, 255])),
            Value::Bytes(Bytes::new()),
            Value::Json(serde_json::json!({"a": [1, 2, {"b": null}]})),
            Value::Json(serde_json::Value::Null),
        ];
        for value in values {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    /// NaN never compares equal, so it is checked by bit pattern.
    #[test]
    fn nan_roundtrips_bit_for_bit() {
        let nan = f64::from_bits(0x7ff8_0000_dead_beef);
        match roundtrip(Value::Float(nan)) {
            Value::Float(back) => assert_eq!(back.to_bits(), nan.to_bits()),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn truncated_input_is_reported() {
        let mut buf = BytesMut::new();
        encode_value(&Value::Str("truncate me".to_string()), &mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        let mut bytes = buf.freeze();
        assert!(matches!(
            decode_value(&mut bytes),
            Err(FrameError::Truncated("string"))
        ));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let mut bytes = Bytes::from_static(&[0x7f]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut bytes = Bytes::from_static(&[TAG_STR, 2, 0, 0, 0, 0xff, 0xfe]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn shapes_accept_matching_values() {
        assert!(Shape::Str.accepts(&Value::Str(String::new())));
        assert!(!Shape::Str.accepts(&Value::Int(1)));
        assert!(Shape::Float.accepts(&Value::Int(1)));
        assert!(Shape::Any.accepts(&Value::Null));
        assert!(Shape::Json.accepts(&Value::Bytes(Bytes::new())));
        assert!(!Shape::Bytes.accepts(&Value::Null));
    }

    #[test]
    fn integer_conversion_is_range_checked() {
        assert_eq!(u8::from_value(Value::Int(200)).unwrap(), 200);
        assert_eq!(
            u8::from_value(Value::Int(300)),
            Err(ValueError::OutOfRange {
                value: 300,
                target: "u8"
            })
        );
        assert!(u64::from_value(Value::Int(-1)).is_err());
        assert_eq!(7u64.into_value(), Ok(Value::Int(7)));
        assert_eq!(u64::MAX.into_value(), Err(ValueError::Overflow(u64::MAX)));
    }

    #[test]
    fn fixed_arrays_check_length() {
        let key = [7u8; 32];
        let value = key.into_value().unwrap();
        assert_eq!(<[u8; 32]>::from_value(value.clone()).unwrap(), key);
        assert_eq!(
            <[u8; 16]>::from_value(value),
            Err(ValueError::LengthMismatch {
                expected: 16,
                actual: 32
            })
        );
    }

    #[test]
    fn shape_mismatch_names_both_sides() {
        let err = String::from_value(Value::Bool(false)).unwrap_err();
        assert_eq!(err.to_string(), "expected string, got bool");
    }

    #[test]
    fn json_wrapper_uses_serde() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }

        let value = Json(Point { x: 1, y: -2 }).into_value().unwrap();
        let Json(point) = Json::<Point>::from_value(roundtrip(value)).unwrap();
        assert_eq!(point, Point { x: 1, y: -2 });
    }

    #[test]
    fn tuples_become_argument_lists() {
        let args = ("hi", 3i32, true).into_args().unwrap();
        assert_eq!(
            args,
            vec![Value::Str("hi".to_string()), Value::Int(3), Value::Bool(true)]
        );
        assert!(().into_args().unwrap().is_empty());
    }

    #[test]
    fn option_maps_none_to_null() {
        assert_eq!(None::<String>.into_value().unwrap(), Value::Null);
        assert_eq!(Some(5i64).into_value().unwrap(), Value::Int(5));
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::Int(5)).unwrap(), Some(5));
        assert!(Option::<i64>::from_value(Value::Str("5".to_string())).is_err());
    }

    #[test]
    fn f32_conversion_is_range_checked() {
        assert_eq!(f32::from_value(Value::Float(1.5)).unwrap(), 1.5);
        assert_eq!(f32::from_value(Value::Int(3)).unwrap(), 3.0);
        assert_eq!(
            f32::from_value(Value::Float(1e300)),
            Err(ValueError::FloatOutOfRange {
                value: 1e300,
                target: "f32"
            })
        );
        assert!(f32::from_value(Value::Float(f64::INFINITY))
            .unwrap()
            .is_infinite());
        assert_eq!(1.25f32.into_value().unwrap(), Value::Float(1.25));
    }
}
