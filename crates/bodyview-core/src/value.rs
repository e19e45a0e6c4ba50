//! Argument value model carried by protocol messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProtocolError;

/// JSON has no NaN or infinity; those travel as the strings `"nan"`,
/// `"inf"` and `"-inf"` in place of the number.
#[derive(Serialize, Deserialize)]
enum NonFinite {
    #[serde(rename = "nan")]
    Nan,
    #[serde(rename = "inf")]
    Inf,
    #[serde(rename = "-inf")]
    NegInf,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireFloat<F> {
    Finite(F),
    NonFinite(NonFinite),
}

trait Float: Copy {
    const NAN: Self;
    const INFINITY: Self;
    const NEG_INFINITY: Self;

    fn is_finite(self) -> bool;
    fn is_nan(self) -> bool;
    fn is_sign_positive(self) -> bool;
}

macro_rules! impl_float {
    ($($t:ty),*) => {$(
        impl Float for $t {
            const NAN: Self = <$t>::NAN;
            const INFINITY: Self = <$t>::INFINITY;
            const NEG_INFINITY: Self = <$t>::NEG_INFINITY;

            fn is_finite(self) -> bool {
                <$t>::is_finite(self)
            }
            fn is_nan(self) -> bool {
                <$t>::is_nan(self)
            }
            fn is_sign_positive(self) -> bool {
                <$t>::is_sign_positive(self)
            }
        }
    )*};
}

impl_float!(f32, f64);

impl<F: Float> WireFloat<F> {
    fn encode(value: F) -> Self {
        if value.is_finite() {
            Self::Finite(value)
        } else if value.is_nan() {
            Self::NonFinite(NonFinite::Nan)
        } else if value.is_sign_positive() {
            Self::NonFinite(NonFinite::Inf)
        } else {
            Self::NonFinite(NonFinite::NegInf)
        }
    }

    fn decode(self) -> F {
        match self {
            Self::Finite(value) => value,
            Self::NonFinite(NonFinite::Nan) => F::NAN,
            Self::NonFinite(NonFinite::Inf) => F::INFINITY,
            Self::NonFinite(NonFinite::NegInf) => F::NEG_INFINITY,
        }
    }
}

/// `Value::Float` payload.
mod wire_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::WireFloat;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        WireFloat::encode(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        WireFloat::<f64>::deserialize(deserializer).map(WireFloat::decode)
    }
}

/// Element type of an [`NdArray`].
pub trait Element: Sized {
    /// Serialize the flat data of an array.
    ///
    /// # Errors
    /// Returns the serializer's error.
    fn serialize_data<S: Serializer>(data: &[Self], serializer: S) -> Result<S::Ok, S::Error>;

    /// Deserialize the flat data of an array.
    ///
    /// # Errors
    /// Returns the deserializer's error.
    fn deserialize_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Self>, D::Error>;
}

impl Element for i64 {
    fn serialize_data<S: Serializer>(data: &[Self], serializer: S) -> Result<S::Ok, S::Error> {
        data.serialize(serializer)
    }

    fn deserialize_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Self>, D::Error> {
        Vec::deserialize(deserializer)
    }
}

impl Element for f32 {
    fn serialize_data<S: Serializer>(data: &[Self], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(data.iter().map(|&v| WireFloat::encode(v)))
    }

    fn deserialize_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Self>, D::Error> {
        let data = Vec::<WireFloat<Self>>::deserialize(deserializer)?;
        Ok(data.into_iter().map(WireFloat::decode).collect())
    }
}

/// Dense row-major array with an explicit shape.
///
/// Mesh vertices, joint positions and pose parameters travel as `NdArray`s;
/// the protocol never interprets the numbers, only the shape. Float data may
/// hold NaN or infinities (missing joints, for instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Element", deserialize = "T: Element"))]
pub struct NdArray<T> {
    shape: Vec<usize>,
    #[serde(
        serialize_with = "T::serialize_data",
        deserialize_with = "T::deserialize_data"
    )]
    data: Vec<T>,
}

impl<T> NdArray<T> {
    /// Create an array, checking that `shape` matches `data`.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the shape product differs from `data.len()`.
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self, ProtocolError> {
        let array = Self { shape, data };
        array.validate()?;
        Ok(array)
    }

    /// One-dimensional array.
    #[must_use]
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Array shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major data.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Size of the leading dimension (frames for sequence data).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Whether the leading dimension is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the array, returning shape and data.
    #[must_use]
    pub fn into_parts(self) -> (Vec<usize>, Vec<T>) {
        (self.shape, self.data)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let expected = self
            .shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
        match expected {
            Some(n) if n == self.data.len() => Ok(()),
            _ => Err(ProtocolError::ShapeMismatch {
                shape: self.shape.clone(),
                len: self.data.len(),
            }),
        }
    }
}

/// Argument value.
///
/// Limited to primitives, arrays of primitives, and nested lists/maps of the
/// same so that every message stays serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    #[serde(with = "wire_f64")]
    Float(f64),
    Str(String),
    FloatArray(NdArray<f32>),
    IntArray(NdArray<i64>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Integer payload, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, accepting integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Float array payload, if any.
    #[must_use]
    pub const fn as_float_array(&self) -> Option<&NdArray<f32>> {
        match self {
            Self::FloatArray(a) => Some(a),
            _ => None,
        }
    }

    /// Integer array payload, if any.
    #[must_use]
    pub const fn as_int_array(&self) -> Option<&NdArray<i64>> {
        match self {
            Self::IntArray(a) => Some(a),
            _ => None,
        }
    }

    /// Check array shapes recursively.
    ///
    /// # Errors
    /// Returns the first `ShapeMismatch` found.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::FloatArray(a) => a.validate(),
            Self::IntArray(a) => a.validate(),
            Self::List(items) => items.iter().try_for_each(Self::validate),
            Self::Map(entries) => entries.values().try_for_each(Self::validate),
            _ => Ok(()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<NdArray<f32>> for Value {
    fn from(v: NdArray<f32>) -> Self {
        Self::FloatArray(v)
    }
}

impl From<NdArray<i64>> for Value {
    fn from(v: NdArray<i64>) -> Self {
        Self::IntArray(v)
    }
}

impl From<[f32; 3]> for Value {
    fn from(v: [f32; 3]) -> Self {
        Self::FloatArray(NdArray::from_vec(v.to_vec()))
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Self>> for Value {
    fn from(v: Vec<Self>) -> Self {
        Self::List(v)
    }
}

/// Positional and keyword arguments of one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// Positional arguments, in order.
    pub positional: Vec<Value>,
    /// Keyword arguments.
    pub keyword: BTreeMap<String, Value>,
}

impl Args {
    /// Empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Merge keyword arguments, overriding existing names.
    #[must_use]
    pub fn extend_kwargs<I, K>(mut self, more: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.keyword.extend(more.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// Whether there are no arguments at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}
