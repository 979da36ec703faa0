//! Type/value codec
//!
//! Converts between the native runtime's tagged-union slots ([`DataValue`])
//! and host values ([`Value`]). Only a fixed, closed set of tags crosses the
//! boundary.

use crate::error::{BridgeError, BridgeResult};
use crate::fold::FoldId;
use crate::managed::Managed;
use crate::native::{EngineAddr, NativeHandle};
use std::fmt;
use thiserror::Error;

/// Maximum number of parameters or results a marshalled method call may carry.
pub const MAX_PARAMS: usize = 10;

/// Tag of a native value slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Invalid,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Object,
    HostValue,
    ListProperty,
    VariantList,
}

/// A native value slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DataValue {
    #[default]
    Invalid,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Opaque native object.
    Object(NativeHandle),
    /// Native wrapper of a host value the bridge handed out earlier.
    HostValue(FoldId),
    ListProperty(NativeHandle),
    VariantList(Vec<DataValue>),
}

impl DataValue {
    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::Invalid => DataType::Invalid,
            DataValue::Bool(_) => DataType::Bool,
            DataValue::Int32(_) => DataType::Int32,
            DataValue::Int64(_) => DataType::Int64,
            DataValue::Float32(_) => DataType::Float32,
            DataValue::Float64(_) => DataType::Float64,
            DataValue::String(_) => DataType::String,
            DataValue::Object(_) => DataType::Object,
            DataValue::HostValue(_) => DataType::HostValue,
            DataValue::ListProperty(_) => DataType::ListProperty,
            DataValue::VariantList(_) => DataType::VariantList,
        }
    }
}

/// Handle to an object living in the native runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Object {
    engine: Option<EngineAddr>,
    addr: NativeHandle,
}

impl Object {
    pub fn new(engine: Option<EngineAddr>, addr: NativeHandle) -> Self {
        Self { engine, addr }
    }

    pub fn engine(&self) -> Option<EngineAddr> {
        self.engine
    }

    pub fn addr(&self) -> NativeHandle {
        self.addr
    }
}

/// Ordered list of values received from the native side.
///
/// It stays generic until assigned to a typed target, where each element is
/// converted individually.
#[derive(Debug, Clone, Default)]
pub struct List {
    data: Vec<Value>,
}

impl List {
    pub fn new(data: Vec<Value>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.data.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.data.iter()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.data
    }

    /// Convert every element into `T`.
    pub fn convert<T: Marshal>(&self) -> Result<Vec<T>, ConvertError> {
        let target = ValueKind::Seq(Box::new(T::kind()));
        let converted = Value::List(self.clone()).convert(&target)?;
        Vec::<T>::from_value(converted).ok_or(ConvertError {
            from: "list".into(),
            to: target.to_string(),
        })
    }
}

/// Declared kind of a field, parameter or sequence element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Any,
    Bool,
    Int,
    Float,
    String,
    Object,
    Managed,
    List,
    /// Sequence with a fixed element kind.
    Seq(Box<ValueKind>),
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Any => f.write_str("any"),
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Int => f.write_str("int"),
            ValueKind::Float => f.write_str("float"),
            ValueKind::String => f.write_str("string"),
            ValueKind::Object => f.write_str("object"),
            ValueKind::Managed => f.write_str("value"),
            ValueKind::List => f.write_str("list"),
            ValueKind::Seq(elem) => write!(f, "[]{elem}"),
        }
    }
}

/// A host-side value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(Object),
    Managed(Managed),
    List(List),
    Seq { elem: ValueKind, items: Vec<Value> },
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Any,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Object(_) => ValueKind::Object,
            Value::Managed(_) => ValueKind::Managed,
            Value::List(_) => ValueKind::List,
            Value::Seq { elem, .. } => ValueKind::Seq(Box::new(elem.clone())),
        }
    }

    /// Name used in conversion diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Managed(m) => m.type_name().to_string(),
            other => other.kind().to_string(),
        }
    }

    /// Convert to `target`, element-wise for sequences.
    pub fn convert(self, target: &ValueKind) -> Result<Value, ConvertError> {
        let from = self.type_name();
        let fail = || ConvertError {
            from: from.clone(),
            to: target.to_string(),
        };
        match (self, target) {
            (v, ValueKind::Any) => Ok(v),
            (v @ Value::Bool(_), ValueKind::Bool) => Ok(v),
            (v @ Value::Int(_), ValueKind::Int) => Ok(v),
            (Value::Int(i), ValueKind::Float) => Ok(Value::Float(i as f64)),
            (v @ Value::Float(_), ValueKind::Float) => Ok(v),
            (Value::Float(x), ValueKind::Int) => Ok(Value::Int(x as i64)),
            (v @ Value::String(_), ValueKind::String) => Ok(v),
            (v @ Value::Object(_), ValueKind::Object) => Ok(v),
            (v @ Value::Managed(_), ValueKind::Managed) => Ok(v),
            (v @ Value::List(_), ValueKind::List) => Ok(v),
            (Value::Seq { items, .. }, ValueKind::List) => Ok(Value::List(List::new(items))),
            (Value::List(list), ValueKind::Seq(elem)) => convert_items(list.into_inner(), elem)
                .map_err(|_| fail()),
            (Value::Seq { items, .. }, ValueKind::Seq(elem)) => {
                convert_items(items, elem).map_err(|_| fail())
            }
            _ => Err(fail()),
        }
    }
}

fn convert_items(items: Vec<Value>, elem: &ValueKind) -> Result<Value, ConvertError> {
    let items = items
        .into_iter()
        .map(|item| item.convert(elem))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Seq {
        elem: elem.clone(),
        items,
    })
}

/// A value could not be converted to the requested kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot use {from} as a {to}")]
pub struct ConvertError {
    pub from: String,
    pub to: String,
}

/// Rust types that can be stored in reflected fields and method signatures.
pub trait Marshal: Sized + 'static {
    fn kind() -> ValueKind;
    fn into_value(self) -> Value;
    /// `None` when `value` is not already of [`Marshal::kind`].
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! marshal_scalar {
    ($ty:ty, $kind:ident, $variant:ident, |$v:ident| $into:expr, |$w:ident| $from:expr) => {
        impl Marshal for $ty {
            fn kind() -> ValueKind {
                ValueKind::$kind
            }

            fn into_value(self) -> Value {
                let $v = self;
                Value::$variant($into)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant($w) => $from,
                    _ => None,
                }
            }
        }
    };
}

marshal_scalar!(bool, Bool, Bool, |v| v, |w| Some(w));
marshal_scalar!(i64, Int, Int, |v| v, |w| Some(w));
marshal_scalar!(i32, Int, Int, |v| i64::from(v), |w| i32::try_from(w).ok());
marshal_scalar!(u32, Int, Int, |v| i64::from(v), |w| u32::try_from(w).ok());
marshal_scalar!(f64, Float, Float, |v| v, |w| Some(w));
marshal_scalar!(f32, Float, Float, |v| f64::from(v), |w| Some(w as f32));
marshal_scalar!(String, String, String, |v| v, |w| Some(w));
marshal_scalar!(Object, Object, Object, |v| v, |w| Some(w));
marshal_scalar!(Managed, Managed, Managed, |v| v, |w| Some(w));
marshal_scalar!(List, List, List, |v| v, |w| Some(w));

impl Marshal for Value {
    fn kind() -> ValueKind {
        ValueKind::Any
    }

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn kind() -> ValueKind {
        ValueKind::Seq(Box::new(T::kind()))
    }

    fn into_value(self) -> Value {
        Value::Seq {
            elem: T::kind(),
            items: self.into_iter().map(Marshal::into_value).collect(),
        }
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Seq { items, .. } => items.into_iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

macro_rules! value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    value.into_value()
                }
            }
        )*
    };
}

value_from!(bool, i64, i32, u32, f64, f32, String, Object, Managed, List);

/// Encode a host value into a native slot.
///
/// `wrap` hands managed values to the fold registry and yields their native
/// handle.
pub fn encode<W>(value: Value, wrap: &mut W) -> BridgeResult<DataValue>
where
    W: FnMut(&Managed) -> BridgeResult<NativeHandle>,
{
    Ok(match value {
        Value::Nil => DataValue::Invalid,
        Value::Bool(b) => DataValue::Bool(b),
        Value::Int(i) => match i32::try_from(i) {
            Ok(small) => DataValue::Int32(small),
            Err(_) => DataValue::Int64(i),
        },
        Value::Float(x) => DataValue::Float64(x),
        Value::String(s) => DataValue::String(s),
        Value::Object(obj) => DataValue::Object(obj.addr()),
        Value::Managed(m) => DataValue::Object(wrap(&m)?),
        Value::List(list) => encode_items(list.into_inner(), wrap)?,
        Value::Seq { items, .. } => encode_items(items, wrap)?,
    })
}

fn encode_items<W>(items: Vec<Value>, wrap: &mut W) -> BridgeResult<DataValue>
where
    W: FnMut(&Managed) -> BridgeResult<NativeHandle>,
{
    let encoded = items
        .into_iter()
        .map(|item| encode(item, wrap))
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(DataValue::VariantList(encoded))
}

/// Decode a native slot into a host value.
///
/// `lookup` maps a handed-out fold back to the managed value it wraps.
pub fn decode<L>(value: &DataValue, engine: Option<EngineAddr>, lookup: &L) -> BridgeResult<Value>
where
    L: Fn(FoldId) -> BridgeResult<Managed>,
{
    Ok(match value {
        DataValue::Invalid => Value::Nil,
        DataValue::Bool(b) => Value::Bool(*b),
        DataValue::Int32(i) => Value::Int(i64::from(*i)),
        DataValue::Int64(i) => Value::Int(*i),
        DataValue::Float32(x) => Value::Float(f64::from(*x)),
        DataValue::Float64(x) => Value::Float(*x),
        DataValue::String(s) => Value::String(s.clone()),
        DataValue::Object(handle) => Value::Object(Object::new(engine, *handle)),
        DataValue::HostValue(fold) => Value::Managed(lookup(*fold)?),
        DataValue::VariantList(items) => Value::List(List::new(
            items
                .iter()
                .map(|item| decode(item, engine, lookup))
                .collect::<BridgeResult<Vec<_>>>()?,
        )),
        DataValue::ListProperty(_) => {
            return Err(BridgeError::UnsupportedDataType("list property"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_wrap(_: &Managed) -> BridgeResult<NativeHandle> {
        panic!("no managed values expected")
    }

    fn no_lookup(fold: FoldId) -> BridgeResult<Managed> {
        Err(BridgeError::UnknownFold(fold))
    }

    #[test]
    fn integers_pack_by_width() {
        assert_eq!(encode(Value::Int(7), &mut no_wrap).unwrap(), DataValue::Int32(7));
        let big = i64::from(i32::MAX) + 1;
        assert_eq!(encode(Value::Int(big), &mut no_wrap).unwrap(), DataValue::Int64(big));
    }

    #[test]
    fn narrow_slots_widen_on_decode() {
        let v = decode(&DataValue::Float32(1.5), None, &no_lookup).unwrap();
        assert!(matches!(v, Value::Float(x) if x == 1.5));
        let v = decode(&DataValue::Int32(-3), None, &no_lookup).unwrap();
        assert!(matches!(v, Value::Int(-3)));
    }

    #[test]
    fn list_property_cannot_be_decoded() {
        let err = decode(&DataValue::ListProperty(NativeHandle(9)), None, &no_lookup).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedDataType(_)));
    }

    #[test]
    fn host_sequence_converts_into_compatible_element_type() {
        let ints = vec![1i64, 2, 3].into_value();
        let encoded = encode(ints, &mut no_wrap).unwrap();
        assert_eq!(encoded.data_type(), DataType::VariantList);

        let decoded = decode(&encoded, None, &no_lookup).unwrap();
        let target = Vec::<f64>::kind();
        let converted = decoded.convert(&target).unwrap();
        assert_eq!(Vec::<f64>::from_value(converted), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn incompatible_element_type_is_a_conversion_error() {
        let encoded = DataValue::VariantList(vec![DataValue::String("a".into())]);
        let decoded = decode(&encoded, None, &no_lookup).unwrap();
        let err = decoded.convert(&Vec::<bool>::kind()).unwrap_err();
        assert_eq!(err.to_string(), "cannot use list as a []bool");
    }

    #[test]
    fn list_converts_to_typed_vec() {
        let list = List::new(vec![Value::Float(2.9), Value::Int(4)]);
        assert_eq!(list.convert::<i64>().unwrap(), vec![2, 4]);
    }

    #[test]
    fn nil_does_not_convert_to_concrete_kinds() {
        let err = Value::Nil.convert(&ValueKind::String).unwrap_err();
        assert_eq!(err.from, "nil");
        assert!(Value::Nil.convert(&ValueKind::Any).is_ok());
    }

    #[test]
    fn nested_lists_encode_recursively() {
        let nested = Value::List(List::new(vec![
            Value::Bool(true),
            Value::List(List::new(vec![Value::String("x".into())])),
        ]));
        let encoded = encode(nested, &mut no_wrap).unwrap();
        assert_eq!(
            encoded,
            DataValue::VariantList(vec![
                DataValue::Bool(true),
                DataValue::VariantList(vec![DataValue::String("x".into())]),
            ])
        );
    }
}
