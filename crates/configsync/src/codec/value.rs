use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use super::types::ValueType;

/// Dynamically typed config value. Struct fields are stored in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    U8(u8),
    I8(i8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer interpretation used for the locking entry.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(*v as i64),
            Value::U8(v) => Some(*v as i64),
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::U16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::F32(v) => Some(v.round() as i64),
            Value::F64(v) => Some(v.round() as i64),
            Value::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Checks that the value has the shape `ty` describes. Null conforms to
    /// nullable types only.
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (Value::Null, ty) => ty.is_nullable(),
            (Value::Bool(_), ValueType::Bool)
            | (Value::U8(_), ValueType::U8)
            | (Value::I8(_), ValueType::I8)
            | (Value::I16(_), ValueType::I16)
            | (Value::U16(_), ValueType::U16)
            | (Value::I32(_), ValueType::I32)
            | (Value::U32(_), ValueType::U32)
            | (Value::I64(_), ValueType::I64)
            | (Value::U64(_), ValueType::U64)
            | (Value::F32(_), ValueType::F32)
            | (Value::F64(_), ValueType::F64)
            | (Value::String(_), ValueType::String) => true,
            (Value::List(items), ValueType::List(element)) => {
                items.iter().all(|item| !item.is_null() && item.conforms_to(element))
            }
            (Value::Map(pairs), ValueType::Map(key, value)) => pairs.iter().all(|(k, v)| {
                !k.is_null() && !v.is_null() && k.conforms_to(key) && v.conforms_to(value)
            }),
            (Value::Struct(fields), ValueType::Struct(schema)) => {
                fields.len() == schema.fields.len()
                    && fields
                        .iter()
                        .zip(&schema.fields)
                        .all(|(value, field)| !value.is_null() && value.conforms_to(&field.ty))
            }
            _ => false,
        }
    }
}

/// Rust types that can be stored in a synchronized entry.
pub trait SyncValue: Sized {
    fn value_type() -> ValueType;
    fn into_value(self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! primitive_sync_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl SyncValue for $ty {
                fn value_type() -> ValueType {
                    ValueType::$variant
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )+
    };
}

primitive_sync_value! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
}

impl<T: SyncValue> SyncValue for Option<T> {
    fn value_type() -> ValueType {
        T::value_type()
    }

    fn into_value(self) -> Value {
        self.map_or(Value::Null, T::into_value)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: SyncValue> SyncValue for Vec<T> {
    fn value_type() -> ValueType {
        ValueType::list(T::value_type())
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(T::into_value).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<K: SyncValue + Ord, V: SyncValue> SyncValue for BTreeMap<K, V> {
    fn value_type() -> ValueType {
        ValueType::map(K::value_type(), V::value_type())
    }

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(pairs) => pairs
                .iter()
                .map(|(k, v)| Some((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            _ => None,
        }
    }
}

impl<K: SyncValue + Eq + Hash, V: SyncValue> SyncValue for HashMap<K, V> {
    fn value_type() -> ValueType {
        ValueType::map(K::value_type(), V::value_type())
    }

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(pairs) => pairs
                .iter()
                .map(|(k, v)| Some((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            _ => None,
        }
    }
}

/// Implements [`SyncValue`] for a fieldless enum by mapping each variant to
/// its integer discriminant.
///
/// ```
/// use configsync::sync_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Difficulty {
///     Easy,
///     Hard,
/// }
///
/// sync_enum!(Difficulty: I32 { Easy = 0, Hard = 1 });
/// ```
#[macro_export]
macro_rules! sync_enum {
    ($ty:ident : $repr:ident { $($variant:ident = $val:expr),+ $(,)? }) => {
        impl $crate::SyncValue for $ty {
            fn value_type() -> $crate::ValueType {
                $crate::ValueType::$repr
            }

            fn into_value(self) -> $crate::Value {
                $crate::Value::$repr(match self {
                    $($ty::$variant => $val,)+
                })
            }

            fn from_value(value: &$crate::Value) -> Option<Self> {
                match value {
                    $($crate::Value::$repr(v) if *v == $val => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

/// On/off switch, the usual type of a locking entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Toggle {
    Off,
    On,
}

sync_enum!(Toggle: I32 { Off = 0, On = 1 });

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        if value { Toggle::On } else { Toggle::Off }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_travels_as_underlying_integer() {
        assert_eq!(Toggle::value_type(), ValueType::I32);
        assert_eq!(Toggle::On.into_value(), Value::I32(1));
        assert_eq!(Toggle::from_value(&Value::I32(0)), Some(Toggle::Off));
        assert_eq!(Toggle::from_value(&Value::I32(7)), None);
    }

    #[test]
    fn test_null_only_conforms_to_nullable_types() {
        assert!(Value::Null.conforms_to(&ValueType::String));
        assert!(Value::Null.conforms_to(&ValueType::list(ValueType::I32)));
        assert!(!Value::Null.conforms_to(&ValueType::F32));
    }

    #[test]
    fn test_typed_collections_convert_both_ways() {
        let mut costs = BTreeMap::new();
        costs.insert("Wood".to_string(), 10i32);
        costs.insert("LeatherScraps".to_string(), 5);

        let value = costs.clone().into_value();
        assert!(value.conforms_to(&BTreeMap::<String, i32>::value_type()));
        assert_eq!(BTreeMap::<String, i32>::from_value(&value), Some(costs));
    }

    #[test]
    fn test_locking_value_interprets_numbers_and_strings() {
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::F32(0.4).as_i64(), Some(0));
        assert_eq!(Value::String(" 3 ".into()).as_i64(), Some(3));
        assert_eq!(Value::List(vec![]).as_i64(), None);
    }
}
