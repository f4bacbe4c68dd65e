use super::package::Package;
use super::types::{FieldSchema, TypeRegistry, ValueType};
use super::value::Value;
use crate::error::CodecError;

const PAIR_KEY: &str = "key";
const PAIR_VALUE: &str = "value";

/// Appends `value` to `package` using the encoding for `ty`.
///
/// Struct fields and dictionary pairs carry a type tag per field so the
/// receiver can detect schema drift. Null is not encoded here; it is carried
/// as an empty type tag by the caller.
pub fn encode(package: &mut Package, value: &Value, ty: &ValueType) -> Result<(), CodecError> {
    let shape = || CodecError::ValueShape {
        expected: ty.type_name(),
    };
    match (value, ty) {
        (Value::Bool(v), ValueType::Bool) => package.write_bool(*v),
        (Value::U8(v), ValueType::U8) => package.write_u8(*v),
        (Value::I8(v), ValueType::I8) => package.write_i8(*v),
        (Value::I16(v), ValueType::I16) => package.write_i16(*v),
        (Value::U16(v), ValueType::U16) => package.write_u16(*v),
        (Value::I32(v), ValueType::I32) => package.write_i32(*v),
        (Value::U32(v), ValueType::U32) => package.write_u32(*v),
        (Value::I64(v), ValueType::I64) => package.write_i64(*v),
        (Value::U64(v), ValueType::U64) => package.write_u64(*v),
        (Value::F32(v), ValueType::F32) => package.write_f32(*v),
        (Value::F64(v), ValueType::F64) => package.write_f64(*v),
        (Value::String(v), ValueType::String) => package.write_str(v),
        (Value::List(items), ValueType::List(element)) => {
            package.write_len(items.len());
            for item in items {
                encode(package, item, element)?;
            }
        }
        (Value::Map(pairs), ValueType::Map(key_ty, value_ty)) => {
            package.write_len(pairs.len());
            for (key, value) in pairs {
                package.write_len(2);
                package.write_str(&key_ty.type_name());
                encode(package, key, key_ty)?;
                package.write_str(&value_ty.type_name());
                encode(package, value, value_ty)?;
            }
        }
        (Value::Struct(fields), ValueType::Struct(schema)) => {
            if fields.len() != schema.fields.len() {
                return Err(shape());
            }
            package.write_len(fields.len());
            for (value, field) in fields.iter().zip(&schema.fields) {
                package.write_str(&field.ty.type_name());
                encode(package, value, &field.ty)?;
            }
        }
        _ => return Err(shape()),
    }
    Ok(())
}

/// Reads one value of type `ty`, consuming exactly the bytes [`encode`]
/// wrote for it. Stops at the first struct schema mismatch.
pub fn decode(package: &mut Package, ty: &ValueType) -> Result<Value, CodecError> {
    Reader::strict().read(package, ty)
}

/// Like [`decode`], but on a struct schema mismatch keeps reading the
/// remaining fields by their received type tags, so the cursor always ends
/// after the value. The first mismatch is still returned as the error.
///
/// Fails with [`CodecError::UnknownType`] when a received tag does not
/// resolve through `types`, since the value's extent is then unknown.
pub fn decode_resolving(
    package: &mut Package,
    ty: &ValueType,
    types: &TypeRegistry,
) -> Result<Value, CodecError> {
    let mut reader = Reader {
        types: Some(types),
        mismatch: None,
    };
    let value = reader.read(package, ty)?;
    match reader.mismatch {
        Some(mismatch) => Err(mismatch),
        None => Ok(value),
    }
}

struct Reader<'a> {
    types: Option<&'a TypeRegistry>,
    mismatch: Option<CodecError>,
}

impl<'a> Reader<'a> {
    fn strict() -> Self {
        Self {
            types: None,
            mismatch: None,
        }
    }

    /// Records a mismatch when resolving, fails otherwise.
    fn note_mismatch(&mut self, error: CodecError) -> Result<(), CodecError> {
        if self.types.is_none() {
            return Err(error);
        }
        self.mismatch.get_or_insert(error);
        Ok(())
    }

    fn read(&mut self, package: &mut Package, ty: &ValueType) -> Result<Value, CodecError> {
        Ok(match ty {
            ValueType::Bool => Value::Bool(package.read_bool()?),
            ValueType::U8 => Value::U8(package.read_u8()?),
            ValueType::I8 => Value::I8(package.read_i8()?),
            ValueType::I16 => Value::I16(package.read_i16()?),
            ValueType::U16 => Value::U16(package.read_u16()?),
            ValueType::I32 => Value::I32(package.read_i32()?),
            ValueType::U32 => Value::U32(package.read_u32()?),
            ValueType::I64 => Value::I64(package.read_i64()?),
            ValueType::U64 => Value::U64(package.read_u64()?),
            ValueType::F32 => Value::F32(package.read_f32()?),
            ValueType::F64 => Value::F64(package.read_f64()?),
            ValueType::String => Value::String(package.read_str()?),
            ValueType::List(element) => {
                let count = package.read_len()?;
                let mut items = Vec::with_capacity(count.min(package.remaining()));
                for _ in 0..count {
                    items.push(self.read(package, element)?);
                }
                Value::List(items)
            }
            ValueType::Map(key_ty, value_ty) => {
                let count = package.read_len()?;
                let fields = [
                    FieldSchema {
                        name: PAIR_KEY.to_string(),
                        ty: (**key_ty).clone(),
                    },
                    FieldSchema {
                        name: PAIR_VALUE.to_string(),
                        ty: (**value_ty).clone(),
                    },
                ];
                let pair_name = ty.type_name();
                let mut pairs = Vec::with_capacity(count.min(package.remaining()));
                for _ in 0..count {
                    let mut pair = self.read_fields(package, &pair_name, &fields)?;
                    let value = pair.pop().unwrap_or(Value::Null);
                    let key = pair.pop().unwrap_or(Value::Null);
                    pairs.push((key, value));
                }
                Value::Map(pairs)
            }
            ValueType::Struct(schema) => {
                Value::Struct(self.read_fields(package, &schema.name, &schema.fields)?)
            }
        })
    }

    fn read_fields(
        &mut self,
        package: &mut Package,
        struct_name: &str,
        fields: &[FieldSchema],
    ) -> Result<Vec<Value>, CodecError> {
        let count = package.read_len()?;
        if count != fields.len() {
            self.note_mismatch(CodecError::TypeMismatch {
                expected: format!("(field count: {})", fields.len()),
                received: format!("(field count: {})", count),
                field: struct_name.to_string(),
            })?;
        }

        let mut values = Vec::with_capacity(count.min(fields.len()));
        for i in 0..count {
            let received = package.read_str()?;
            let expected = fields.get(i).map(|field| (field.ty.type_name(), field));
            match expected {
                Some((expected, field)) if expected == received => {
                    values.push(self.read(package, &field.ty)?);
                }
                _ => {
                    if let Some((expected, field)) = expected {
                        self.note_mismatch(CodecError::TypeMismatch {
                            expected,
                            received: received.clone(),
                            field: field.name.clone(),
                        })?;
                    }
                    let ty = self
                        .types
                        .and_then(|types| types.resolve(&received))
                        .ok_or_else(|| CodecError::UnknownType(received.clone()))?;
                    values.push(self.read(package, &ty)?);
                }
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::codec::types::StructSchema;
    use crate::codec::value::{SyncValue, Toggle};

    fn round_trip(value: &Value, ty: &ValueType) -> Value {
        let mut package = Package::new();
        encode(&mut package, value, ty).unwrap();
        package.write_u8(0xAB);

        let mut reader = Package::from_bytes(package.into_bytes());
        let decoded = decode(&mut reader, ty).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 0xAB, "decode consumed wrong byte count");
        decoded
    }

    fn vec3(fields: &[(&'static str, ValueType)]) -> ValueType {
        ValueType::structure(StructSchema::new("Vec3", fields.iter().cloned()))
    }

    #[test]
    fn test_primitives_round_trip() {
        let cases = [
            (Value::Bool(true), ValueType::Bool),
            (Value::U8(200), ValueType::U8),
            (Value::I16(-300), ValueType::I16),
            (Value::U32(4_000_000_000), ValueType::U32),
            (Value::I64(-1), ValueType::I64),
            (Value::F32(10.0), ValueType::F32),
            (Value::F64(0.125), ValueType::F64),
            (Value::String("Wood,10,5".into()), ValueType::String),
        ];
        for (value, ty) in cases {
            assert_eq!(round_trip(&value, &ty), value);
        }
    }

    #[test]
    fn test_enum_round_trips_through_underlying_integer() {
        let value = Toggle::On.into_value();
        let decoded = round_trip(&value, &Toggle::value_type());
        assert_eq!(Toggle::from_value(&decoded), Some(Toggle::On));
    }

    #[test]
    fn test_struct_round_trips() {
        let ty = vec3(&[("x", ValueType::F32), ("y", ValueType::F32), ("z", ValueType::F32)]);
        let value = Value::Struct(vec![Value::F32(1.0), Value::F32(-2.0), Value::F32(3.5)]);
        assert_eq!(round_trip(&value, &ty), value);
    }

    #[test]
    fn test_dictionary_and_collection_round_trip() {
        let mut costs = BTreeMap::new();
        costs.insert("Wood".to_string(), vec![10i32, 5]);
        costs.insert("SwordCheat".to_string(), vec![1, 0]);
        let ty = BTreeMap::<String, Vec<i32>>::value_type();
        let value = costs.into_value();
        assert_eq!(round_trip(&value, &ty), value);

        let items = vec![3u64, 1, 2].into_value();
        assert_eq!(round_trip(&items, &ValueType::list(ValueType::U64)), items);
    }

    #[test]
    fn test_struct_field_count_mismatch_is_reported() {
        let sent = vec3(&[("x", ValueType::F32), ("y", ValueType::F32)]);
        let expected = vec3(&[("x", ValueType::F32), ("y", ValueType::F32), ("z", ValueType::F32)]);

        let mut package = Package::new();
        encode(&mut package, &Value::Struct(vec![Value::F32(1.0), Value::F32(2.0)]), &sent).unwrap();

        let mut reader = Package::from_bytes(package.into_bytes());
        let err = decode(&mut reader, &expected).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch {
                expected: "(field count: 3)".into(),
                received: "(field count: 2)".into(),
                field: "Vec3".into(),
            }
        );
    }

    #[test]
    fn test_struct_field_type_mismatch_names_the_field() {
        let sent = vec3(&[("x", ValueType::F32), ("y", ValueType::I32)]);
        let expected = vec3(&[("x", ValueType::F32), ("y", ValueType::F32)]);

        let mut package = Package::new();
        encode(&mut package, &Value::Struct(vec![Value::F32(1.0), Value::I32(2)]), &sent).unwrap();

        let mut reader = Package::from_bytes(package.into_bytes());
        match decode(&mut reader, &expected) {
            Err(CodecError::TypeMismatch { expected, received, field }) => {
                assert_eq!(expected, "f32");
                assert_eq!(received, "i32");
                assert_eq!(field, "y");
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_value_shape_is_refused_on_encode() {
        let mut package = Package::new();
        let err = encode(&mut package, &Value::I32(1), &ValueType::F32).unwrap_err();
        assert_eq!(err, CodecError::ValueShape { expected: "f32".into() });
    }

    #[test]
    fn test_resolving_decode_stays_aligned_after_field_mismatch() {
        let sent = vec3(&[("x", ValueType::F32), ("y", ValueType::I32), ("z", ValueType::F32)]);
        let expected = vec3(&[("x", ValueType::F32), ("y", ValueType::F32)]);

        let mut package = Package::new();
        let value = Value::Struct(vec![Value::F32(1.0), Value::I32(2), Value::F32(3.0)]);
        encode(&mut package, &value, &sent).unwrap();
        package.write_u8(0xAB);

        let mut reader = Package::from_bytes(package.into_bytes());
        let err = decode_resolving(&mut reader, &expected, &TypeRegistry::new()).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch {
                expected: "(field count: 2)".into(),
                received: "(field count: 3)".into(),
                field: "Vec3".into(),
            }
        );
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn test_resolving_decode_gives_up_on_unknown_field_tags() {
        let inner = ValueType::structure(StructSchema::new("Inner", [("a", ValueType::U8)]));
        let sent = vec3(&[("x", inner)]);
        let expected = vec3(&[("x", ValueType::F32)]);

        let mut package = Package::new();
        encode(&mut package, &Value::Struct(vec![Value::Struct(vec![Value::U8(1)])]), &sent).unwrap();

        let mut reader = Package::from_bytes(package.into_bytes());
        let err = decode_resolving(&mut reader, &expected, &TypeRegistry::new()).unwrap_err();
        assert_eq!(err, CodecError::UnknownType("Inner".into()));
    }
}
