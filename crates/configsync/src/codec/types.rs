use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Wire-level type of a synchronized value. Enums travel as their
/// underlying integer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    List(Box<ValueType>),
    Map(Box<ValueType>, Box<ValueType>),
    Struct(Arc<StructSchema>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub ty: ValueType,
}

impl StructSchema {
    pub fn new<N, F>(name: N, fields: F) -> Self
    where
        N: Into<String>,
        F: IntoIterator<Item = (&'static str, ValueType)>,
    {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| FieldSchema {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        }
    }
}

impl ValueType {
    pub fn list(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }

    pub fn map(key: ValueType, value: ValueType) -> Self {
        ValueType::Map(Box::new(key), Box::new(value))
    }

    pub fn structure(schema: StructSchema) -> Self {
        ValueType::Struct(Arc::new(schema))
    }

    /// Name used as the type tag on the wire.
    pub fn type_name(&self) -> String {
        match self {
            ValueType::Bool => "bool".into(),
            ValueType::U8 => "u8".into(),
            ValueType::I8 => "i8".into(),
            ValueType::I16 => "i16".into(),
            ValueType::U16 => "u16".into(),
            ValueType::I32 => "i32".into(),
            ValueType::U32 => "u32".into(),
            ValueType::I64 => "i64".into(),
            ValueType::U64 => "u64".into(),
            ValueType::F32 => "f32".into(),
            ValueType::F64 => "f64".into(),
            ValueType::String => "string".into(),
            ValueType::List(element) => format!("list<{}>", element.type_name()),
            ValueType::Map(key, value) => {
                format!("map<{},{}>", key.type_name(), value.type_name())
            }
            ValueType::Struct(schema) => schema.name.clone(),
        }
    }

    /// Types that may be sent as null (empty type tag).
    pub fn is_nullable(&self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::List(_) | ValueType::Map(_, _)
        )
    }

    fn primitive(name: &str) -> Option<ValueType> {
        Some(match name {
            "bool" => ValueType::Bool,
            "u8" => ValueType::U8,
            "i8" => ValueType::I8,
            "i16" => ValueType::I16,
            "u16" => ValueType::U16,
            "i32" => ValueType::I32,
            "u32" => ValueType::U32,
            "i64" => ValueType::I64,
            "u64" => ValueType::U64,
            "f32" => ValueType::F32,
            "f64" => ValueType::F64,
            "string" => ValueType::String,
            _ => return None,
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// Closed set of struct schemas a registry knows how to decode. Primitive and
/// container names resolve structurally; struct names must be registered.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    structs: HashMap<String, Arc<StructSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every struct schema reachable from `ty`.
    pub fn register(&mut self, ty: &ValueType) {
        match ty {
            ValueType::List(element) => self.register(element),
            ValueType::Map(key, value) => {
                self.register(key);
                self.register(value);
            }
            ValueType::Struct(schema) => {
                for field in &schema.fields {
                    self.register(&field.ty);
                }
                self.structs
                    .entry(schema.name.clone())
                    .or_insert_with(|| Arc::clone(schema));
            }
            _ => {}
        }
    }

    pub fn resolve(&self, name: &str) -> Option<ValueType> {
        if let Some(primitive) = ValueType::primitive(name) {
            return Some(primitive);
        }
        if let Some(inner) = strip_generic(name, "list") {
            return self.resolve(inner).map(ValueType::list);
        }
        if let Some(inner) = strip_generic(name, "map") {
            let (key, value) = split_pair(inner)?;
            return Some(ValueType::map(self.resolve(key)?, self.resolve(value)?));
        }
        self.structs.get(name).cloned().map(ValueType::Struct)
    }
}

fn strip_generic<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix)?
        .strip_prefix('<')?
        .strip_suffix('>')
}

fn split_pair(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((&inner[..i], &inner[i + 1..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3() -> ValueType {
        ValueType::structure(StructSchema::new(
            "Vec3",
            [
                ("x", ValueType::F32),
                ("y", ValueType::F32),
                ("z", ValueType::F32),
            ],
        ))
    }

    #[test]
    fn test_nested_container_names_resolve() {
        let registry = TypeRegistry::new();
        let ty = ValueType::map(
            ValueType::String,
            ValueType::list(ValueType::map(ValueType::I32, ValueType::Bool)),
        );
        assert_eq!(ty.type_name(), "map<string,list<map<i32,bool>>>");
        assert_eq!(registry.resolve(&ty.type_name()), Some(ty));
    }

    #[test]
    fn test_struct_names_need_registration() {
        let mut registry = TypeRegistry::new();
        let ty = ValueType::list(vec3());
        assert_eq!(registry.resolve("list<Vec3>"), None);

        registry.register(&ty);
        assert_eq!(registry.resolve("list<Vec3>"), Some(ty));
    }

    #[test]
    fn test_garbage_names_do_not_resolve() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.resolve("System.Single, mscorlib"), None);
        assert_eq!(registry.resolve("map<i32>"), None);
        assert_eq!(registry.resolve("list<i32"), None);
    }
}
