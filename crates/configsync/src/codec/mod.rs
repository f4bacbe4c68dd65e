mod package;
mod types;
mod value;
mod wire;

pub use package::{Package, PackageFlags};
pub use types::{FieldSchema, StructSchema, TypeRegistry, ValueType};
pub use value::{SyncValue, Toggle, Value};
pub use wire::{decode, decode_resolving, encode};
