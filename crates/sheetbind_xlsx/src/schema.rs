//! Field schema extraction: record traits, static schema declaration and schema cache.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::spec::{BindError, EnumCellValue, SpecField, SpecSchema};
use crate::util::validate_unique_names;

////////////////////////////////////////////////////////////////////////////////
// #region RecordTraits

/// Field access by logical name.
pub trait RecordValues {
    /// Current value of field `name` ([`EnumCellValue::None`] when unknown).
    fn get_value(&self, name: &str) -> EnumCellValue;
    /// Store an already coerced value into field `name`.
    fn set_value(&mut self, name: &str, value: EnumCellValue) -> Result<(), String>;
}

/// A record type with a statically declared schema.
///
/// Usually implemented with [`crate::impl_record`].
pub trait Record: RecordValues + Default + 'static {
    fn schema() -> SpecSchema;
}

/// Implement [`Record`] and [`RecordValues`] for a struct.
///
/// ```ignore
/// impl_record!(MemberStat, SpecSheetMeta::default().sheet("会员"), {
///     total: Integer => |f| f.title("会员总数"),
///     new: Integer => |f| f.title("其中：新增"),
///     effective: Integer,
/// });
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ty, $meta:expr, { $( $field:ident : $kind:ident $( => $cfg:expr )? ),* $(,)? }) => {
        impl $crate::schema::RecordValues for $ty {
            fn get_value(&self, name: &str) -> $crate::spec::EnumCellValue {
                match name {
                    $( stringify!($field) => {
                        $crate::codec::IntoCellValue::into_cell_value(&self.$field)
                    } )*
                    _ => $crate::spec::EnumCellValue::None,
                }
            }

            fn set_value(
                &mut self,
                name: &str,
                value: $crate::spec::EnumCellValue,
            ) -> ::std::result::Result<(), ::std::string::String> {
                match name {
                    $( stringify!($field) => {
                        self.$field = $crate::codec::FromCellValue::from_cell_value(value)?;
                        ::std::result::Result::Ok(())
                    } )*
                    _ => ::std::result::Result::Err(::std::format!("Unknown field {name:?}")),
                }
            }
        }

        impl $crate::schema::Record for $ty {
            fn schema() -> $crate::spec::SpecSchema {
                $crate::spec::SpecSchema::new(
                    $meta,
                    ::std::vec![$(
                        $crate::spec::SpecField::new(
                            stringify!($field),
                            $crate::spec::EnumFieldType::$kind,
                        )
                        $( .with($cfg) )?
                    ),*],
                )
            }
        }
    };
}

/// Record with runtime-defined fields, used with an explicit [`SpecSchema`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynRecord {
    dict_values: BTreeMap<String, EnumCellValue>,
}

impl DynRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, value: EnumCellValue) -> Self {
        self.dict_values.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: EnumCellValue) {
        self.dict_values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&EnumCellValue> {
        self.dict_values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EnumCellValue)> {
        self.dict_values.iter()
    }

    pub fn len(&self) -> usize {
        self.dict_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict_values.is_empty()
    }
}

impl RecordValues for DynRecord {
    fn get_value(&self, name: &str) -> EnumCellValue {
        self.dict_values.get(name).cloned().unwrap_or_default()
    }

    fn set_value(&mut self, name: &str, value: EnumCellValue) -> Result<(), String> {
        self.dict_values.insert(name.to_string(), value);
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Extraction

/// Validate a schema before binding: non-empty, unique field names.
pub fn validate_schema(schema: &SpecSchema) -> Result<(), BindError> {
    if let Some(field) = schema.fields.iter().find(|f| f.name.trim().is_empty()) {
        return Err(BindError::SchemaInput(format!(
            "Field name must not be empty (type {:?})",
            field.field_type
        )));
    }
    let l_names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
    validate_unique_names(&l_names).map_err(BindError::SchemaInput)
}

/// Header texts in field order (explicit title or field name).
pub fn collect_titles(fields: &[SpecField]) -> Vec<String> {
    fields
        .iter()
        .map(|f| f.display_title().to_string())
        .collect()
}

/// Whether every field carries an explicit title.
pub fn if_titles_all_customized(fields: &[SpecField]) -> bool {
    !fields.is_empty() && fields.iter().all(SpecField::has_custom_title)
}

/// Whether any field carries an explicit title.
pub fn if_titles_any_customized(fields: &[SpecField]) -> bool {
    fields.iter().any(SpecField::has_custom_title)
}

/// Explicit schema cache keyed by record type.
#[derive(Debug, Default)]
pub struct SchemaCache {
    dict_schemas: HashMap<TypeId, Arc<SpecSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validated schema for `R`, built on first use.
    pub fn get_or_build<R: Record>(&mut self) -> Result<Arc<SpecSchema>, BindError> {
        if let Some(schema) = self.dict_schemas.get(&TypeId::of::<R>()) {
            return Ok(Arc::clone(schema));
        }
        let schema = R::schema();
        validate_schema(&schema)?;
        let schema = Arc::new(schema);
        self.dict_schemas
            .insert(TypeId::of::<R>(), Arc::clone(&schema));
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.dict_schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict_schemas.is_empty()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
