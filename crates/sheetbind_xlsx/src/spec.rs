//! Shared binding models, options and the top-level error type.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::conf::{C_TEMPLATE_MARKER, N_ROWS_TEMPLATE_FALLBACK, N_ROWS_TITLE_SCAN_MAX};

////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Declared type tag of a bindable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnumFieldType {
    /// Plain text.
    String,
    /// Signed integer (written as a native numeric cell).
    Integer,
    /// Floating point number (written as a native numeric cell).
    Float,
    /// Boolean.
    Bool,
    /// Date and time of day.
    DateTime,
    /// Calendar date without a time part.
    Date,
}

impl EnumFieldType {
    /// Parse the lowercase type tag used by dynamic schemas.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(Self::String),
            "integer" | "int" => Some(Self::Integer),
            "float" | "number" | "decimal" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            "datetime" | "time" => Some(Self::DateTime),
            "date" => Some(Self::Date),
            _ => None,
        }
    }

    /// Whether the value lands in a native numeric cell.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Whether the field carries a date pattern.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::DateTime | Self::Date)
    }
}

/// Normalized typed value moved between records and cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Text value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
    /// Date-time value (dates are stored at midnight).
    DateTime(NaiveDateTime),
}

impl EnumCellValue {
    /// Whether this value is [`EnumCellValue::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FieldSchema

/// Bindable field description (one per record field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecField {
    /// Logical field name.
    pub name: String,
    /// Declared type tag.
    pub field_type: EnumFieldType,
    /// Explicit header text. A leading `=` requests exact title matching.
    pub title: Option<String>,
    /// Java-style date pattern for time fields (`yyyy-MM-dd`).
    pub format: Option<String>,
    /// `Sheet!A1:A3`, a registered list name, or a literal `a,b,c` list.
    pub data_validation: Option<String>,
    /// Placeholder variable name; defaults to the field name.
    pub placeholder: Option<String>,
    /// Exact cell reference bound in placeholder mode.
    pub placeholder_cell: Option<String>,
    /// Tolerate coercion failures, leaving the default value.
    pub if_omit_err: bool,
    /// Participate in placeholder interpolation.
    pub if_placeholder: bool,
}

impl SpecField {
    /// Create a field with no tags.
    pub fn new(name: impl Into<String>, field_type: EnumFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            title: None,
            format: None,
            data_validation: None,
            placeholder: None,
            placeholder_cell: None,
            if_omit_err: false,
            if_placeholder: true,
        }
    }

    /// Apply a configuration closure (used by [`crate::impl_record`]).
    pub fn with(self, cfg: impl FnOnce(Self) -> Self) -> Self {
        cfg(self)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn data_validation(mut self, data_validation: impl Into<String>) -> Self {
        self.data_validation = Some(data_validation.into());
        self
    }

    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn placeholder_cell(mut self, cell: impl Into<String>) -> Self {
        self.placeholder_cell = Some(cell.into());
        self
    }

    pub fn omit_err(mut self) -> Self {
        self.if_omit_err = true;
        self
    }

    /// Exclude the field from placeholder interpolation.
    pub fn skip_placeholder(mut self) -> Self {
        self.if_placeholder = false;
        self
    }

    /// Whether the field carries an explicit title tag.
    pub fn has_custom_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Header text: explicit title (without the `=` marker) or the field name.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.is_empty() => t.strip_prefix('=').unwrap_or(t),
            _ => &self.name,
        }
    }

    /// Whether the title must equal the cell text instead of being contained in it.
    pub fn if_title_exact(&self) -> bool {
        self.title.as_deref().is_some_and(|t| t.starts_with('='))
    }

    /// Variable name used in placeholder mode.
    pub fn placeholder_var(&self) -> &str {
        match self.placeholder.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => &self.name,
        }
    }
}

/// Sheet-level metadata attached to a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetMeta {
    /// Target/expected sheet name (substring match against existing names).
    pub sheet: Option<String>,
    /// Always write a title row in flat mode.
    pub if_write_title: bool,
    /// Use placeholder interpolation instead of row/column mode.
    pub if_as_placeholder: bool,
    /// Skip rows whose mapped cells are all empty when reading.
    pub if_ignore_empty_rows: bool,
}

impl Default for SpecSheetMeta {
    fn default() -> Self {
        Self {
            sheet: None,
            if_write_title: false,
            if_as_placeholder: false,
            if_ignore_empty_rows: true,
        }
    }
}

impl SpecSheetMeta {
    pub fn sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn write_title(mut self) -> Self {
        self.if_write_title = true;
        self
    }

    pub fn as_placeholder(mut self) -> Self {
        self.if_as_placeholder = true;
        self
    }

    pub fn ignore_empty_rows(mut self, value: bool) -> Self {
        self.if_ignore_empty_rows = value;
        self
    }
}

/// Ordered field list plus sheet metadata for one record type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSchema {
    /// Sheet-level metadata.
    pub meta: SpecSheetMeta,
    /// Bindable fields in declaration order.
    pub fields: Vec<SpecField>,
}

impl SpecSchema {
    pub fn new(meta: SpecSheetMeta, fields: Vec<SpecField>) -> Self {
        Self { meta, fields }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Location

/// One non-empty cell of a row snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCellView {
    /// 1-based column index.
    pub col: u32,
    /// Cell text.
    pub text: String,
}

/// Row snapshot used by the title locator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecRowView {
    /// 1-based row number.
    pub row_num: u32,
    /// Non-empty cells in column order.
    pub cells: Vec<SpecCellView>,
}

/// Field mapped to a sheet column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTemplateCell {
    /// 1-based column index.
    pub col: u32,
    /// Bound field.
    pub field: SpecField,
}

/// Header row and column mapping found in a sheet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecTitleLocation {
    /// 1-based header row number.
    pub row_title: u32,
    /// Field-to-column mapping in column order of discovery.
    pub cells: Vec<SpecTemplateCell>,
    /// Row numbers classified as template rows.
    pub rows_template: Vec<u32>,
    /// Last used row number of the sheet at location time.
    pub row_last: u32,
}

impl SpecTitleLocation {
    /// Valid only when at least one field maps to a column.
    pub fn is_valid(&self) -> bool {
        !self.cells.is_empty()
    }
}

/// Cell range planned for merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMergeRange {
    /// 1-based column index.
    pub col: u32,
    /// Start reference, e.g. `A2`.
    pub cell_start: String,
    /// End reference, e.g. `A4`.
    pub cell_end: String,
}

impl SpecMergeRange {
    /// `A2:A4` style range reference.
    pub fn range_ref(&self) -> String {
        format!("{}:{}", self.cell_start, self.cell_end)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Options

/// Merge policy applied to written data rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumMergeMode {
    /// No merging (default).
    #[default]
    None,
    /// Merge every maximal run of equal values per column.
    MergeCols,
    /// Like `MergeCols`, but runs never cross a boundary of an earlier column.
    MergeColsAlign,
}

/// Title matching rule for the header scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumTitleMatch {
    /// Cell text contains the title (default).
    #[default]
    Contain,
    /// Cell text equals the title.
    Equal,
}

/// Where a workbook is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumDocumentSource {
    /// File path.
    Path(PathBuf),
    /// Raw `.xlsx` bytes.
    Bytes(Vec<u8>),
}

impl EnumDocumentSource {
    /// Drain `reader` into an in-memory source.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, BindError> {
        let mut v_bytes = Vec::new();
        reader.read_to_end(&mut v_bytes)?;
        Ok(Self::Bytes(v_bytes))
    }
}

/// Binder-wide options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecBindOptions {
    /// Template workbook for templated/placeholder writes.
    pub template: Option<EnumDocumentSource>,
    /// Input workbook for reads (and in-place writes).
    pub input: Option<EnumDocumentSource>,
    /// Named value lists referenced by `dataValidation` tags.
    pub validations: BTreeMap<String, Vec<String>>,
    /// Title matching rule.
    pub title_match: EnumTitleMatch,
    /// Number of leading rows scanned for the header.
    pub n_rows_title_scan_max: usize,
    /// Marker text identifying template rows below the header.
    pub template_marker: String,
    /// Rows taken as the template when no marker row exists.
    pub n_rows_template_fallback: usize,
    /// Use placeholder mode for every write.
    pub if_placeholder: bool,
}

impl Default for SpecBindOptions {
    fn default() -> Self {
        Self {
            template: None,
            input: None,
            validations: BTreeMap::new(),
            title_match: EnumTitleMatch::Contain,
            n_rows_title_scan_max: N_ROWS_TITLE_SCAN_MAX,
            template_marker: C_TEMPLATE_MARKER.to_string(),
            n_rows_template_fallback: N_ROWS_TEMPLATE_FALLBACK,
            if_placeholder: false,
        }
    }
}

/// Per-write call options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecWriteOptions {
    /// Target sheet name overriding the schema's sheet.
    pub sheet_name: Option<String>,
    /// Merge policy for written rows.
    pub merge_mode: EnumMergeMode,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Report

/// Per-write call report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecBindReport {
    /// Sheet written to.
    pub sheet_name: String,
    /// Header row used, if any.
    pub row_title: Option<u32>,
    /// Number of data rows written.
    pub n_rows_written: usize,
    /// Merge ranges applied.
    pub merges: Vec<SpecMergeRange>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecBindReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Errors surfaced by binder operations.
#[derive(Debug, Error)]
pub enum BindError {
    /// Schema or record input cannot be bound.
    #[error("Invalid schema input: {0}")]
    SchemaInput(String),

    /// No header row within the scan window.
    #[error("Failed to locate title row within the first {rows_max} rows of sheet {sheet:?}")]
    TitleRowNotFound {
        /// Sheet scanned.
        sheet: String,
        /// Scan bound.
        rows_max: usize,
    },

    /// One title matched two cells of the header row.
    #[error("Duplicate title {title:?} located at {first} and {second}")]
    DuplicateTitle {
        /// Title text.
        title: String,
        /// First matching cell.
        first: String,
        /// Second matching cell.
        second: String,
    },

    /// Cell text could not be converted to the declared type.
    #[error("Failed to convert {value:?} at {cell} into field {field:?}: {message}")]
    Coercion {
        /// Field name.
        field: String,
        /// Cell reference.
        cell: String,
        /// Offending text.
        value: String,
        /// Converter message.
        message: String,
    },

    /// A `dataValidation` reference could not be resolved.
    #[error("Unable to resolve data validation {reference:?}: {message}")]
    ValidationReference {
        /// Tag value.
        reference: String,
        /// Reason.
        message: String,
    },

    /// Spreadsheet engine failure (malformed or unreadable document).
    #[error("Document error: {0}")]
    Document(String),

    /// Underlying IO failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BindError {
    /// Whether this error is one of the title location failures.
    pub fn is_title_location_failure(&self) -> bool {
        matches!(
            self,
            Self::TitleRowNotFound { .. } | Self::DuplicateTitle { .. }
        )
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_strips_exact_marker() {
        let field = SpecField::new("total", EnumFieldType::Integer).title("=会员总数");
        assert_eq!(field.display_title(), "会员总数");
        assert!(field.if_title_exact());
        assert!(field.has_custom_title());

        let field = SpecField::new("total", EnumFieldType::Integer);
        assert_eq!(field.display_title(), "total");
        assert!(!field.if_title_exact());
        assert!(!field.has_custom_title());
    }

    #[test]
    fn test_placeholder_var_defaults_to_name() {
        let field = SpecField::new("mobile", EnumFieldType::String);
        assert_eq!(field.placeholder_var(), "mobile");
        assert_eq!(field.placeholder("phone").placeholder_var(), "phone");
    }

    #[test]
    fn test_field_type_from_tag() {
        assert_eq!(EnumFieldType::from_tag("INT"), Some(EnumFieldType::Integer));
        assert_eq!(EnumFieldType::from_tag("time"), Some(EnumFieldType::DateTime));
        assert_eq!(EnumFieldType::from_tag("blob"), None);
    }

    #[test]
    fn test_title_location_failure_grouping() {
        let err = BindError::TitleRowNotFound {
            sheet: "Sheet1".to_string(),
            rows_max: 6,
        };
        assert!(err.is_title_location_failure());
        assert!(!BindError::SchemaInput("x".to_string()).is_title_location_failure());
    }
}
