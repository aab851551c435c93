//! `sheetbind_xlsx` v1:
//! Bind typed records to XLSX sheets in both directions.
//!
//! Modules:
//! - `conf`        : constants and default presets
//! - `spec`        : models, options, report and error type
//! - `schema`      : record traits, `impl_record!` and the schema cache
//! - `codec`       : type-tag converters and date handling
//! - `placeholder` : `{{var}}` parsing, interpolation and extraction
//! - `locate`      : header row discovery and template row classification
//! - `template`    : template row writing, truncation and reading
//! - `merge`       : same-value merge planning
//! - `validation`  : `dataValidation` list sources
//! - `book`        : `umya-spreadsheet` adapter
//! - `binder`      : `XlsxBinder`, the write/read entry point
//! - `util`        : pure helper functions
pub mod binder;
pub mod book;
pub mod codec;
pub mod conf;
pub mod locate;
pub mod merge;
pub mod placeholder;
pub mod schema;
pub mod spec;
pub mod template;
pub mod util;
pub mod validation;

pub use binder::XlsxBinder;
pub use book::XlsxBook;
pub use codec::{
    ConverterRegistry, FromCellValue, IntoCellValue, SpecConverter, convert_java_time_format,
};
pub use conf::{
    C_TEMPLATE_MARKER, N_LEN_EXCEL_SHEET_NAME_MAX, N_NROWS_EXCEL_MAX, N_ROWS_TEMPLATE_FALLBACK,
    N_ROWS_TITLE_SCAN_MAX, derive_default_bind_options,
};
pub use merge::plan_merges;
pub use placeholder::{EnumPlaceholderPart, PlaceholderTemplate, parse_placeholder};
pub use schema::{DynRecord, Record, RecordValues, SchemaCache};
pub use spec::{
    BindError, EnumCellValue, EnumDocumentSource, EnumFieldType, EnumMergeMode, EnumTitleMatch,
    SpecBindOptions, SpecBindReport, SpecField, SpecMergeRange, SpecSchema, SpecSheetMeta,
    SpecTitleLocation, SpecWriteOptions,
};
