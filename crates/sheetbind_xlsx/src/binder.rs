//! XLSX binder that moves typed records in and out of workbook sheets.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::book::XlsxBook;
use crate::codec::ConverterRegistry;
use crate::locate::locate_template;
use crate::merge::plan_merges;
use crate::placeholder::parse_placeholder;
use crate::schema::{Record, RecordValues, SchemaCache, if_titles_any_customized, validate_schema};
use crate::spec::{
    BindError, SpecBindOptions, SpecBindReport, SpecSchema, SpecTemplateCell, SpecWriteOptions,
};
use crate::template::{TemplateRowEngine, read_rows};
use crate::util::{create_cell_ref, parse_cell_ref};
use crate::validation::apply_validations;

/// Rows and columns produced by one write, fed to merging and validation.
struct SpecWrittenBlock {
    cells: Vec<SpecTemplateCell>,
    row_first: u32,
    rendered: Vec<Vec<String>>,
}

/// Stateful record binder over one workbook.
///
/// The workbook comes from `options.input`, else from `options.template`, else it
/// starts empty. It stays in memory until saved; [`Self::close`] releases it.
pub struct XlsxBinder {
    options: SpecBindOptions,
    book: Option<XlsxBook>,
    /// Untouched template copy, the interpolation source in placeholder mode.
    book_template: Option<XlsxBook>,
    if_has_input: bool,
    registry: ConverterRegistry,
    schema_cache: SchemaCache,
    /// Sheets this binder already wrote a flat title row into.
    set_sheets_titled: BTreeSet<usize>,
    l_reports: Vec<SpecBindReport>,
}

impl std::fmt::Debug for XlsxBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XlsxBinder")
            .field("book", &self.book)
            .field("if_has_input", &self.if_has_input)
            .field("n_reports", &self.l_reports.len())
            .finish()
    }
}

impl XlsxBinder {
    /// Open the configured documents. A malformed document fails construction.
    pub fn new(options: SpecBindOptions) -> Result<Self, BindError> {
        let book_template = options.template.as_ref().map(XlsxBook::open).transpose()?;
        let book_input = options.input.as_ref().map(XlsxBook::open).transpose()?;
        let if_has_input = book_template.is_some() || book_input.is_some();

        let book = match (book_input, &book_template) {
            (Some(book), _) => book,
            (None, Some(book)) => book.clone(),
            (None, None) => XlsxBook::new_empty(),
        };
        debug!(if_has_input, sheets = ?book.sheet_names(), "Binder opened");

        Ok(Self {
            options,
            book: Some(book),
            book_template,
            if_has_input,
            registry: ConverterRegistry::new(),
            schema_cache: SchemaCache::new(),
            set_sheets_titled: BTreeSet::new(),
            l_reports: Vec::new(),
        })
    }

    /// Converter registry used for every read and write.
    pub fn registry_mut(&mut self) -> &mut ConverterRegistry {
        &mut self.registry
    }

    /// Snapshot of per-write reports.
    pub fn report(&self) -> Vec<SpecBindReport> {
        self.l_reports.clone()
    }

    /// Sheet names of the bound workbook.
    pub fn sheet_names(&self) -> Result<Vec<String>, BindError> {
        Ok(self.book()?.sheet_names())
    }

    /// Release the workbook. Idempotent.
    pub fn close(&mut self) {
        if self.book.take().is_some() {
            self.book_template = None;
            debug!("Binder closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.book.is_none()
    }

    fn book(&self) -> Result<&XlsxBook, BindError> {
        self.book.as_ref().ok_or_else(derive_closed_error)
    }

    ////////////////////////////////////////////////////////////////////////////
    // #region Write

    /// Write records with the schema declared on `R`.
    pub fn write<R: Record>(&mut self, records: &[R]) -> Result<SpecBindReport, BindError> {
        self.write_with_options(records, &SpecWriteOptions::default())
    }

    pub fn write_with_options<R: Record>(
        &mut self,
        records: &[R],
        options: &SpecWriteOptions,
    ) -> Result<SpecBindReport, BindError> {
        let schema = self.schema_cache.get_or_build::<R>()?;
        self.write_records_with_schema(&schema, records, options)
    }

    /// Write records against an explicit schema.
    ///
    /// Placeholder mode applies when the schema or the binder asks for it. Otherwise
    /// records go over the located template, or as flat rows when no header is found.
    /// An empty slice is a no-op.
    pub fn write_records_with_schema<R: RecordValues>(
        &mut self,
        schema: &SpecSchema,
        records: &[R],
        options: &SpecWriteOptions,
    ) -> Result<SpecBindReport, BindError> {
        self.book()?;
        validate_schema(schema)?;
        if records.is_empty() || schema.fields.is_empty() {
            debug!(n_records = records.len(), "Nothing to write");
            return Ok(SpecBindReport::default());
        }
        if self.options.if_placeholder || schema.meta.if_as_placeholder {
            return self.write_placeholder(schema, records, options);
        }

        let (n_sheet, if_new_sheet) = self.resolve_write_sheet(schema, options)?;
        let Self {
            options: bind_options,
            book,
            registry,
            if_has_input,
            set_sheets_titled,
            ..
        } = self;
        let book = book.as_mut().ok_or_else(derive_closed_error)?;

        let mut report = SpecBindReport {
            sheet_name: book.sheet_name(n_sheet)?,
            ..SpecBindReport::default()
        };

        let location = if *if_has_input {
            let rows = book.snapshot_rows(n_sheet)?;
            match locate_template(&schema.fields, &rows, bind_options, &report.sheet_name, false) {
                Ok(location) => Some(location),
                Err(err @ BindError::TitleRowNotFound { .. }) => {
                    warn!(sheet = report.sheet_name.as_str(), %err, "Falling back to flat rows");
                    report.warn(err.to_string());
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let block = match location {
            Some(location) => {
                report.row_title = Some(location.row_title);
                let mut engine = TemplateRowEngine::new(book, n_sheet, location, if_new_sheet)?;
                if if_new_sheet {
                    engine.drop_data_rows(book)?;
                }
                for record in records {
                    engine.write_row(book, record, registry)?;
                }
                engine.remove_template_rows(book)?;
                SpecWrittenBlock {
                    cells: engine.location().cells.clone(),
                    row_first: engine.row_first(),
                    rendered: engine.rendered_rows().to_vec(),
                }
            }
            None => {
                let if_write_title = (if_titles_any_customized(&schema.fields)
                    || schema.meta.if_write_title)
                    && set_sheets_titled.insert(n_sheet);
                let (block, row_title) =
                    write_flat_rows(book, n_sheet, schema, records, registry, if_write_title)?;
                report.row_title = row_title;
                block
            }
        };
        report.n_rows_written = block.rendered.len();

        let l_cols: Vec<u32> = block.cells.iter().map(|c| c.col).collect();
        report.merges = plan_merges(&l_cols, &block.rendered, block.row_first, options.merge_mode);
        for merge in &report.merges {
            book.add_merge(n_sheet, &merge.range_ref())?;
        }
        apply_validations(
            book,
            n_sheet,
            &block.cells,
            block.row_first,
            block.rendered.len(),
            &bind_options.validations,
        )?;

        info!(
            sheet = report.sheet_name.as_str(),
            n_rows = report.n_rows_written,
            n_merges = report.merges.len(),
            row_title = ?report.row_title,
            "Records written"
        );
        self.l_reports.push(report.clone());
        Ok(report)
    }

    /// Pick the target sheet, returning `(index, is_new_sheet)`.
    ///
    /// A sheet whose name contains the requested name is reused. A fresh workbook
    /// gets a new sheet. With an input document, a write-time sheet override that
    /// matches nothing clones the schema's sheet (a new sheet derived from the
    /// template); otherwise the schema's sheet (or the first one) is renamed.
    fn resolve_write_sheet(
        &mut self,
        schema: &SpecSchema,
        options: &SpecWriteOptions,
    ) -> Result<(usize, bool), BindError> {
        let if_has_input = self.if_has_input;
        let book = self.book.as_mut().ok_or_else(derive_closed_error)?;
        let c_meta = schema.meta.sheet.as_deref().unwrap_or("");
        let c_target = options.sheet_name.as_deref().unwrap_or(c_meta);

        if let Some(n_sheet) = book.find_sheet(c_target) {
            return Ok((n_sheet, false));
        }
        if !if_has_input || book.sheet_count() == 0 {
            let c_name = if c_target.is_empty() { "Sheet1" } else { c_target };
            return Ok((book.create_sheet(c_name)?, false));
        }

        let n_source = book.find_sheet(c_meta).unwrap_or(0);
        if options.sheet_name.is_some() {
            return Ok((book.clone_sheet(n_source, c_target)?, true));
        }
        book.rename_sheet(n_source, c_target)?;
        Ok((n_source, false))
    }

    /// Interpolate the first record into every placeholder cell of the sheet.
    ///
    /// Placeholder cells come from the untouched template copy when one exists, so a
    /// repeated write re-renders from the original content.
    fn write_placeholder<R: RecordValues>(
        &mut self,
        schema: &SpecSchema,
        records: &[R],
        options: &SpecWriteOptions,
    ) -> Result<SpecBindReport, BindError> {
        let (n_sheet, _) = self.resolve_write_sheet(schema, options)?;
        let Self {
            book,
            book_template,
            registry,
            ..
        } = self;
        let book = book.as_mut().ok_or_else(derive_closed_error)?;
        let mut report = SpecBindReport {
            sheet_name: book.sheet_name(n_sheet)?,
            ..SpecBindReport::default()
        };
        let Some(record) = records.first() else {
            return Ok(report);
        };
        if records.len() > 1 {
            report.warn(format!(
                "Placeholder mode binds one record; {} extra records ignored",
                records.len() - 1
            ));
        }

        let mut dict_vars: BTreeMap<String, String> = BTreeMap::new();
        let mut l_direct = Vec::new();
        for field in &schema.fields {
            let value = record.get_value(&field.name);
            if field.if_placeholder {
                dict_vars.insert(field.placeholder_var().to_string(), registry.render(field, &value));
            }
            if let Some(c_ref) = field.placeholder_cell.as_deref().filter(|c| !c.is_empty()) {
                let (n_col, n_row) = parse_cell_ref(c_ref).ok_or_else(|| {
                    BindError::SchemaInput(format!(
                        "Invalid placeholder cell {c_ref:?} on field {:?}",
                        field.name
                    ))
                })?;
                l_direct.push((n_col, n_row, field, value));
            }
        }

        let rows = match book_template.as_ref().map(|tpl| (tpl.find_sheet(&report.sheet_name), tpl)) {
            Some((Some(n_tpl), tpl)) => tpl.snapshot_rows(n_tpl)?,
            _ => book.snapshot_rows(n_sheet)?,
        };
        let mut n_cells = 0usize;
        for row in &rows {
            for cell in &row.cells {
                let pl = parse_placeholder(&cell.text);
                if pl.has_placeholders() {
                    book.set_text(n_sheet, cell.col, row.row_num, &pl.interpolate(&dict_vars))?;
                    n_cells += 1;
                }
            }
        }
        for (n_col, n_row, field, value) in &l_direct {
            book.write_value(n_sheet, *n_col, *n_row, field, value, registry)?;
            n_cells += 1;
        }

        report.n_rows_written = 1;
        info!(sheet = report.sheet_name.as_str(), n_cells, "Placeholders written");
        self.l_reports.push(report.clone());
        Ok(report)
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Read

    /// Read all records of the sheet declared on `R`.
    pub fn read<R: Record>(&mut self) -> Result<Vec<R>, BindError> {
        let schema = self.schema_cache.get_or_build::<R>()?;
        self.read_records_with_schema(&schema)
    }

    /// Read records against an explicit schema.
    ///
    /// The sheet is matched by name, falling back to the first sheet. Every row below
    /// the located header becomes one record.
    pub fn read_records_with_schema<R: RecordValues + Default>(
        &self,
        schema: &SpecSchema,
    ) -> Result<Vec<R>, BindError> {
        let book = self.book()?;
        validate_schema(schema)?;
        if schema.fields.is_empty() {
            return Ok(Vec::new());
        }
        let Some(n_sheet) = resolve_read_sheet(book, schema) else {
            debug!("Workbook has no sheets to read");
            return Ok(Vec::new());
        };

        let c_sheet = book.sheet_name(n_sheet)?;
        let rows = book.snapshot_rows(n_sheet)?;
        let location = locate_template(&schema.fields, &rows, &self.options, &c_sheet, true)?;
        read_rows(
            book,
            n_sheet,
            &location,
            schema.meta.if_ignore_empty_rows,
            &self.registry,
        )
    }

    /// Read one record in placeholder mode with the schema declared on `R`.
    pub fn read_placeholder<R: Record>(&mut self) -> Result<R, BindError> {
        let schema = self.schema_cache.get_or_build::<R>()?;
        self.read_placeholder_with_schema(&schema)
    }

    /// Recover one record from placeholder cells.
    ///
    /// Each placeholder cell of the template sheet is matched against the same cell
    /// of the input sheet; `placeholder_cell` fields are read directly.
    pub fn read_placeholder_with_schema<R: RecordValues + Default>(
        &self,
        schema: &SpecSchema,
    ) -> Result<R, BindError> {
        let book = self.book()?;
        validate_schema(schema)?;
        let mut record = R::default();
        let Some(n_sheet) = resolve_read_sheet(book, schema) else {
            return Ok(record);
        };
        let c_sheet = book.sheet_name(n_sheet)?;

        let mut dict_vars: BTreeMap<String, String> = BTreeMap::new();
        if let Some(tpl) = &self.book_template {
            let n_tpl = tpl.find_sheet(&c_sheet).unwrap_or(0);
            for row in tpl.snapshot_rows(n_tpl)? {
                for cell in &row.cells {
                    let pl = parse_placeholder(&cell.text);
                    if !pl.has_placeholders() {
                        continue;
                    }
                    let c_observed = book.get_text(n_sheet, cell.col, row.row_num)?;
                    match pl.extract_vars(&c_observed) {
                        Some(dict_found) => dict_vars.extend(dict_found),
                        None => warn!(
                            cell = create_cell_ref(cell.col, row.row_num).as_str(),
                            "Placeholder content does not match template"
                        ),
                    }
                }
            }
        }

        for field in &schema.fields {
            let (c_text, c_ref) = match field.placeholder_cell.as_deref().filter(|c| !c.is_empty()) {
                Some(c_ref) => {
                    let (n_col, n_row) = parse_cell_ref(c_ref).ok_or_else(|| {
                        BindError::SchemaInput(format!(
                            "Invalid placeholder cell {c_ref:?} on field {:?}",
                            field.name
                        ))
                    })?;
                    (book.get_text(n_sheet, n_col, n_row)?, c_ref.to_string())
                }
                None if field.if_placeholder => match dict_vars.get(field.placeholder_var()) {
                    Some(c_text) => (c_text.clone(), format!("{{{{{}}}}}", field.placeholder_var())),
                    None => continue,
                },
                None => continue,
            };
            if c_text.trim().is_empty() {
                continue;
            }

            let result = self
                .registry
                .parse(field, &c_text)
                .and_then(|value| record.set_value(&field.name, value));
            if let Err(message) = result {
                if field.if_omit_err {
                    warn!(field = field.name.as_str(), %message, "Conversion error omitted");
                    continue;
                }
                return Err(BindError::Coercion {
                    field: field.name.clone(),
                    cell: c_ref,
                    value: c_text,
                    message,
                });
            }
        }
        Ok(record)
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Save

    /// Write the workbook to `path`.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), BindError> {
        self.book()?.save_to_path(path)
    }

    /// Write the workbook to `writer` in `.xlsx` format.
    pub fn save(&self, writer: impl Write) -> Result<(), BindError> {
        self.book()?.save_to_writer(writer)
    }

    /// Serialize the workbook into `.xlsx` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BindError> {
        self.book()?.to_bytes()
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
}

impl Drop for XlsxBinder {
    fn drop(&mut self) {
        self.close();
    }
}

fn derive_closed_error() -> BindError {
    BindError::Document("Binder is closed.".to_string())
}

fn resolve_read_sheet(book: &XlsxBook, schema: &SpecSchema) -> Option<usize> {
    let c_sheet = schema.meta.sheet.as_deref().unwrap_or("");
    book.find_sheet(c_sheet)
        .or_else(|| (book.sheet_count() > 0).then_some(0))
}

/// Append an optional title row and one row per record after the last used row.
fn write_flat_rows<R: RecordValues>(
    book: &mut XlsxBook,
    sheet: usize,
    schema: &SpecSchema,
    records: &[R],
    registry: &ConverterRegistry,
    if_write_title: bool,
) -> Result<(SpecWrittenBlock, Option<u32>), BindError> {
    let l_cells: Vec<SpecTemplateCell> = schema
        .fields
        .iter()
        .enumerate()
        .map(|(n_idx, field)| SpecTemplateCell {
            col: n_idx as u32 + 1,
            field: field.clone(),
        })
        .collect();

    let mut n_row = book.highest_row(sheet)? + 1;
    let mut row_title = None;
    if if_write_title {
        for cell in &l_cells {
            book.set_text(sheet, cell.col, n_row, cell.field.display_title())?;
        }
        row_title = Some(n_row);
        n_row += 1;
    }

    let row_first = n_row;
    let mut l_rendered = Vec::with_capacity(records.len());
    for record in records {
        let mut l_texts = Vec::with_capacity(l_cells.len());
        for cell in &l_cells {
            let value = record.get_value(&cell.field.name);
            book.write_value(sheet, cell.col, n_row, &cell.field, &value, registry)?;
            l_texts.push(registry.render(&cell.field, &value));
        }
        l_rendered.push(l_texts);
        n_row += 1;
    }

    Ok((
        SpecWrittenBlock {
            cells: l_cells,
            row_first,
            rendered: l_rendered,
        },
        row_title,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DynRecord;
    use crate::spec::{
        EnumCellValue, EnumDocumentSource, EnumFieldType, EnumMergeMode, SpecField, SpecSheetMeta,
    };

    fn derive_schema() -> SpecSchema {
        SpecSchema::new(
            SpecSheetMeta::default().sheet("区域"),
            vec![
                SpecField::new("region", EnumFieldType::String).title("区域"),
                SpecField::new("city", EnumFieldType::String).title("城市"),
                SpecField::new("sales", EnumFieldType::Integer).title("销量"),
            ],
        )
    }

    fn derive_sale(region: &str, city: &str, sales: i64) -> DynRecord {
        DynRecord::new()
            .with("region", EnumCellValue::String(region.to_string()))
            .with("city", EnumCellValue::String(city.to_string()))
            .with("sales", EnumCellValue::Integer(sales))
    }

    #[test]
    fn test_flat_write_then_read_back() {
        let schema = derive_schema();
        let l_sales = vec![derive_sale("east", "hz", 10), derive_sale("east", "sh", 20)];

        let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
        let report = binder
            .write_records_with_schema(&schema, &l_sales, &SpecWriteOptions::default())
            .unwrap();
        assert_eq!(report.sheet_name, "区域");
        assert_eq!(report.row_title, Some(1));
        assert_eq!(report.n_rows_written, 2);

        let l_back: Vec<DynRecord> = binder.read_records_with_schema(&schema).unwrap();
        assert_eq!(l_back, l_sales);
    }

    #[test]
    fn test_empty_write_is_no_op() {
        let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
        let report = binder
            .write_records_with_schema::<DynRecord>(&derive_schema(), &[], &SpecWriteOptions::default())
            .unwrap();
        assert_eq!(report, SpecBindReport::default());
        assert!(binder.sheet_names().unwrap().is_empty());
        assert!(binder.report().is_empty());
    }

    #[test]
    fn test_repeated_flat_writes_append_without_second_title() {
        let schema = derive_schema();
        let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
        let write_options = SpecWriteOptions::default();
        binder
            .write_records_with_schema(&schema, &[derive_sale("east", "hz", 10)], &write_options)
            .unwrap();
        let report = binder
            .write_records_with_schema(&schema, &[derive_sale("west", "cd", 5)], &write_options)
            .unwrap();
        assert_eq!(report.row_title, None);

        let l_back: Vec<DynRecord> = binder.read_records_with_schema(&schema).unwrap();
        assert_eq!(l_back.len(), 2);
        assert_eq!(binder.report().len(), 2);
    }

    #[test]
    fn test_text_values_for_typed_fields_are_coerced() {
        let schema = derive_schema();
        let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
        let record = derive_sale("east", "hz", 0)
            .with("sales", EnumCellValue::String("100".to_string()));
        binder
            .write_records_with_schema(&schema, &[record], &SpecWriteOptions::default())
            .unwrap();

        let l_back: Vec<DynRecord> = binder.read_records_with_schema(&schema).unwrap();
        assert_eq!(l_back, vec![derive_sale("east", "hz", 100)]);

        let record_bad = derive_sale("west", "cd", 0)
            .with("sales", EnumCellValue::String("many".to_string()));
        let err = binder
            .write_records_with_schema(&schema, &[record_bad], &SpecWriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, BindError::Coercion { ref cell, .. } if cell == "C3"));
    }

    #[test]
    fn test_merge_modes_applied_on_write() {
        let schema = derive_schema();
        let l_sales = vec![
            derive_sale("east", "hz", 1),
            derive_sale("east", "hz", 1),
            derive_sale("west", "hz", 1),
        ];
        let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
        let report = binder
            .write_records_with_schema(
                &schema,
                &l_sales,
                &SpecWriteOptions {
                    merge_mode: EnumMergeMode::MergeColsAlign,
                    ..SpecWriteOptions::default()
                },
            )
            .unwrap();
        let l_refs: Vec<String> = report.merges.iter().map(|m| m.range_ref()).collect();
        assert_eq!(l_refs, vec!["A2:A3", "B2:B3", "C2:C3"]);
    }

    #[test]
    fn test_title_not_found_on_input_falls_back_to_flat() {
        let mut seed = XlsxBook::new_empty();
        let n_sheet = seed.create_sheet("区域").unwrap();
        seed.set_text(n_sheet, 1, 1, "unrelated").unwrap();
        let options = SpecBindOptions {
            input: Some(EnumDocumentSource::Bytes(seed.to_bytes().unwrap())),
            ..SpecBindOptions::default()
        };

        let mut binder = XlsxBinder::new(options).unwrap();
        let report = binder
            .write_records_with_schema(
                &derive_schema(),
                &[derive_sale("east", "hz", 1)],
                &SpecWriteOptions::default(),
            )
            .unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.row_title, Some(2));
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_use() {
        let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
        binder.close();
        binder.close();
        assert!(binder.is_closed());
        assert!(matches!(binder.to_bytes(), Err(BindError::Document(_))));
        assert!(
            binder
                .write_records_with_schema(
                    &derive_schema(),
                    &[derive_sale("east", "hz", 1)],
                    &SpecWriteOptions::default()
                )
                .is_err()
        );
    }

    #[test]
    fn test_malformed_input_fails_construction() {
        let options = SpecBindOptions {
            input: Some(EnumDocumentSource::Bytes(b"PK broken".to_vec())),
            ..SpecBindOptions::default()
        };
        assert!(matches!(
            XlsxBinder::new(options),
            Err(BindError::Document(_))
        ));
    }
}
