//! Thin adapter over the `umya-spreadsheet` document model.
//!
//! Every engine call of the crate goes through [`XlsxBook`]; sheets are addressed by
//! their index in the workbook.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;

use tracing::{debug, warn};
use umya_spreadsheet::{
    DataValidation, DataValidationValues, DataValidations, SequenceOfReferences, Spreadsheet,
    Worksheet,
};

pub use umya_spreadsheet::Style as CellStyle;

use crate::codec::{ConverterRegistry, convert_datetime_to_excel_serial};
use crate::conf::{C_NUM_FMT_DATE, C_NUM_FMT_DATETIME, N_NROWS_EXCEL_MAX};
use crate::spec::{
    BindError, EnumCellValue, EnumDocumentSource, EnumFieldType, SpecCellView, SpecField,
    SpecRowView,
};
use crate::util::{create_cell_ref, derive_unique_sheet_name};

fn map_engine_err(err: impl std::fmt::Display) -> BindError {
    BindError::Document(err.to_string())
}

/// Parse text bound for a typed field. Blank text is a missing value; an
/// omitted failure keeps the text.
fn coerce_text_value(
    field: &SpecField,
    text: &str,
    col: u32,
    row: u32,
    registry: &ConverterRegistry,
) -> Result<EnumCellValue, BindError> {
    if text.trim().is_empty() {
        return Ok(EnumCellValue::None);
    }
    match registry.parse(field, text) {
        Ok(value) => Ok(value),
        Err(message) if field.if_omit_err => {
            let c_ref = create_cell_ref(col, row);
            warn!(field = field.name.as_str(), cell = c_ref.as_str(), %message, "Conversion error omitted, text kept");
            Ok(EnumCellValue::String(text.to_string()))
        }
        Err(message) => Err(BindError::Coercion {
            field: field.name.clone(),
            cell: create_cell_ref(col, row),
            value: text.to_string(),
            message,
        }),
    }
}

/// In-memory workbook handle.
pub struct XlsxBook {
    book: Spreadsheet,
}

impl std::fmt::Debug for XlsxBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XlsxBook")
            .field("sheets", &self.sheet_names())
            .finish()
    }
}

impl Clone for XlsxBook {
    fn clone(&self) -> Self {
        Self {
            book: self.book.clone(),
        }
    }
}

impl XlsxBook {
    ////////////////////////////////////////////////////////////////////////////
    // #region Lifecycle

    /// Workbook without any sheet.
    pub fn new_empty() -> Self {
        Self {
            book: umya_spreadsheet::new_file_empty_worksheet(),
        }
    }

    /// Open a workbook from a path or raw bytes.
    pub fn open(source: &EnumDocumentSource) -> Result<Self, BindError> {
        let book = match source {
            EnumDocumentSource::Path(path) => {
                debug!(path = %path.display(), "Opening workbook");
                umya_spreadsheet::reader::xlsx::read(path).map_err(map_engine_err)?
            }
            EnumDocumentSource::Bytes(v_bytes) => {
                debug!(n_bytes = v_bytes.len(), "Opening workbook from bytes");
                umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(v_bytes.as_slice()), true)
                    .map_err(map_engine_err)?
            }
        };
        Ok(Self { book })
    }

    /// Write the workbook to `path`.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), BindError> {
        umya_spreadsheet::writer::xlsx::write(&self.book, path.as_ref()).map_err(map_engine_err)
    }

    /// Serialize the workbook into `.xlsx` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BindError> {
        let mut cursor = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&self.book, &mut cursor)
            .map_err(map_engine_err)?;
        Ok(cursor.into_inner())
    }

    /// Serialize the workbook into `writer`.
    pub fn save_to_writer(&self, mut writer: impl Write) -> Result<(), BindError> {
        writer.write_all(&self.to_bytes()?)?;
        writer.flush()?;
        Ok(())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Sheets

    pub fn sheet_count(&self) -> usize {
        self.book.get_sheet_count()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        (0..self.book.get_sheet_count())
            .filter_map(|n_idx| self.book.get_sheet(&n_idx))
            .map(|ws| ws.get_name().to_string())
            .collect()
    }

    /// Sheet name at `sheet`.
    pub fn sheet_name(&self, sheet: usize) -> Result<String, BindError> {
        Ok(self.sheet(sheet)?.get_name().to_string())
    }

    /// First sheet whose name contains `name`.
    pub fn find_sheet(&self, name: &str) -> Option<usize> {
        self.sheet_names()
            .iter()
            .position(|c_sheet| c_sheet.contains(name))
    }

    /// Append a new sheet, de-duplicating the sanitized name.
    pub fn create_sheet(&mut self, name: &str) -> Result<usize, BindError> {
        let c_name = derive_unique_sheet_name(name, &self.sheet_names());
        self.book
            .new_sheet(c_name.as_str())
            .map_err(|err| BindError::Document(format!("Failed to create sheet {c_name:?}: {err}")))?;
        debug!(sheet = c_name.as_str(), "Sheet created");
        Ok(self.book.get_sheet_count() - 1)
    }

    /// Append a copy of sheet `sheet` named `name`.
    pub fn clone_sheet(&mut self, sheet: usize, name: &str) -> Result<usize, BindError> {
        let c_name = derive_unique_sheet_name(name, &self.sheet_names());
        let mut ws = self.sheet(sheet)?.clone();
        ws.set_name(c_name.as_str());
        self.book
            .add_sheet(ws)
            .map_err(|err| BindError::Document(format!("Failed to clone sheet {c_name:?}: {err}")))?;
        debug!(source = sheet, sheet = c_name.as_str(), "Sheet cloned");
        Ok(self.book.get_sheet_count() - 1)
    }

    /// Rename sheet `sheet`; a no-op when `name` is empty or already contained.
    pub fn rename_sheet(&mut self, sheet: usize, name: &str) -> Result<(), BindError> {
        let c_current = self.sheet_name(sheet)?;
        if name.is_empty() || c_current.contains(name) {
            return Ok(());
        }
        let l_others: Vec<String> = self
            .sheet_names()
            .into_iter()
            .filter(|c| *c != c_current)
            .collect();
        let c_name = derive_unique_sheet_name(name, &l_others);
        self.sheet_mut(sheet)?.set_name(c_name.as_str());
        debug!(from = c_current.as_str(), to = c_name.as_str(), "Sheet renamed");
        Ok(())
    }

    fn sheet(&self, sheet: usize) -> Result<&Worksheet, BindError> {
        self.book
            .get_sheet(&sheet)
            .ok_or_else(|| BindError::Document(format!("Sheet index {sheet} out of range")))
    }

    fn sheet_mut(&mut self, sheet: usize) -> Result<&mut Worksheet, BindError> {
        self.book
            .get_sheet_mut(&sheet)
            .ok_or_else(|| BindError::Document(format!("Sheet index {sheet} out of range")))
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Cells

    /// Row snapshot: one entry per row holding any cell, non-empty texts only.
    pub fn snapshot_rows(&self, sheet: usize) -> Result<Vec<SpecRowView>, BindError> {
        let ws = self.sheet(sheet)?;
        let mut dict_rows: BTreeMap<u32, Vec<SpecCellView>> = BTreeMap::new();
        for cell in ws.get_cell_collection() {
            let coord = cell.get_coordinate();
            let l_cells = dict_rows.entry(*coord.get_row_num()).or_default();
            let c_text = cell.get_value();
            if !c_text.trim().is_empty() {
                l_cells.push(SpecCellView {
                    col: *coord.get_col_num(),
                    text: c_text.to_string(),
                });
            }
        }

        Ok(dict_rows
            .into_iter()
            .map(|(n_row, mut l_cells)| {
                l_cells.sort_by_key(|c| c.col);
                SpecRowView {
                    row_num: n_row,
                    cells: l_cells,
                }
            })
            .collect())
    }

    /// Highest used row number (0 for an empty sheet).
    pub fn highest_row(&self, sheet: usize) -> Result<u32, BindError> {
        Ok(self.sheet(sheet)?.get_highest_row())
    }

    /// Cell text, empty when the cell does not exist.
    pub fn get_text(&self, sheet: usize, col: u32, row: u32) -> Result<String, BindError> {
        Ok(self.sheet(sheet)?.get_value((col, row)))
    }

    /// Write plain text into a cell (never inferred as a number).
    pub fn set_text(&mut self, sheet: usize, col: u32, row: u32, text: &str) -> Result<(), BindError> {
        validate_row_num(row)?;
        self.sheet_mut(sheet)?
            .get_cell_mut((col, row))
            .set_value_string(text);
        Ok(())
    }

    /// Write a typed value into a cell.
    ///
    /// Numbers and booleans become native cells. A time value without a `format`
    /// tag is stored as an Excel serial with a date number format; with a format
    /// it is stored as the rendered text. Text given to a non-text field is
    /// coerced first; a failure is a `Coercion` error unless the field omits errors.
    pub fn write_value(
        &mut self,
        sheet: usize,
        col: u32,
        row: u32,
        field: &SpecField,
        value: &EnumCellValue,
        registry: &ConverterRegistry,
    ) -> Result<(), BindError> {
        validate_row_num(row)?;
        let value_coerced;
        let value = match value {
            EnumCellValue::String(c_text) if field.field_type != EnumFieldType::String => {
                value_coerced = coerce_text_value(field, c_text, col, row, registry)?;
                &value_coerced
            }
            _ => value,
        };
        let c_rendered = registry.render(field, value);
        let cell = self.sheet_mut(sheet)?.get_cell_mut((col, row));

        match (field.field_type, value) {
            (_, EnumCellValue::None) => {
                cell.set_blank();
            }
            (EnumFieldType::Integer | EnumFieldType::Float, EnumCellValue::Integer(v)) => {
                cell.set_value_number(*v as f64);
            }
            (EnumFieldType::Integer | EnumFieldType::Float, EnumCellValue::Number(v)) => {
                cell.set_value_number(*v);
            }
            (EnumFieldType::Bool, EnumCellValue::Bool(v)) => {
                cell.set_value_bool(*v);
            }
            (EnumFieldType::DateTime | EnumFieldType::Date, EnumCellValue::DateTime(dt))
                if field.format.as_deref().is_none_or(str::is_empty) =>
            {
                cell.set_value_number(convert_datetime_to_excel_serial(dt));
                let c_code = match field.field_type {
                    EnumFieldType::Date => C_NUM_FMT_DATE,
                    _ => C_NUM_FMT_DATETIME,
                };
                cell.get_style_mut()
                    .get_number_format_mut()
                    .set_format_code(c_code);
            }
            _ => {
                cell.set_value_string(c_rendered);
            }
        }
        Ok(())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Styles

    /// Style of an existing cell.
    pub fn get_style(&self, sheet: usize, col: u32, row: u32) -> Result<Option<CellStyle>, BindError> {
        Ok(self
            .sheet(sheet)?
            .get_cell((col, row))
            .map(|cell| cell.get_style().clone()))
    }

    pub fn set_style(
        &mut self,
        sheet: usize,
        col: u32,
        row: u32,
        style: CellStyle,
    ) -> Result<(), BindError> {
        validate_row_num(row)?;
        self.sheet_mut(sheet)?.set_style((col, row), style);
        Ok(())
    }

    /// Number format code of a cell, if any.
    pub fn get_number_format(&self, sheet: usize, col: u32, row: u32) -> Result<Option<String>, BindError> {
        Ok(self.sheet(sheet)?.get_cell((col, row)).and_then(|cell| {
            cell.get_style()
                .get_number_format()
                .map(|fmt| fmt.get_format_code().to_string())
        }))
    }

    pub fn set_number_format(
        &mut self,
        sheet: usize,
        col: u32,
        row: u32,
        code: &str,
    ) -> Result<(), BindError> {
        validate_row_num(row)?;
        self.sheet_mut(sheet)?
            .get_style_mut((col, row))
            .get_number_format_mut()
            .set_format_code(code);
        Ok(())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Structure

    /// Remove `n_rows` rows starting at `row_start`, shifting later rows up.
    pub fn remove_rows(&mut self, sheet: usize, row_start: u32, n_rows: u32) -> Result<(), BindError> {
        if n_rows == 0 {
            return Ok(());
        }
        self.sheet_mut(sheet)?.remove_row(&row_start, &n_rows);
        debug!(sheet, row_start, n_rows, "Rows removed");
        Ok(())
    }

    /// Merge an `A1:A3` range.
    pub fn add_merge(&mut self, sheet: usize, range_ref: &str) -> Result<(), BindError> {
        self.sheet_mut(sheet)?.add_merge_cells(range_ref);
        Ok(())
    }

    /// Merged ranges of a sheet as `A1:A3` references.
    pub fn merge_refs(&self, sheet: usize) -> Result<Vec<String>, BindError> {
        Ok(self
            .sheet(sheet)?
            .get_merge_cells()
            .iter()
            .map(|range| range.get_range())
            .collect())
    }

    /// Attach a list validation to `sqref` (`B2:B10`).
    ///
    /// `formula` is either a quoted literal list (`"a,b"`) or an absolute range.
    pub fn add_list_validation(
        &mut self,
        sheet: usize,
        sqref: &str,
        formula: &str,
    ) -> Result<(), BindError> {
        let mut sequence = SequenceOfReferences::default();
        sequence.set_sqref(sqref);

        let mut validation = DataValidation::default();
        validation
            .set_type(DataValidationValues::List)
            .set_allow_blank(true)
            .set_show_error_message(true)
            .set_formula1(formula)
            .set_sequence_of_references(sequence);

        let ws = self.sheet_mut(sheet)?;
        match ws.get_data_validations_mut() {
            Some(validations) => {
                validations.add_data_validation_list(validation);
            }
            None => {
                let mut validations = DataValidations::default();
                validations.add_data_validation_list(validation);
                ws.set_data_validations(validations);
            }
        }
        debug!(sheet, sqref, formula, "List validation added");
        Ok(())
    }

    /// `(sqref, formula1)` pairs of the sheet's list validations.
    pub fn list_validations(&self, sheet: usize) -> Result<Vec<(String, String)>, BindError> {
        Ok(self
            .sheet(sheet)?
            .get_data_validations()
            .map(|validations| {
                validations
                    .get_data_validation_list()
                    .iter()
                    .map(|v| {
                        (
                            v.get_sequence_of_references().get_sqref(),
                            v.get_formula1().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
}

fn validate_row_num(row: u32) -> Result<(), BindError> {
    if row == 0 || row > N_NROWS_EXCEL_MAX {
        return Err(BindError::Document(format!(
            "Row {row} outside the sheet bounds 1..={N_NROWS_EXCEL_MAX}"
        )));
    }
    Ok(())
}
