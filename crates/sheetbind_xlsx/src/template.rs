//! Template row engine: write records over template rows, truncate leftovers, read rows back.

use tracing::{debug, warn};

use crate::book::{CellStyle, XlsxBook};
use crate::codec::ConverterRegistry;
use crate::schema::RecordValues;
use crate::spec::{BindError, SpecTitleLocation};
use crate::util::create_cell_ref;

/// Per-sheet writer driving records over a located template.
#[derive(Debug)]
pub struct TemplateRowEngine {
    sheet: usize,
    location: SpecTitleLocation,
    /// Styles of the mapped cells, one entry per template row.
    l_styles: Vec<Vec<Option<CellStyle>>>,
    n_rows_written: usize,
    if_new_sheet: bool,
    /// Rendered texts of written rows, in mapped-column order.
    l_rendered: Vec<Vec<String>>,
}

impl TemplateRowEngine {
    /// Snapshot the template row styles of `location` in `sheet`.
    pub fn new(
        book: &XlsxBook,
        sheet: usize,
        location: SpecTitleLocation,
        if_new_sheet: bool,
    ) -> Result<Self, BindError> {
        let mut l_styles = Vec::with_capacity(location.rows_template.len());
        for n_row in &location.rows_template {
            let mut l_row_styles = Vec::with_capacity(location.cells.len());
            for cell in &location.cells {
                l_row_styles.push(book.get_style(sheet, cell.col, *n_row)?);
            }
            l_styles.push(l_row_styles);
        }

        Ok(Self {
            sheet,
            location,
            l_styles,
            n_rows_written: 0,
            if_new_sheet,
            l_rendered: Vec::new(),
        })
    }

    pub fn location(&self) -> &SpecTitleLocation {
        &self.location
    }

    pub fn n_rows_written(&self) -> usize {
        self.n_rows_written
    }

    /// First data row (directly below the header).
    pub fn row_first(&self) -> u32 {
        self.location.row_title + 1
    }

    /// Rendered texts of the written rows.
    pub fn rendered_rows(&self) -> &[Vec<String>] {
        &self.l_rendered
    }

    /// Write one record at `header + 1 + rows_written`, returning the row number.
    ///
    /// Once more rows are written than template rows exist (or from the first row
    /// on a fresh sheet), cell styles cycle through the template rows.
    pub fn write_row<R: RecordValues + ?Sized>(
        &mut self,
        book: &mut XlsxBook,
        record: &R,
        registry: &ConverterRegistry,
    ) -> Result<u32, BindError> {
        let n_row = self.row_first() + self.n_rows_written as u32;
        self.n_rows_written += 1;

        self.copy_row_style(book, n_row)?;

        let mut l_texts = Vec::with_capacity(self.location.cells.len());
        for cell in &self.location.cells {
            let value = record.get_value(&cell.field.name);
            book.write_value(self.sheet, cell.col, n_row, &cell.field, &value, registry)?;
            l_texts.push(registry.render(&cell.field, &value));
        }
        self.l_rendered.push(l_texts);
        Ok(n_row)
    }

    fn copy_row_style(&self, book: &mut XlsxBook, n_row: u32) -> Result<(), BindError> {
        let n_templates = self.l_styles.len();
        if n_templates == 0 || (!self.if_new_sheet && self.n_rows_written <= n_templates) {
            return Ok(());
        }

        let l_row_styles = &self.l_styles[(self.n_rows_written - 1) % n_templates];
        for (cell, style) in self.location.cells.iter().zip(l_row_styles) {
            if let Some(style) = style {
                book.set_style(self.sheet, cell.col, n_row, style.clone())?;
            }
        }
        Ok(())
    }

    /// Remove every row below the header before writing into a derived sheet.
    pub fn drop_data_rows(&mut self, book: &mut XlsxBook) -> Result<(), BindError> {
        let n_row_title = self.location.row_title;
        if self.location.row_last > n_row_title {
            book.remove_rows(self.sheet, n_row_title + 1, self.location.row_last - n_row_title)?;
        }
        self.location.row_last = n_row_title;
        Ok(())
    }

    /// Drop original rows left below the last written row.
    pub fn remove_template_rows(&self, book: &mut XlsxBook) -> Result<(), BindError> {
        if self.location.rows_template.is_empty() {
            return Ok(());
        }
        let n_row_keep = self.location.row_title + self.n_rows_written as u32;
        if n_row_keep >= self.location.row_last {
            return Ok(());
        }
        debug!(
            sheet = self.sheet,
            row_start = n_row_keep + 1,
            row_end = self.location.row_last,
            "Truncating leftover template rows"
        );
        book.remove_rows(self.sheet, n_row_keep + 1, self.location.row_last - n_row_keep)
    }
}

/// Read one record per template row of `location`.
///
/// Rows whose mapped cells are all empty are skipped when `if_ignore_empty_rows`.
/// Empty cells leave the field at its default. A conversion failure aborts the read
/// unless the field tolerates it.
pub fn read_rows<R: RecordValues + Default>(
    book: &XlsxBook,
    sheet: usize,
    location: &SpecTitleLocation,
    if_ignore_empty_rows: bool,
    registry: &ConverterRegistry,
) -> Result<Vec<R>, BindError> {
    let mut l_records = Vec::with_capacity(location.rows_template.len());

    for n_row in &location.rows_template {
        let l_texts = location
            .cells
            .iter()
            .map(|cell| book.get_text(sheet, cell.col, *n_row))
            .collect::<Result<Vec<_>, _>>()?;
        if if_ignore_empty_rows && l_texts.iter().all(|t| t.trim().is_empty()) {
            continue;
        }

        let mut record = R::default();
        for (cell, c_text) in location.cells.iter().zip(&l_texts) {
            if c_text.trim().is_empty() {
                continue;
            }
            let result = registry
                .parse(&cell.field, c_text)
                .and_then(|value| record.set_value(&cell.field.name, value));
            if let Err(message) = result {
                let c_ref = create_cell_ref(cell.col, *n_row);
                if cell.field.if_omit_err {
                    warn!(field = cell.field.name.as_str(), cell = c_ref.as_str(), %message, "Conversion error omitted");
                    continue;
                }
                return Err(BindError::Coercion {
                    field: cell.field.name.clone(),
                    cell: c_ref,
                    value: c_text.clone(),
                    message,
                });
            }
        }
        l_records.push(record);
    }

    debug!(sheet, n_records = l_records.len(), "Rows read");
    Ok(l_records)
}
