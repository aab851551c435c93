//! `dataValidation` tags: list sources resolved into list validations on written columns.

use std::collections::BTreeMap;

use crate::book::XlsxBook;
use crate::spec::{BindError, SpecTemplateCell};
use crate::util::{convert_range_to_absolute, create_cell_ref};

/// Where the allowed values of a list validation come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumValidationSource {
    /// Range in another sheet: `Sheet!A1:A3`.
    SheetRange { sheet: String, range: String },
    /// Explicit values (named list or literal `a,b,c`).
    Values(Vec<String>),
}

/// Classify a `dataValidation` tag.
pub fn parse_validation_tag(
    tag: &str,
    named: &BTreeMap<String, Vec<String>>,
) -> EnumValidationSource {
    if let Some((c_sheet, c_range)) = tag.split_once('!') {
        return EnumValidationSource::SheetRange {
            sheet: c_sheet.trim().trim_matches('\'').to_string(),
            range: c_range.trim().to_string(),
        };
    }
    if let Some(l_values) = named.get(tag) {
        return EnumValidationSource::Values(l_values.clone());
    }
    EnumValidationSource::Values(tag.split(',').map(|v| v.trim().to_string()).collect())
}

/// Build the list formula for `source`, resolving sheet names against `book`.
pub fn resolve_validation_formula(
    tag: &str,
    source: &EnumValidationSource,
    book: &XlsxBook,
) -> Result<String, BindError> {
    match source {
        EnumValidationSource::SheetRange { sheet, range } => {
            let n_sheet = book
                .find_sheet(sheet)
                .ok_or_else(|| BindError::ValidationReference {
                    reference: tag.to_string(),
                    message: format!("unable to find sheet with name {sheet:?}"),
                })?;
            let c_sheet = book.sheet_name(n_sheet)?;
            Ok(format!("'{c_sheet}'!{}", convert_range_to_absolute(range)))
        }
        EnumValidationSource::Values(l_values) => {
            if l_values.iter().any(|v| v.contains('"')) {
                return Err(BindError::ValidationReference {
                    reference: tag.to_string(),
                    message: "list values must not contain double quotes".to_string(),
                });
            }
            Ok(format!("\"{}\"", l_values.join(",")))
        }
    }
}

/// Attach list validations for every tagged column over rows `row_first..row_first + n_rows`.
///
/// Returns the number of validations added.
pub fn apply_validations(
    book: &mut XlsxBook,
    sheet: usize,
    cells: &[SpecTemplateCell],
    row_first: u32,
    n_rows: usize,
    named: &BTreeMap<String, Vec<String>>,
) -> Result<usize, BindError> {
    let n_row_last = row_first + (n_rows.max(1) as u32) - 1;
    let mut n_added = 0;

    for cell in cells {
        let Some(c_tag) = cell.field.data_validation.as_deref().filter(|t| !t.is_empty()) else {
            continue;
        };
        let source = parse_validation_tag(c_tag, named);
        let c_formula = resolve_validation_formula(c_tag, &source, book)?;
        let c_sqref = format!(
            "{}:{}",
            create_cell_ref(cell.col, row_first),
            create_cell_ref(cell.col, n_row_last)
        );
        book.add_list_validation(sheet, &c_sqref, &c_formula)?;
        n_added += 1;
    }

    Ok(n_added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{EnumFieldType, SpecField};

    fn derive_named() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([(
            "levels".to_string(),
            vec!["gold".to_string(), "silver".to_string()],
        )])
    }

    #[test]
    fn test_parse_validation_tag() {
        let named = derive_named();
        assert_eq!(
            parse_validation_tag("Data!A1:A3", &named),
            EnumValidationSource::SheetRange {
                sheet: "Data".to_string(),
                range: "A1:A3".to_string()
            }
        );
        assert_eq!(
            parse_validation_tag("levels", &named),
            EnumValidationSource::Values(vec!["gold".to_string(), "silver".to_string()])
        );
        assert_eq!(
            parse_validation_tag("A, B,C", &named),
            EnumValidationSource::Values(vec!["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn test_resolve_sheet_range_formula() {
        let mut book = XlsxBook::new_empty();
        book.create_sheet("main").unwrap();
        book.create_sheet("DataSource").unwrap();

        let source = parse_validation_tag("Data!A1:A3", &BTreeMap::new());
        assert_eq!(
            resolve_validation_formula("Data!A1:A3", &source, &book).unwrap(),
            "'DataSource'!$A$1:$A$3"
        );

        let source = parse_validation_tag("Missing!A1:A3", &BTreeMap::new());
        assert!(matches!(
            resolve_validation_formula("Missing!A1:A3", &source, &book),
            Err(BindError::ValidationReference { .. })
        ));
    }

    #[test]
    fn test_apply_validations_covers_written_rows() {
        let mut book = XlsxBook::new_empty();
        let n_sheet = book.create_sheet("main").unwrap();
        let cells = vec![
            SpecTemplateCell {
                col: 1,
                field: SpecField::new("name", EnumFieldType::String),
            },
            SpecTemplateCell {
                col: 2,
                field: SpecField::new("level", EnumFieldType::String).data_validation("levels"),
            },
        ];

        let n_added = apply_validations(&mut book, n_sheet, &cells, 2, 3, &derive_named()).unwrap();
        assert_eq!(n_added, 1);
        assert_eq!(
            book.list_validations(n_sheet).unwrap(),
            vec![("B2:B4".to_string(), "\"gold,silver\"".to_string())]
        );
    }
}
