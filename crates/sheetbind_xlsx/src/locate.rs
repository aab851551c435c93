//! Title locator: header row discovery and template row classification.

use tracing::{debug, warn};

use crate::schema::if_titles_all_customized;
use crate::spec::{
    BindError, EnumTitleMatch, SpecBindOptions, SpecField, SpecRowView, SpecTemplateCell,
    SpecTitleLocation,
};
use crate::util::create_cell_ref;

////////////////////////////////////////////////////////////////////////////////
// #region TitleMatching

/// Pick the field whose title matches `text`.
///
/// An exact match wins over containment; among contained titles the longest wins,
/// so `其中：新增` is not shadowed by a shorter `新增`.
fn match_field_index(text: &str, fields: &[SpecField], title_match: EnumTitleMatch) -> Option<usize> {
    let c_text = text.trim();
    let mut best: Option<(usize, bool, usize)> = None;

    for (n_idx, field) in fields.iter().enumerate() {
        let c_title = field.display_title();
        if c_title.is_empty() {
            continue;
        }
        let if_exact = c_text == c_title;
        let if_hit = match title_match {
            EnumTitleMatch::Equal => if_exact,
            EnumTitleMatch::Contain if field.if_title_exact() => if_exact,
            EnumTitleMatch::Contain => c_text.contains(c_title),
        };
        if !if_hit {
            continue;
        }

        let n_len = c_title.chars().count();
        let if_better = match best {
            None => true,
            Some((_, if_best_exact, n_best_len)) => (if_exact, n_len) > (if_best_exact, n_best_len),
        };
        if if_better {
            best = Some((n_idx, if_exact, n_len));
        }
    }

    best.map(|(n_idx, ..)| n_idx)
}

/// Match one row against the field titles, returning `(field index, col)` pairs.
fn match_row(
    row: &SpecRowView,
    fields: &[SpecField],
    title_match: EnumTitleMatch,
) -> Result<Vec<(usize, u32)>, BindError> {
    let mut l_hits: Vec<(usize, u32)> = Vec::new();

    for cell in &row.cells {
        let Some(n_field) = match_field_index(&cell.text, fields, title_match) else {
            continue;
        };
        if let Some((_, n_col_prev)) = l_hits.iter().find(|(n, _)| *n == n_field) {
            return Err(BindError::DuplicateTitle {
                title: fields[n_field].display_title().to_string(),
                first: create_cell_ref(*n_col_prev, row.row_num),
                second: create_cell_ref(cell.col, row.row_num),
            });
        }
        l_hits.push((n_field, cell.col));
    }

    Ok(l_hits)
}

/// Text of cell `(col, row_num)` in a row snapshot, empty when absent.
pub fn derive_cell_text(rows: &[SpecRowView], row_num: u32, col: u32) -> &str {
    rows.iter()
        .find(|r| r.row_num == row_num)
        .and_then(|r| r.cells.iter().find(|c| c.col == col))
        .map_or("", |c| c.text.as_str())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Locate

/// Find the header row among the leading rows and map fields to columns.
///
/// Rows past `options.n_rows_title_scan_max` are never inspected. When every field
/// carries an explicit title, a row is accepted only once all of them match;
/// otherwise a single matching field is enough.
pub fn locate_title_row(
    fields: &[SpecField],
    rows: &[SpecRowView],
    options: &SpecBindOptions,
    sheet_name: &str,
) -> Result<SpecTitleLocation, BindError> {
    let if_all_customized = if_titles_all_customized(fields);
    let n_row_max = u32::try_from(options.n_rows_title_scan_max).unwrap_or(u32::MAX);

    for row in rows.iter().take_while(|r| r.row_num <= n_row_max) {
        let l_hits = match_row(row, fields, options.title_match)?;
        if l_hits.is_empty() {
            continue;
        }
        if if_all_customized && l_hits.len() < fields.len() {
            debug!(
                sheet = sheet_name,
                row = row.row_num,
                n_hits = l_hits.len(),
                n_fields = fields.len(),
                "Partial title row skipped"
            );
            continue;
        }

        let mut l_cells: Vec<SpecTemplateCell> = l_hits
            .into_iter()
            .map(|(n_field, n_col)| SpecTemplateCell {
                col: n_col,
                field: fields[n_field].clone(),
            })
            .collect();
        l_cells.sort_by_key(|c| c.col);

        debug!(
            sheet = sheet_name,
            row = row.row_num,
            n_cells = l_cells.len(),
            "Title row located"
        );
        return Ok(SpecTitleLocation {
            row_title: row.row_num,
            cells: l_cells,
            rows_template: Vec::new(),
            row_last: rows.iter().map(|r| r.row_num).max().unwrap_or(0),
        });
    }

    Err(BindError::TitleRowNotFound {
        sheet: sheet_name.to_string(),
        rows_max: options.n_rows_title_scan_max,
    })
}

/// Classify rows below the header as template rows.
///
/// For reads every following row is a candidate. For writes only rows whose first
/// mapped cell contains the template marker qualify; when the first row below the
/// header carries no marker, the next `n_rows_template_fallback` rows stand in.
pub fn find_template_rows(
    location: &SpecTitleLocation,
    rows: &[SpecRowView],
    options: &SpecBindOptions,
    if_for_read: bool,
) -> Vec<u32> {
    let Some(cell_first) = location.cells.first() else {
        return Vec::new();
    };

    if if_for_read {
        return (location.row_title + 1..=location.row_last).collect();
    }

    let mut l_rows = Vec::new();
    for n_row in location.row_title + 1..=location.row_last {
        if derive_cell_text(rows, n_row, cell_first.col).contains(options.template_marker.as_str()) {
            l_rows.push(n_row);
        } else if l_rows.is_empty() {
            let n_end = location
                .row_last
                .min(n_row.saturating_add(options.n_rows_template_fallback as u32).saturating_sub(1));
            warn!(
                row_start = n_row,
                row_end = n_end,
                marker = options.template_marker.as_str(),
                "No template marker row; using fallback rows"
            );
            return (n_row..=n_end).collect();
        }
    }
    l_rows
}

/// Locate the header and classify template rows in one step.
pub fn locate_template(
    fields: &[SpecField],
    rows: &[SpecRowView],
    options: &SpecBindOptions,
    sheet_name: &str,
    if_for_read: bool,
) -> Result<SpecTitleLocation, BindError> {
    let mut location = locate_title_row(fields, rows, options, sheet_name)?;
    location.rows_template = find_template_rows(&location, rows, options, if_for_read);
    debug!(
        sheet = sheet_name,
        n_rows_template = location.rows_template.len(),
        if_for_read,
        "Template rows classified"
    );
    Ok(location)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{EnumFieldType, SpecCellView};

    fn derive_row(row_num: u32, texts: &[&str]) -> SpecRowView {
        SpecRowView {
            row_num,
            cells: texts
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.is_empty())
                .map(|(i, t)| SpecCellView {
                    col: i as u32 + 1,
                    text: t.to_string(),
                })
                .collect(),
        }
    }

    fn derive_member_fields() -> Vec<SpecField> {
        vec![
            SpecField::new("total", EnumFieldType::Integer).title("会员总数"),
            SpecField::new("new", EnumFieldType::Integer).title("其中：新增"),
            SpecField::new("effective", EnumFieldType::Integer).title("其中：有效"),
        ]
    }

    #[test]
    fn test_locate_header_below_decorative_rows() {
        let rows = vec![
            derive_row(1, &["会员统计报表"]),
            derive_row(3, &["", "会员总数（人）", "其中：新增", "其中：有效"]),
            derive_row(4, &["", "100", "50", "50"]),
        ];
        let location =
            locate_title_row(&derive_member_fields(), &rows, &SpecBindOptions::default(), "S")
                .unwrap();
        assert_eq!(location.row_title, 3);
        assert_eq!(location.row_last, 4);
        let l_pairs: Vec<(u32, &str)> = location
            .cells
            .iter()
            .map(|c| (c.col, c.field.name.as_str()))
            .collect();
        assert_eq!(l_pairs, vec![(2, "total"), (3, "new"), (4, "effective")]);
    }

    #[test]
    fn test_locate_fails_past_scan_bound() {
        let mut rows: Vec<SpecRowView> = (1..=6).map(|n| derive_row(n, &["note"])).collect();
        rows.push(derive_row(7, &["会员总数", "其中：新增", "其中：有效"]));
        let err = locate_title_row(&derive_member_fields(), &rows, &SpecBindOptions::default(), "S")
            .unwrap_err();
        assert!(matches!(err, BindError::TitleRowNotFound { rows_max: 6, .. }));

        let options = SpecBindOptions {
            n_rows_title_scan_max: 7,
            ..SpecBindOptions::default()
        };
        assert_eq!(
            locate_title_row(&derive_member_fields(), &rows, &options, "S")
                .unwrap()
                .row_title,
            7
        );
    }

    #[test]
    fn test_locate_duplicate_title() {
        let fields = vec![
            SpecField::new("name", EnumFieldType::String),
            SpecField::new("age", EnumFieldType::Integer),
        ];
        let rows = vec![derive_row(1, &["name", "age", "name"])];
        match locate_title_row(&fields, &rows, &SpecBindOptions::default(), "S") {
            Err(BindError::DuplicateTitle { title, first, second }) => {
                assert_eq!(title, "name");
                assert_eq!(first, "A1");
                assert_eq!(second, "C1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_locate_prefers_exact_then_longest_title() {
        let fields = vec![
            SpecField::new("new", EnumFieldType::Integer).title("新增"),
            SpecField::new("new_total", EnumFieldType::Integer).title("其中：新增"),
        ];
        let rows = vec![derive_row(1, &["新增", "其中：新增"])];
        let location = locate_title_row(&fields, &rows, &SpecBindOptions::default(), "S").unwrap();
        assert_eq!(location.cells[0].field.name, "new");
        assert_eq!(location.cells[1].field.name, "new_total");
    }

    #[test]
    fn test_locate_equal_mode_and_exact_marker() {
        let fields = vec![SpecField::new("total", EnumFieldType::Integer).title("=总数")];
        let rows = vec![derive_row(1, &["会员总数"]), derive_row(2, &["总数"])];
        assert_eq!(
            locate_title_row(&fields, &rows, &SpecBindOptions::default(), "S")
                .unwrap()
                .row_title,
            2
        );

        let fields = vec![SpecField::new("total", EnumFieldType::Integer).title("总数")];
        let options = SpecBindOptions {
            title_match: EnumTitleMatch::Equal,
            ..SpecBindOptions::default()
        };
        assert_eq!(
            locate_title_row(&fields, &rows, &options, "S").unwrap().row_title,
            2
        );
    }

    #[test]
    fn test_locate_customized_titles_require_full_row() {
        let rows = vec![
            derive_row(1, &["会员总数"]),
            derive_row(2, &["会员总数", "其中：新增", "其中：有效"]),
        ];
        let location =
            locate_title_row(&derive_member_fields(), &rows, &SpecBindOptions::default(), "S")
                .unwrap();
        assert_eq!(location.row_title, 2);
        assert_eq!(location.cells.len(), 3);
    }

    #[test]
    fn test_find_template_rows_with_marker() {
        let rows = vec![
            derive_row(1, &["name", "age"]),
            derive_row(2, &["template-odd", "x"]),
            derive_row(3, &["template-even", "x"]),
            derive_row(4, &["footer"]),
        ];
        let fields = vec![
            SpecField::new("name", EnumFieldType::String),
            SpecField::new("age", EnumFieldType::Integer),
        ];
        let options = SpecBindOptions::default();
        let location = locate_template(&fields, &rows, &options, "S", false).unwrap();
        assert_eq!(location.rows_template, vec![2, 3]);

        let location = locate_template(&fields, &rows, &options, "S", true).unwrap();
        assert_eq!(location.rows_template, vec![2, 3, 4]);
    }

    #[test]
    fn test_find_template_rows_fallback() {
        let rows = vec![
            derive_row(1, &["name", "age"]),
            derive_row(2, &["example", "1"]),
            derive_row(3, &["other", "2"]),
        ];
        let fields = vec![SpecField::new("name", EnumFieldType::String)];
        let location =
            locate_template(&fields, &rows, &SpecBindOptions::default(), "S", false).unwrap();
        assert_eq!(location.rows_template, vec![2]);

        let options = SpecBindOptions {
            n_rows_template_fallback: 5,
            ..SpecBindOptions::default()
        };
        let location = locate_template(&fields, &rows, &options, "S", false).unwrap();
        assert_eq!(location.rows_template, vec![2, 3]);

        let rows = vec![derive_row(1, &["name"])];
        let location =
            locate_template(&fields, &rows, &SpecBindOptions::default(), "S", false).unwrap();
        assert!(location.rows_template.is_empty());
    }
}
