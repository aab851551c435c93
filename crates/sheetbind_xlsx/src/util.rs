//! Stateless helper utilities shared by the binding kernel.

use std::collections::{BTreeMap, BTreeSet};

use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, TUP_EXCEL_ILLEGAL};

////////////////////////////////////////////////////////////////////////////////
// #region CellReferences

/// Convert a 1-based column index into letters (`1 -> A`, `27 -> AA`).
pub fn convert_col_index_to_letters(col: u32) -> String {
    let mut n_col = col;
    let mut v_letters = Vec::new();
    while n_col > 0 {
        let n_rem = (n_col - 1) % 26;
        v_letters.push(char::from(b'A' + n_rem as u8));
        n_col = (n_col - 1) / 26;
    }
    v_letters.iter().rev().collect()
}

/// Convert column letters into a 1-based index (`A -> 1`). Case-insensitive.
pub fn convert_letters_to_col_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut n_col: u32 = 0;
    for chr in letters.chars() {
        if !chr.is_ascii_alphabetic() {
            return None;
        }
        let n_digit = (chr.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        n_col = n_col.checked_mul(26)?.checked_add(n_digit)?;
    }
    Some(n_col)
}

/// Build an `A1` style reference from 1-based column and row.
pub fn create_cell_ref(col: u32, row: u32) -> String {
    format!("{}{row}", convert_col_index_to_letters(col))
}

/// Parse `B3` / `$B$3` into 1-based `(col, row)`.
pub fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let c_ref: String = cell_ref.trim().chars().filter(|chr| *chr != '$').collect();
    let n_split = c_ref.find(|chr: char| chr.is_ascii_digit())?;
    let (c_letters, c_digits) = c_ref.split_at(n_split);
    let n_col = convert_letters_to_col_index(c_letters)?;
    let n_row = c_digits.parse::<u32>().ok()?;
    if n_row == 0 {
        return None;
    }
    Some((n_col, n_row))
}

/// Make `A1:B3` absolute (`$A$1:$B$3`); other text passes through.
pub fn convert_range_to_absolute(range_ref: &str) -> String {
    range_ref
        .split(':')
        .map(|part| match parse_cell_ref(part) {
            Some((n_col, n_row)) => format!("${}${n_row}", convert_col_index_to_letters(n_col)),
            None => part.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(":")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Create suffixed sheet name (`base_1`, `base_2`, ...), respecting length cap.
pub fn create_sheet_identifier(base_name: &str, part_idx_1based: usize) -> String {
    let c_sheet_name_suffix = format!("_{part_idx_1based}");
    let n_len_base_name_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_sheet_name_suffix.len());

    let c_sheet_name_base: String = base_name
        .chars()
        .take(usize::max(1, n_len_base_name_max))
        .collect();

    format!("{c_sheet_name_base}{c_sheet_name_suffix}")
}

/// Pick a sheet name not present in `existing`, suffixing when needed.
pub fn derive_unique_sheet_name(name: &str, existing: &[String]) -> String {
    let c_base = sanitize_sheet_name(name, "_");
    if !existing.iter().any(|c| c == &c_base) {
        return c_base;
    }
    let mut n_idx = 2usize;
    loop {
        let c_candidate = create_sheet_identifier(&c_base, n_idx);
        if !existing.iter().any(|c| c == &c_candidate) {
            return c_candidate;
        }
        n_idx += 1;
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region NameChecks

/// Validate that `names` has no duplicates.
pub fn validate_unique_names(names: &[&str]) -> Result<(), String> {
    if names.len() == names.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_name) in names.iter().enumerate() {
        dict_pos.entry(*c_name).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter_map(|(c_name, l_pos)| {
            if l_pos.len() > 1 {
                Some(format!(
                    "{c_name:?} x{} at indices {:?}",
                    l_pos.len(),
                    l_pos
                ))
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    Err(format!("Duplicate field names detected: {c_msg}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
