//! Merge planner: same-value vertical ranges over written data rows.

use std::collections::BTreeSet;

use crate::spec::{EnumMergeMode, SpecMergeRange};
use crate::util::create_cell_ref;

/// Plan vertical merges for written rows.
///
/// `grid[i][j]` is the rendered text of data row `i` in column `cols[j]`; data row 0
/// sits at sheet row `row_first`. Empty values never merge. Under
/// [`EnumMergeMode::MergeColsAlign`] each column is split at every change point
/// committed by the columns before it.
pub fn plan_merges(
    cols: &[u32],
    grid: &[Vec<String>],
    row_first: u32,
    mode: EnumMergeMode,
) -> Vec<SpecMergeRange> {
    if mode == EnumMergeMode::None || grid.len() < 2 {
        return Vec::new();
    }

    let mut set_committed: BTreeSet<usize> = BTreeSet::new();
    let mut l_merges = Vec::new();

    for (n_col_idx, n_col) in cols.iter().enumerate() {
        let l_values: Vec<&str> = grid
            .iter()
            .map(|row| row.get(n_col_idx).map_or("", String::as_str))
            .collect();

        let mut l_breaks: Vec<usize> = Vec::new();
        for n_row in 1..l_values.len() {
            let if_changed = l_values[n_row] != l_values[n_row - 1];
            let if_blocked =
                mode == EnumMergeMode::MergeColsAlign && set_committed.contains(&n_row);
            if if_changed || if_blocked {
                l_breaks.push(n_row);
            }
        }

        let mut n_start = 0usize;
        for n_end in l_breaks.iter().copied().chain(std::iter::once(l_values.len())) {
            if n_end - n_start >= 2 && !l_values[n_start].is_empty() {
                l_merges.push(SpecMergeRange {
                    col: *n_col,
                    cell_start: create_cell_ref(*n_col, row_first + n_start as u32),
                    cell_end: create_cell_ref(*n_col, row_first + n_end as u32 - 1),
                });
            }
            n_start = n_end;
        }

        set_committed.extend(l_breaks);
    }

    l_merges
}
