//! Binding constants and default preset factories.

use std::collections::BTreeMap;

use crate::codec::{
    SpecConverter, parse_bool_text, parse_date_text, parse_datetime_text, parse_float_text,
    parse_integer_text, parse_string_text, render_bool_value, render_date_value,
    render_datetime_value, render_number_value, render_string_value,
};
use crate::spec::{EnumFieldType, SpecBindOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: u32 = 1_048_576;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Leading rows scanned for a header row.
pub const N_ROWS_TITLE_SCAN_MAX: usize = 6;
/// Cell text marking a template row below the header.
pub const C_TEMPLATE_MARKER: &str = "template";
/// Rows taken as the template when no marker row is present.
pub const N_ROWS_TEMPLATE_FALLBACK: usize = 1;

/// Placeholder opening delimiter.
pub const C_PLACEHOLDER_OPEN: &str = "{{";
/// Placeholder closing delimiter.
pub const C_PLACEHOLDER_CLOSE: &str = "}}";

/// Render pattern for date-time fields without a `format` tag.
pub const C_FMT_DATETIME_DEFAULT: &str = "%Y-%m-%d %H:%M:%S";
/// Render pattern for date fields without a `format` tag.
pub const C_FMT_DATE_DEFAULT: &str = "%Y-%m-%d";
/// Excel number format applied to native date-time cells.
pub const C_NUM_FMT_DATETIME: &str = "yyyy-mm-dd hh:mm:ss";
/// Excel number format applied to native date cells.
pub const C_NUM_FMT_DATE: &str = "yyyy-mm-dd";

/// Patterns tried in order by the lenient date parser.
pub const TUP_FMT_DATETIME_LENIENT: [&str; 10] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y%m%d%H%M%S",
    "%m/%d/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];
/// Date-only patterns tried by the lenient date parser.
pub const TUP_FMT_DATE_LENIENT: [&str; 7] = [
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d", "%m/%d/%Y", "%d.%m.%Y", "%Y年%m月%d日",
];

/// Build the default converter registry used by [`crate::codec::ConverterRegistry`].
pub fn derive_default_converters() -> BTreeMap<EnumFieldType, SpecConverter> {
    let mut dict_converters = BTreeMap::new();
    dict_converters.insert(
        EnumFieldType::String,
        SpecConverter {
            parse: parse_string_text,
            render: render_string_value,
        },
    );
    dict_converters.insert(
        EnumFieldType::Integer,
        SpecConverter {
            parse: parse_integer_text,
            render: render_number_value,
        },
    );
    dict_converters.insert(
        EnumFieldType::Float,
        SpecConverter {
            parse: parse_float_text,
            render: render_number_value,
        },
    );
    dict_converters.insert(
        EnumFieldType::Bool,
        SpecConverter {
            parse: parse_bool_text,
            render: render_bool_value,
        },
    );
    dict_converters.insert(
        EnumFieldType::DateTime,
        SpecConverter {
            parse: parse_datetime_text,
            render: render_datetime_value,
        },
    );
    dict_converters.insert(
        EnumFieldType::Date,
        SpecConverter {
            parse: parse_date_text,
            render: render_date_value,
        },
    );
    dict_converters
}

/// Build default binder options.
pub fn derive_default_bind_options() -> SpecBindOptions {
    SpecBindOptions::default()
}
