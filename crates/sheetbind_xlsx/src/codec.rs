//! Cell value codec: type-tag converter registry, date patterns and field conversions.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::conf::{
    C_FMT_DATE_DEFAULT, C_FMT_DATETIME_DEFAULT, TUP_FMT_DATE_LENIENT, TUP_FMT_DATETIME_LENIENT,
    derive_default_converters,
};
use crate::spec::{EnumCellValue, EnumFieldType, SpecField};

/// Text-to-value converter. The second argument is the field's `format` tag.
pub type FnParseText = fn(&str, Option<&str>) -> Result<EnumCellValue, String>;
/// Value-to-text converter. The second argument is the field's `format` tag.
pub type FnRenderValue = fn(&EnumCellValue, Option<&str>) -> String;

/// Converter function pair registered for one type tag.
#[derive(Debug, Clone, Copy)]
pub struct SpecConverter {
    /// Cell text to typed value.
    pub parse: FnParseText,
    /// Typed value to cell text.
    pub render: FnRenderValue,
}

/// Registry mapping type tags to converter pairs.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    dict_converters: BTreeMap<EnumFieldType, SpecConverter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self {
            dict_converters: derive_default_converters(),
        }
    }
}

impl ConverterRegistry {
    /// Registry preloaded with the default converters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the converter pair for `field_type`.
    pub fn register(&mut self, field_type: EnumFieldType, converter: SpecConverter) {
        self.dict_converters.insert(field_type, converter);
    }

    /// Convert cell text into the field's declared type.
    pub fn parse(&self, field: &SpecField, text: &str) -> Result<EnumCellValue, String> {
        match self.dict_converters.get(&field.field_type) {
            Some(converter) => (converter.parse)(text, field.format.as_deref()),
            None => Err(format!("No converter registered for {:?}", field.field_type)),
        }
    }

    /// Render a typed value as cell text for the field.
    pub fn render(&self, field: &SpecField, value: &EnumCellValue) -> String {
        match self.dict_converters.get(&field.field_type) {
            Some(converter) => (converter.render)(value, field.format.as_deref()),
            None => render_plain_value(value),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region DatePatterns

/// Translate a Java-style date pattern (`yyyy-MM-dd HH:mm:ss.SSS`) into chrono syntax.
///
/// Unknown letters are kept literally; `%` is escaped.
pub fn convert_java_time_format(layout: &str) -> String {
    const TUP_TOKENS: [(&str, &str); 8] = [
        ("yyyy", "%Y"),
        ("SSS", "%3f"),
        ("yy", "%y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];

    let mut c_out = String::with_capacity(layout.len() + 8);
    let mut c_rest = layout;
    'outer: while let Some(chr) = c_rest.chars().next() {
        for (c_java, c_chrono) in TUP_TOKENS {
            if let Some(c_tail) = c_rest.strip_prefix(c_java) {
                c_out.push_str(c_chrono);
                c_rest = c_tail;
                continue 'outer;
            }
        }
        if chr == '%' {
            c_out.push_str("%%");
        } else {
            c_out.push(chr);
        }
        c_rest = &c_rest[chr.len_utf8()..];
    }
    c_out
}

fn derive_excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

/// Convert an Excel serial date (1900 system) into a date-time.
pub fn convert_excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    // 2_958_465 is 9999-12-31.
    if !serial.is_finite() || !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let n_millis = (serial * 86_400_000.0).round() as i64;
    derive_excel_epoch().checked_add_signed(TimeDelta::try_milliseconds(n_millis)?)
}

/// Convert a date-time into an Excel serial date (1900 system).
pub fn convert_datetime_to_excel_serial(value: &NaiveDateTime) -> f64 {
    let n_millis = value
        .signed_duration_since(derive_excel_epoch())
        .num_milliseconds();
    n_millis as f64 / 86_400_000.0
}

/// Parse free-form date text: Excel serials, RFC 3339 and common layouts.
pub fn parse_datetime_lenient(text: &str) -> Option<NaiveDateTime> {
    let c_text = text.trim();
    if c_text.is_empty() {
        return None;
    }
    if let Ok(serial) = c_text.parse::<f64>()
        && let Some(dt) = convert_excel_serial_to_datetime(serial)
    {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(c_text) {
        return Some(dt.naive_local());
    }
    for c_fmt in TUP_FMT_DATETIME_LENIENT {
        if let Ok(dt) = NaiveDateTime::parse_from_str(c_text, c_fmt) {
            return Some(dt);
        }
    }
    for c_fmt in TUP_FMT_DATE_LENIENT {
        if let Ok(date) = NaiveDate::parse_from_str(c_text, c_fmt) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

fn parse_datetime_with_format(text: &str, format: &str) -> Result<NaiveDateTime, String> {
    let c_fmt = convert_java_time_format(format);
    let c_text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(c_text, &c_fmt) {
        return Ok(dt);
    }
    match NaiveDate::parse_from_str(c_text, &c_fmt) {
        Ok(date) => Ok(date.and_time(NaiveTime::MIN)),
        // Native date cells hold a serial whatever the declared format.
        Err(err) => c_text
            .parse::<f64>()
            .ok()
            .and_then(convert_excel_serial_to_datetime)
            .ok_or_else(|| format!("{c_text:?} does not match format {format:?}: {err}")),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DefaultConverters

pub fn parse_string_text(text: &str, _format: Option<&str>) -> Result<EnumCellValue, String> {
    Ok(EnumCellValue::String(text.to_string()))
}

pub fn parse_integer_text(text: &str, _format: Option<&str>) -> Result<EnumCellValue, String> {
    let c_text = text.trim();
    if let Ok(v) = c_text.parse::<i64>() {
        return Ok(EnumCellValue::Integer(v));
    }
    match c_text.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => convert_integral_float(v)
            .ok_or_else(|| format!("{c_text:?} is out of integer range")),
        _ => Err(format!("{c_text:?} is not an integer")),
    }
}

/// `Integer` within `i64`, `Number` for larger unsigned magnitudes, `None` beyond `u64`.
fn convert_integral_float(v: f64) -> Option<EnumCellValue> {
    // 2^63 and 2^64, both exact in f64.
    let n_i64_end = (i64::MAX / 2 + 1) as f64 * 2.0;
    let n_u64_end = (u64::MAX / 2 + 1) as f64 * 2.0;
    if v >= i64::MIN as f64 && v < n_i64_end {
        Some(EnumCellValue::Integer(v as i64))
    } else if v >= 0.0 && v < n_u64_end {
        Some(EnumCellValue::Number(v))
    } else {
        None
    }
}

pub fn parse_float_text(text: &str, _format: Option<&str>) -> Result<EnumCellValue, String> {
    let c_text = text.trim();
    c_text
        .parse::<f64>()
        .map(EnumCellValue::Number)
        .map_err(|_| format!("{c_text:?} is not a number"))
}

pub fn parse_bool_text(text: &str, _format: Option<&str>) -> Result<EnumCellValue, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "t" => Ok(EnumCellValue::Bool(true)),
        "false" | "0" | "no" | "n" | "f" | "" => Ok(EnumCellValue::Bool(false)),
        _ => Err(format!("{:?} is not a boolean", text.trim())),
    }
}

pub fn parse_datetime_text(text: &str, format: Option<&str>) -> Result<EnumCellValue, String> {
    match format {
        Some(c_fmt) if !c_fmt.is_empty() => {
            parse_datetime_with_format(text, c_fmt).map(EnumCellValue::DateTime)
        }
        _ => parse_datetime_lenient(text)
            .map(EnumCellValue::DateTime)
            .ok_or_else(|| format!("{:?} is not a recognizable date", text.trim())),
    }
}

pub fn parse_date_text(text: &str, format: Option<&str>) -> Result<EnumCellValue, String> {
    match parse_datetime_text(text, format)? {
        EnumCellValue::DateTime(dt) => Ok(EnumCellValue::DateTime(
            dt.date().and_time(NaiveTime::MIN),
        )),
        other => Ok(other),
    }
}

/// Render any value without type-specific rules.
pub fn render_plain_value(value: &EnumCellValue) -> String {
    match value {
        EnumCellValue::None => String::new(),
        EnumCellValue::String(s) => s.clone(),
        EnumCellValue::Integer(v) => v.to_string(),
        EnumCellValue::Number(v) => render_float(*v),
        EnumCellValue::Bool(v) => v.to_string(),
        EnumCellValue::DateTime(dt) => dt.format(C_FMT_DATETIME_DEFAULT).to_string(),
    }
}

fn render_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        (v as i64).to_string()
    } else {
        v.to_string()
    }
}

pub fn render_string_value(value: &EnumCellValue, _format: Option<&str>) -> String {
    render_plain_value(value)
}

pub fn render_number_value(value: &EnumCellValue, _format: Option<&str>) -> String {
    render_plain_value(value)
}

pub fn render_bool_value(value: &EnumCellValue, _format: Option<&str>) -> String {
    render_plain_value(value)
}

pub fn render_datetime_value(value: &EnumCellValue, format: Option<&str>) -> String {
    match (value, format) {
        (EnumCellValue::DateTime(dt), Some(c_fmt)) if !c_fmt.is_empty() => {
            dt.format(&convert_java_time_format(c_fmt)).to_string()
        }
        _ => render_plain_value(value),
    }
}

pub fn render_date_value(value: &EnumCellValue, format: Option<&str>) -> String {
    match (value, format) {
        (EnumCellValue::DateTime(dt), Some(c_fmt)) if !c_fmt.is_empty() => {
            dt.format(&convert_java_time_format(c_fmt)).to_string()
        }
        (EnumCellValue::DateTime(dt), _) => dt.format(C_FMT_DATE_DEFAULT).to_string(),
        _ => render_plain_value(value),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FieldConversions

/// Conversion from a record field into a cell value.
pub trait IntoCellValue {
    fn into_cell_value(&self) -> EnumCellValue;
}

/// Conversion from a coerced cell value back into a record field.
pub trait FromCellValue: Sized {
    fn from_cell_value(value: EnumCellValue) -> Result<Self, String>;
}

macro_rules! impl_cell_value_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoCellValue for $ty {
            fn into_cell_value(&self) -> EnumCellValue {
                i64::try_from(*self)
                    .map(EnumCellValue::Integer)
                    .unwrap_or_else(|_| EnumCellValue::Number(*self as f64))
            }
        }

        impl FromCellValue for $ty {
            fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
                let n_value = match value {
                    EnumCellValue::None => return Ok(0),
                    EnumCellValue::Integer(v) => v,
                    EnumCellValue::Number(v) if v.is_finite() && v.fract() == 0.0 => {
                        // Exclusive upper bound 2^bits, exact in f64.
                        let n_end = (<$ty>::MAX / 2 + 1) as f64 * 2.0;
                        if v < <$ty>::MIN as f64 || v >= n_end {
                            return Err(format!("{v} out of range for {}", stringify!($ty)));
                        }
                        return Ok(v as $ty);
                    }
                    EnumCellValue::Bool(v) => i64::from(v),
                    EnumCellValue::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|err| format!("{s:?} is not an integer: {err}"))?,
                    other => {
                        return Err(format!("Cannot convert {other:?} into {}", stringify!($ty)));
                    }
                };
                <$ty>::try_from(n_value).map_err(|err| format!("{n_value} out of range: {err}"))
            }
        }
    )*};
}

impl_cell_value_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_cell_value_float {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoCellValue for $ty {
            fn into_cell_value(&self) -> EnumCellValue {
                EnumCellValue::Number(f64::from(*self))
            }
        }

        impl FromCellValue for $ty {
            fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
                match value {
                    EnumCellValue::None => Ok(0.0),
                    EnumCellValue::Number(v) => Ok(v as $ty),
                    EnumCellValue::Integer(v) => Ok(v as $ty),
                    EnumCellValue::String(s) => s
                        .trim()
                        .parse::<$ty>()
                        .map_err(|err| format!("{s:?} is not a number: {err}")),
                    other => Err(format!("Cannot convert {other:?} into {}", stringify!($ty))),
                }
            }
        }
    )*};
}

impl_cell_value_float!(f32, f64);

impl IntoCellValue for String {
    fn into_cell_value(&self) -> EnumCellValue {
        EnumCellValue::String(self.clone())
    }
}

impl FromCellValue for String {
    fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
        match value {
            EnumCellValue::String(s) => Ok(s),
            other => Ok(render_plain_value(&other)),
        }
    }
}

impl IntoCellValue for bool {
    fn into_cell_value(&self) -> EnumCellValue {
        EnumCellValue::Bool(*self)
    }
}

impl FromCellValue for bool {
    fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
        match value {
            EnumCellValue::None => Ok(false),
            EnumCellValue::Bool(v) => Ok(v),
            EnumCellValue::Integer(v) => Ok(v != 0),
            EnumCellValue::String(s) => match parse_bool_text(&s, None)? {
                EnumCellValue::Bool(v) => Ok(v),
                _ => Err(format!("{s:?} is not a boolean")),
            },
            other => Err(format!("Cannot convert {other:?} into bool")),
        }
    }
}

impl IntoCellValue for NaiveDateTime {
    fn into_cell_value(&self) -> EnumCellValue {
        EnumCellValue::DateTime(*self)
    }
}

impl FromCellValue for NaiveDateTime {
    fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
        match value {
            EnumCellValue::None => Ok(NaiveDateTime::default()),
            EnumCellValue::DateTime(dt) => Ok(dt),
            EnumCellValue::Number(v) => convert_excel_serial_to_datetime(v)
                .ok_or_else(|| format!("{v} is not an Excel date serial")),
            EnumCellValue::String(s) => {
                parse_datetime_lenient(&s).ok_or_else(|| format!("{s:?} is not a date"))
            }
            other => Err(format!("Cannot convert {other:?} into a date-time")),
        }
    }
}

impl IntoCellValue for NaiveDate {
    fn into_cell_value(&self) -> EnumCellValue {
        EnumCellValue::DateTime(self.and_time(NaiveTime::MIN))
    }
}

impl FromCellValue for NaiveDate {
    fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
        NaiveDateTime::from_cell_value(value).map(|dt| dt.date())
    }
}

impl<T: IntoCellValue> IntoCellValue for Option<T> {
    fn into_cell_value(&self) -> EnumCellValue {
        match self {
            Some(v) => v.into_cell_value(),
            None => EnumCellValue::None,
        }
    }
}

impl<T: FromCellValue> FromCellValue for Option<T> {
    fn from_cell_value(value: EnumCellValue) -> Result<Self, String> {
        if value.is_none() {
            return Ok(None);
        }
        T::from_cell_value(value).map(Some)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
