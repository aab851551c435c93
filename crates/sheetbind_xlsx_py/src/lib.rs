use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use pyo3::IntoPyObjectExt;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyAny, PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString};
use sheetbind_xlsx::conf::derive_default_bind_options;
use sheetbind_xlsx::{
    BindError, DynRecord, EnumCellValue, EnumDocumentSource, EnumFieldType, EnumMergeMode,
    EnumTitleMatch, SpecBindReport, SpecField, SpecSchema, SpecSheetMeta, SpecWriteOptions,
    XlsxBinder as RsXlsxBinder, parse_placeholder as rs_parse_placeholder,
};

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "sheetbind.xlsx.binder.v1";

#[pyclass(name = "XlsxBinder", unsendable)]
struct PyXlsxBinder {
    inner: RsXlsxBinder,
}

#[pymethods]
impl PyXlsxBinder {
    #[new]
    #[pyo3(signature = (
        template = None,
        input = None,
        validations = None,
        title_match = "contain",
        rows_title_scan_max = None,
        template_marker = None,
        rows_template_fallback = None,
        if_placeholder = false
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        template: Option<&Bound<'_, PyAny>>,
        input: Option<&Bound<'_, PyAny>>,
        validations: Option<BTreeMap<String, Vec<String>>>,
        title_match: &str,
        rows_title_scan_max: Option<usize>,
        template_marker: Option<String>,
        rows_template_fallback: Option<usize>,
        if_placeholder: bool,
    ) -> PyResult<Self> {
        let mut options = derive_default_bind_options();
        options.template = parse_document_source(template)?;
        options.input = parse_document_source(input)?;
        options.validations = validations.unwrap_or_default();
        options.title_match = parse_rule_title_match(title_match)?;
        if let Some(v) = rows_title_scan_max {
            options.n_rows_title_scan_max = v;
        }
        if let Some(v) = template_marker {
            options.template_marker = v;
        }
        if let Some(v) = rows_template_fallback {
            options.n_rows_template_fallback = v;
        }
        options.if_placeholder = if_placeholder;

        let inner = RsXlsxBinder::new(options).map_err(convert_bind_error)?;
        Ok(Self { inner })
    }

    fn __enter__(slf: PyRefMut<'_, Self>) -> PyRefMut<'_, Self> {
        slf
    }

    #[pyo3(signature = (_exc_type=None, _exc=None, _tb=None))]
    fn __exit__(
        &mut self,
        _exc_type: Option<&Bound<'_, PyAny>>,
        _exc: Option<&Bound<'_, PyAny>>,
        _tb: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        self.inner.close();
    }

    #[getter]
    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn sheet_names(&self) -> PyResult<Vec<String>> {
        self.inner.sheet_names().map_err(convert_bind_error)
    }

    fn report(&self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let mut l_report_obj = Vec::new();
        for report in self.inner.report() {
            l_report_obj.push(create_report_object(py, &report)?);
        }
        Ok(PyList::new(py, l_report_obj)?.into_any().unbind())
    }

    /// Write dict records; `fields` is a list of field dicts using the tag names.
    #[pyo3(signature = (records, fields, sheet = None, write_title = false, sheet_name = None, merge = None))]
    #[allow(clippy::too_many_arguments)]
    fn write<'py>(
        &mut self,
        py: Python<'py>,
        records: &Bound<'py, PyAny>,
        fields: &Bound<'py, PyAny>,
        sheet: Option<String>,
        write_title: bool,
        sheet_name: Option<String>,
        merge: Option<&str>,
    ) -> PyResult<Py<PyAny>> {
        let meta = SpecSheetMeta {
            sheet,
            if_write_title: write_title,
            ..SpecSheetMeta::default()
        };
        let schema = parse_schema(fields, meta)?;
        let l_records = parse_records(records, &schema)?;
        let write_options = SpecWriteOptions {
            sheet_name,
            merge_mode: parse_rule_merge_mode(merge)?,
        };

        let report = self
            .inner
            .write_records_with_schema(&schema, &l_records, &write_options)
            .map_err(convert_bind_error)?;
        create_report_object(py, &report)
    }

    /// Interpolate one dict record into the placeholder cells of a sheet.
    #[pyo3(signature = (record, fields, sheet = None))]
    fn write_placeholder<'py>(
        &mut self,
        py: Python<'py>,
        record: &Bound<'py, PyAny>,
        fields: &Bound<'py, PyAny>,
        sheet: Option<String>,
    ) -> PyResult<Py<PyAny>> {
        let meta = SpecSheetMeta {
            sheet,
            ..SpecSheetMeta::default().as_placeholder()
        };
        let schema = parse_schema(fields, meta)?;
        let record = parse_record(record, &schema)?;

        let report = self
            .inner
            .write_records_with_schema(&schema, &[record], &SpecWriteOptions::default())
            .map_err(convert_bind_error)?;
        create_report_object(py, &report)
    }

    #[pyo3(signature = (fields, sheet = None, ignore_empty_rows = true))]
    fn read<'py>(
        &self,
        py: Python<'py>,
        fields: &Bound<'py, PyAny>,
        sheet: Option<String>,
        ignore_empty_rows: bool,
    ) -> PyResult<Py<PyAny>> {
        let meta = SpecSheetMeta {
            sheet,
            ..SpecSheetMeta::default().ignore_empty_rows(ignore_empty_rows)
        };
        let schema = parse_schema(fields, meta)?;

        let l_records: Vec<DynRecord> = self
            .inner
            .read_records_with_schema(&schema)
            .map_err(convert_bind_error)?;
        let mut l_record_obj = Vec::with_capacity(l_records.len());
        for record in &l_records {
            l_record_obj.push(create_record_object(py, record, &schema)?);
        }
        Ok(PyList::new(py, l_record_obj)?.into_any().unbind())
    }

    #[pyo3(signature = (fields, sheet = None))]
    fn read_placeholder<'py>(
        &self,
        py: Python<'py>,
        fields: &Bound<'py, PyAny>,
        sheet: Option<String>,
    ) -> PyResult<Py<PyAny>> {
        let meta = SpecSheetMeta {
            sheet,
            ..SpecSheetMeta::default().as_placeholder()
        };
        let schema = parse_schema(fields, meta)?;

        let record: DynRecord = self
            .inner
            .read_placeholder_with_schema(&schema)
            .map_err(convert_bind_error)?;
        create_record_object(py, &record, &schema)
    }

    fn save_to_file(&self, file_out: PathBuf) -> PyResult<()> {
        self.inner.save_to_file(&file_out).map_err(convert_bind_error)
    }

    fn to_bytes<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyBytes>> {
        let v_bytes = self.inner.to_bytes().map_err(convert_bind_error)?;
        Ok(PyBytes::new(py, &v_bytes))
    }
}

#[pyfunction]
fn parse_placeholder(content: &str) -> Vec<String> {
    rs_parse_placeholder(content)
        .var_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[pyfunction]
fn interpolate(content: &str, vars: BTreeMap<String, String>) -> String {
    rs_parse_placeholder(content).interpolate(&vars)
}

/// `None` when `observed` does not follow the literal parts of `content`.
#[pyfunction]
fn extract_vars(content: &str, observed: &str) -> Option<BTreeMap<String, String>> {
    rs_parse_placeholder(content).extract_vars(observed)
}

fn convert_bind_error(err: BindError) -> PyErr {
    match err {
        BindError::Io(_) => PyRuntimeError::new_err(err.to_string()),
        _ => PyValueError::new_err(err.to_string()),
    }
}

/// Path-like, `bytes`, or a binary file object with `read()`.
fn parse_document_source(obj: Option<&Bound<'_, PyAny>>) -> PyResult<Option<EnumDocumentSource>> {
    let Some(obj) = obj else {
        return Ok(None);
    };
    if obj.is_none() {
        return Ok(None);
    }
    if let Ok(v_bytes) = obj.downcast::<PyBytes>() {
        return Ok(Some(EnumDocumentSource::Bytes(v_bytes.as_bytes().to_vec())));
    }
    if obj.hasattr("read")? {
        let obj_content = obj.call_method0("read")?;
        let v_bytes = obj_content.downcast::<PyBytes>().map_err(|_| {
            PyValueError::new_err("Document reader must return `bytes`.")
        })?;
        return Ok(Some(EnumDocumentSource::Bytes(v_bytes.as_bytes().to_vec())));
    }
    Ok(Some(EnumDocumentSource::Path(obj.extract::<PathBuf>()?)))
}

fn parse_rule_title_match(value: &str) -> PyResult<EnumTitleMatch> {
    match value.trim().to_ascii_lowercase().as_str() {
        "contain" => Ok(EnumTitleMatch::Contain),
        "equal" => Ok(EnumTitleMatch::Equal),
        _ => Err(PyValueError::new_err(format!(
            "Invalid title_match {value:?}. Expected one of: contain, equal."
        ))),
    }
}

fn parse_rule_merge_mode(value: Option<&str>) -> PyResult<EnumMergeMode> {
    let Some(value) = value else {
        return Ok(EnumMergeMode::None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(EnumMergeMode::None),
        "merge_cols" => Ok(EnumMergeMode::MergeCols),
        "merge_cols_align" => Ok(EnumMergeMode::MergeColsAlign),
        _ => Err(PyValueError::new_err(format!(
            "Invalid merge {value:?}. Expected one of: none, merge_cols, merge_cols_align."
        ))),
    }
}

/// Build a schema from a list of field dicts.
///
/// Keys: `name` (required), `type`, `title`, `format`, `dataValidation`,
/// `placeholder`, `placeholderCell`, `omiterr`. A `placeholder` of `False` keeps
/// the field out of interpolation.
fn parse_schema(fields: &Bound<'_, PyAny>, meta: SpecSheetMeta) -> PyResult<SpecSchema> {
    let mut l_fields = Vec::new();
    for obj_field in fields.try_iter()? {
        let obj_field = obj_field?;
        let dict_field = obj_field
            .downcast::<PyDict>()
            .map_err(|_| PyValueError::new_err("Each field must be a dict."))?;

        let c_name: String = extract_optional_item(dict_field, "name")?
            .ok_or_else(|| PyValueError::new_err("Field dict requires `name`."))?;
        let c_type: String =
            extract_optional_item(dict_field, "type")?.unwrap_or_else(|| "string".to_string());
        let field_type = EnumFieldType::from_tag(&c_type).ok_or_else(|| {
            PyValueError::new_err(format!("Unknown type {c_type:?} on field {c_name:?}."))
        })?;

        let mut field = SpecField::new(c_name, field_type);
        field.title = extract_optional_item(dict_field, "title")?;
        field.format = extract_optional_item(dict_field, "format")?;
        field.data_validation = extract_optional_item(dict_field, "dataValidation")?;
        field.placeholder_cell = extract_optional_item(dict_field, "placeholderCell")?;
        field.if_omit_err = extract_optional_item(dict_field, "omiterr")?.unwrap_or(false);
        if let Some(obj_placeholder) = dict_field.get_item("placeholder")? {
            if obj_placeholder.is_instance_of::<PyBool>() {
                field.if_placeholder = obj_placeholder.extract::<bool>()?;
            } else if !obj_placeholder.is_none() {
                field.placeholder = Some(obj_placeholder.extract::<String>()?);
            }
        }
        l_fields.push(field);
    }
    Ok(SpecSchema::new(meta, l_fields))
}

fn parse_records(records: &Bound<'_, PyAny>, schema: &SpecSchema) -> PyResult<Vec<DynRecord>> {
    let mut l_records = Vec::new();
    for obj_record in records.try_iter()? {
        l_records.push(parse_record(&obj_record?, schema)?);
    }
    Ok(l_records)
}

/// Dict record to [`DynRecord`]; keys outside the schema are ignored.
fn parse_record(record: &Bound<'_, PyAny>, schema: &SpecSchema) -> PyResult<DynRecord> {
    let dict_record = record
        .downcast::<PyDict>()
        .map_err(|_| PyValueError::new_err("Each record must be a dict."))?;
    let mut out = DynRecord::new();
    for field in &schema.fields {
        let value = match dict_record.get_item(field.name.as_str())? {
            Some(obj_value) => parse_cell_value(&obj_value, field)?,
            None => EnumCellValue::None,
        };
        out.insert(field.name.clone(), value);
    }
    Ok(out)
}

fn parse_cell_value(obj: &Bound<'_, PyAny>, field: &SpecField) -> PyResult<EnumCellValue> {
    if obj.is_none() {
        return Ok(EnumCellValue::None);
    }
    // `bool` is a subclass of `int`.
    if obj.is_instance_of::<PyBool>() {
        return Ok(EnumCellValue::Bool(obj.extract()?));
    }
    if obj.is_instance_of::<PyInt>() {
        return Ok(EnumCellValue::Integer(obj.extract()?));
    }
    if obj.is_instance_of::<PyFloat>() {
        return Ok(EnumCellValue::Number(obj.extract()?));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(EnumCellValue::String(obj.extract()?));
    }
    if let Ok(dt) = obj.extract::<NaiveDateTime>() {
        return Ok(EnumCellValue::DateTime(dt));
    }
    if let Ok(d) = obj.extract::<NaiveDate>() {
        return Ok(EnumCellValue::DateTime(d.and_time(chrono::NaiveTime::MIN)));
    }
    Err(PyValueError::new_err(format!(
        "Unsupported value type `{}` for field {:?}.",
        obj.get_type().name()?,
        field.name
    )))
}

fn create_cell_value_object(
    py: Python<'_>,
    value: &EnumCellValue,
    field: &SpecField,
) -> PyResult<Py<PyAny>> {
    match value {
        EnumCellValue::None => Ok(py.None()),
        EnumCellValue::String(v) => v.as_str().into_py_any(py),
        EnumCellValue::Integer(v) => (*v).into_py_any(py),
        EnumCellValue::Number(v) => (*v).into_py_any(py),
        EnumCellValue::Bool(v) => (*v).into_py_any(py),
        EnumCellValue::DateTime(dt) if field.field_type == EnumFieldType::Date => {
            dt.date().into_py_any(py)
        }
        EnumCellValue::DateTime(dt) => (*dt).into_py_any(py),
    }
}

/// One dict per record with every schema field as a key.
fn create_record_object(
    py: Python<'_>,
    record: &DynRecord,
    schema: &SpecSchema,
) -> PyResult<Py<PyAny>> {
    let dict_record = PyDict::new(py);
    for field in &schema.fields {
        let obj_value = match record.get(&field.name) {
            Some(value) => create_cell_value_object(py, value, field)?,
            None => py.None(),
        };
        dict_record.set_item(field.name.as_str(), obj_value)?;
    }
    Ok(dict_record.into_any().unbind())
}

fn create_report_object(py: Python<'_>, report: &SpecBindReport) -> PyResult<Py<PyAny>> {
    let dict_report = PyDict::new(py);
    dict_report.set_item("sheet_name", report.sheet_name.as_str())?;
    dict_report.set_item("row_title", report.row_title)?;
    dict_report.set_item("n_rows_written", report.n_rows_written)?;
    let l_merges: Vec<String> = report.merges.iter().map(|m| m.range_ref()).collect();
    dict_report.set_item("merges", l_merges)?;
    dict_report.set_item("warnings", report.warnings.clone())?;
    Ok(dict_report.into_any().unbind())
}

fn extract_optional_item<T>(dict: &Bound<'_, PyDict>, key: &str) -> PyResult<Option<T>>
where
    for<'a> T: FromPyObject<'a>,
{
    match dict.get_item(key)? {
        Some(val) if !val.is_none() => Ok(Some(val.extract::<T>()?)),
        _ => Ok(None),
    }
}

#[pymodule]
fn _sheetbind_xlsx_rs(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyXlsxBinder>()?;
    module.add_function(wrap_pyfunction!(parse_placeholder, module)?)?;
    module.add_function(wrap_pyfunction!(interpolate, module)?)?;
    module.add_function(wrap_pyfunction!(extract_vars, module)?)?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    Ok(())
}
