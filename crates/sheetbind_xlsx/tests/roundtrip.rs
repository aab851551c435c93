use chrono::{NaiveDate, NaiveDateTime};
use sheetbind_xlsx::{
    BindError, EnumDocumentSource, SpecBindOptions, SpecSheetMeta, SpecWriteOptions, XlsxBinder,
    XlsxBook, impl_record,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct MemberStat {
    total: i64,
    new: i64,
    effective: i64,
}

impl_record!(MemberStat, SpecSheetMeta::default().sheet("会员"), {
    total: Integer => |f| f.title("会员总数"),
    new: Integer => |f| f.title("其中：新增"),
    effective: Integer => |f| f.title("其中：有效"),
});

#[derive(Debug, Default, Clone, PartialEq)]
struct Visit {
    day: NaiveDate,
    checked_at: NaiveDateTime,
    ok: bool,
    ratio: f64,
    note: Option<String>,
}

impl_record!(Visit, SpecSheetMeta::default().sheet("visits").write_title(), {
    day: Date,
    checked_at: DateTime => |f| f.format("yyyy-MM-dd HH:mm:ss"),
    ok: Bool,
    ratio: Float,
    note: String,
});

#[derive(Debug, Default, Clone, PartialEq)]
struct Ticket {
    serial: u64,
    seats: u8,
}

impl_record!(Ticket, SpecSheetMeta::default().sheet("tickets").write_title(), {
    serial: Integer,
    seats: Integer,
});

#[derive(Debug, Default, Clone, PartialEq)]
struct Registration {
    date: String,
    name: String,
    mobile: String,
    code: i64,
}

impl_record!(Registration, SpecSheetMeta::default().sheet("登记").as_placeholder(), {
    date: String,
    name: String => |f| f.placeholder("contact"),
    mobile: String,
    code: Integer => |f| f.placeholder_cell("D5").skip_placeholder(),
});

fn derive_members() -> Vec<MemberStat> {
    vec![
        MemberStat {
            total: 100,
            new: 50,
            effective: 50,
        },
        MemberStat {
            total: 200,
            new: 60,
            effective: 140,
        },
    ]
}

fn open_input(v_bytes: Vec<u8>) -> XlsxBinder {
    XlsxBinder::new(SpecBindOptions {
        input: Some(EnumDocumentSource::Bytes(v_bytes)),
        ..SpecBindOptions::default()
    })
    .unwrap()
}

/// Sheet `会员`: a report title in row 1, the header in row 2 and
/// `n_templates` marked template rows, each with its own number format.
fn create_member_template(n_templates: u32) -> Vec<u8> {
    let mut book = XlsxBook::new_empty();
    let n_sheet = book.create_sheet("会员").unwrap();
    book.set_text(n_sheet, 1, 1, "会员统计月报").unwrap();
    for (n_col, c_title) in [(1, "会员总数"), (2, "其中：新增"), (3, "其中：有效")] {
        book.set_text(n_sheet, n_col, 2, c_title).unwrap();
    }
    for n_idx in 0..n_templates {
        let n_row = 3 + n_idx;
        book.set_text(n_sheet, 1, n_row, "template").unwrap();
        for n_col in 1..=3 {
            book.set_number_format(n_sheet, n_col, n_row, &format!("0.{}", "0".repeat(n_idx as usize + 1)))
                .unwrap();
        }
    }
    book.to_bytes().unwrap()
}

#[test]
fn member_stats_round_trip_through_fresh_workbook() {
    let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
    let report = binder.write(&derive_members()).unwrap();
    assert_eq!(report.sheet_name, "会员");
    assert_eq!(report.row_title, Some(1));
    assert_eq!(report.n_rows_written, 2);

    let mut binder_in = open_input(binder.to_bytes().unwrap());
    assert_eq!(binder_in.read::<MemberStat>().unwrap(), derive_members());
}

#[test]
fn template_rows_receive_records_and_leftovers_are_truncated() {
    let options = SpecBindOptions {
        template: Some(EnumDocumentSource::Bytes(create_member_template(3))),
        ..SpecBindOptions::default()
    };
    let mut binder = XlsxBinder::new(options).unwrap();
    let l_members = vec![derive_members()[0].clone()];
    let report = binder.write(&l_members).unwrap();
    assert_eq!(report.row_title, Some(2));
    assert!(report.warnings.is_empty());

    let v_bytes = binder.to_bytes().unwrap();
    let book = XlsxBook::open(&EnumDocumentSource::Bytes(v_bytes.clone())).unwrap();
    assert_eq!(book.get_text(0, 1, 1).unwrap(), "会员统计月报");
    assert_eq!(book.get_text(0, 1, 3).unwrap(), "100");
    assert_eq!(book.get_text(0, 1, 4).unwrap(), "");

    let mut binder_in = open_input(v_bytes);
    assert_eq!(binder_in.read::<MemberStat>().unwrap(), l_members);
}

#[test]
fn template_styles_repeat_with_template_period() {
    let options = SpecBindOptions {
        template: Some(EnumDocumentSource::Bytes(create_member_template(2))),
        ..SpecBindOptions::default()
    };
    let mut binder = XlsxBinder::new(options).unwrap();
    let l_members: Vec<MemberStat> = (0..7)
        .map(|n| MemberStat {
            total: n,
            new: n,
            effective: n,
        })
        .collect();
    binder.write(&l_members).unwrap();

    let book = XlsxBook::open(&EnumDocumentSource::Bytes(binder.to_bytes().unwrap())).unwrap();
    for n_record in 1..=7u32 {
        let c_expected = if n_record % 2 == 1 { "0.0" } else { "0.00" };
        assert_eq!(
            book.get_number_format(0, 2, 2 + n_record).unwrap().as_deref(),
            Some(c_expected),
            "record {n_record}"
        );
    }
}

#[test]
fn sheet_override_derives_new_sheet_from_template() {
    let options = SpecBindOptions {
        template: Some(EnumDocumentSource::Bytes(create_member_template(1))),
        ..SpecBindOptions::default()
    };
    let mut binder = XlsxBinder::new(options).unwrap();
    let write_options = SpecWriteOptions {
        sheet_name: Some("二月".to_string()),
        ..SpecWriteOptions::default()
    };
    let report = binder.write_with_options(&derive_members(), &write_options).unwrap();
    assert_eq!(report.sheet_name, "二月");
    assert_eq!(binder.sheet_names().unwrap(), vec!["会员", "二月"]);

    let book = XlsxBook::open(&EnumDocumentSource::Bytes(binder.to_bytes().unwrap())).unwrap();
    let n_sheet = book.find_sheet("二月").unwrap();
    assert_eq!(book.get_text(n_sheet, 1, 2).unwrap(), "会员总数");
    assert_eq!(book.get_text(n_sheet, 1, 3).unwrap(), "100");
    assert_eq!(book.get_text(n_sheet, 1, 4).unwrap(), "200");
    assert_eq!(
        book.get_number_format(n_sheet, 2, 4).unwrap().as_deref(),
        Some("0.0")
    );
    // The template sheet itself is untouched.
    assert_eq!(book.get_text(0, 1, 3).unwrap(), "template");
}

#[test]
fn typed_fields_round_trip() {
    let day = NaiveDate::from_ymd_opt(2020, 4, 8).unwrap();
    let l_visits = vec![
        Visit {
            day,
            checked_at: day.and_hms_opt(10, 30, 0).unwrap(),
            ok: true,
            ratio: 0.5,
            note: Some("首访".to_string()),
        },
        Visit {
            day: day.succ_opt().unwrap(),
            checked_at: day.and_hms_opt(23, 59, 59).unwrap(),
            ok: false,
            ratio: 2.0,
            note: None,
        },
    ];

    let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
    binder.write(&l_visits).unwrap();
    let mut binder_in = open_input(binder.to_bytes().unwrap());
    assert_eq!(binder_in.read::<Visit>().unwrap(), l_visits);
}

#[test]
fn unsigned_serials_above_i64_round_trip() {
    let l_tickets = vec![
        Ticket {
            serial: 1 << 63,
            seats: 2,
        },
        Ticket {
            serial: 42,
            seats: 255,
        },
    ];
    let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
    binder.write(&l_tickets).unwrap();

    let v_bytes = binder.to_bytes().unwrap();
    let book = XlsxBook::open(&EnumDocumentSource::Bytes(v_bytes.clone())).unwrap();
    assert!(!book.get_text(0, 1, 2).unwrap().starts_with('-'));

    let mut binder_in = open_input(v_bytes);
    assert_eq!(binder_in.read::<Ticket>().unwrap(), l_tickets);
}

#[test]
fn coercion_failure_aborts_read() {
    let mut book = XlsxBook::new_empty();
    let n_sheet = book.create_sheet("会员").unwrap();
    for (n_col, c_title) in [(1, "会员总数"), (2, "其中：新增"), (3, "其中：有效")] {
        book.set_text(n_sheet, n_col, 1, c_title).unwrap();
    }
    book.set_text(n_sheet, 1, 2, "many").unwrap();

    let mut binder_in = open_input(book.to_bytes().unwrap());
    match binder_in.read::<MemberStat>() {
        Err(BindError::Coercion { field, cell, .. }) => {
            assert_eq!(field, "total");
            assert_eq!(cell, "A2");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn placeholder_write_then_read_back() {
    let mut book = XlsxBook::new_empty();
    let n_sheet = book.create_sheet("登记").unwrap();
    book.set_text(n_sheet, 1, 1, "登记日期：{{date}}").unwrap();
    book.set_text(n_sheet, 1, 2, "联系人：{{ contact }}（{{mobile}}）").unwrap();
    book.set_text(n_sheet, 1, 3, "固定文本").unwrap();
    let v_template = book.to_bytes().unwrap();

    let mut binder = XlsxBinder::new(SpecBindOptions {
        template: Some(EnumDocumentSource::Bytes(v_template.clone())),
        ..SpecBindOptions::default()
    })
    .unwrap();
    let first = Registration {
        date: "2020-04-08".to_string(),
        name: "张三".to_string(),
        mobile: "1234567890".to_string(),
        code: 42,
    };
    let second = Registration {
        date: "2021-01-01".to_string(),
        name: "隔壁老王".to_string(),
        mobile: "13900000000".to_string(),
        code: 7,
    };
    binder.write(std::slice::from_ref(&first)).unwrap();
    binder.write(std::slice::from_ref(&second)).unwrap();
    let v_output = binder.to_bytes().unwrap();

    let book_out = XlsxBook::open(&EnumDocumentSource::Bytes(v_output.clone())).unwrap();
    assert_eq!(book_out.get_text(0, 1, 1).unwrap(), "登记日期：2021-01-01");
    assert_eq!(
        book_out.get_text(0, 1, 2).unwrap(),
        "联系人：隔壁老王（13900000000）"
    );
    assert_eq!(book_out.get_text(0, 1, 3).unwrap(), "固定文本");
    assert_eq!(book_out.get_text(0, 4, 5).unwrap(), "7");

    let mut binder_in = XlsxBinder::new(SpecBindOptions {
        template: Some(EnumDocumentSource::Bytes(v_template)),
        input: Some(EnumDocumentSource::Bytes(v_output)),
        ..SpecBindOptions::default()
    })
    .unwrap();
    assert_eq!(binder_in.read_placeholder::<Registration>().unwrap(), second);
}

#[test]
fn save_to_file_and_reopen_from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path_out = dir.path().join("members.xlsx");

    let mut binder = XlsxBinder::new(SpecBindOptions::default()).unwrap();
    binder.write(&derive_members()).unwrap();
    binder.save_to_file(&path_out).unwrap();
    binder.close();
    assert!(path_out.exists());

    let mut binder_in = XlsxBinder::new(SpecBindOptions {
        input: Some(EnumDocumentSource::Path(path_out)),
        ..SpecBindOptions::default()
    })
    .unwrap();
    assert_eq!(binder_in.read::<MemberStat>().unwrap(), derive_members());

    let mut v_buffer = Vec::new();
    binder_in.save(&mut v_buffer).unwrap();
    assert!(v_buffer.starts_with(b"PK"));
}
