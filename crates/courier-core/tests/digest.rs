use std::collections::BTreeMap;

use courier_core::digest::{Cell, ColumnSpec, DigestDocument, TableLayout, TableStyle};
use courier_core::frame::frame_from_rows;
use polars::prelude::*;

fn vars() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("link_base".to_string(), "https://redcap.example.org".to_string()),
        ("pid".to_string(), "101".to_string()),
    ])
}

fn layout() -> TableLayout {
    TableLayout::new(vec![
        ColumnSpec::new(
            "Record",
            Cell::Template(r#"<a href="{link_base}/index.php?pid={pid}&id={record_id}">{record_id}</a>"#.into()),
        ),
        ColumnSpec::field("Study", "study"),
    ])
}

fn frame(rows: &[(&str, Option<&str>, Option<&str>)]) -> PolarsResult<DataFrame> {
    let cells: Vec<Vec<Option<String>>> = rows
        .iter()
        .map(|(id, study, urg)| {
            vec![
                Some(id.to_string()),
                study.map(str::to_string),
                urg.map(str::to_string),
            ]
        })
        .collect();
    frame_from_rows(&["record_id", "study", "urg"], &cells)
}

fn data_rows(html: &str) -> usize {
    // Every table has exactly one header row.
    html.matches("<tr>").count() - html.matches("<table").count()
}

#[test]
fn empty_pending_table_still_renders() -> PolarsResult<()> {
    let mut doc = DigestDocument::new(vars());
    doc.pending_section("Clinician", &layout(), &frame(&[])?)
        .completed_section(&layout(), None);

    let html = doc.render(TableStyle::Centered);
    assert!(html.contains("Clinician: 0 Items Pending"));
    assert!(html.contains(" 0 Recently Completed Items"));
    assert_eq!(data_rows(&html), 0);
    assert!(html.contains("<th style=\"text-align:center;border-bottom:thin;padding:10\">Record</th>"));
    Ok(())
}

#[test]
fn templates_resolve_row_values_then_link_vars() -> PolarsResult<()> {
    let mut doc = DigestDocument::new(vars());
    doc.pending_section("All", &layout(), &frame(&[("12", Some("MIND"), None)])?);

    let html = doc.render(TableStyle::Left);
    assert!(html.contains(
        r#"<a href="https://redcap.example.org/index.php?pid=101&id=12">12</a>"#
    ));
    assert!(html.contains("<td style=\"text-align:left;\">MIND</td>"));
    assert_eq!(data_rows(&html), 1);
    Ok(())
}

#[test]
fn highlighted_rows_keep_their_inline_style() -> PolarsResult<()> {
    let layout = layout().with_highlight("urg", "Yes");
    let mut doc = DigestDocument::new(vars());
    doc.pending_section(
        "All",
        &layout,
        &frame(&[("1", Some("AHEAD"), Some("Yes")), ("2", Some("CHAMP"), Some("No"))])?,
    );

    let html = doc.render(TableStyle::Left);
    assert!(html.contains("<td style=\"background-color: #FFFF00;\">AHEAD</td>"));
    assert!(html.contains("<td style=\"text-align:left;\">CHAMP</td>"));
    Ok(())
}

#[test]
fn trailing_cell_is_skipped_when_empty() -> PolarsResult<()> {
    let layout = layout().with_trailing(Cell::Conditional {
        field: "urg",
        present: "<td>flag {urg}</td>".into(),
        absent: String::new(),
    });
    let mut doc = DigestDocument::new(vars());
    doc.pending_section(
        "All",
        &layout,
        &frame(&[("1", Some("AHEAD"), Some("Yes")), ("2", Some("CHAMP"), None)])?,
    );

    let html = doc.render(TableStyle::Left);
    assert_eq!(html.matches("flag Yes").count(), 1);
    assert_eq!(html.matches("<td style=\"text-align:left;\">").count(), 5);
    Ok(())
}

#[test]
fn board_groups_rows_by_sorted_value() -> PolarsResult<()> {
    let df = frame(&[
        ("1", Some("MIND"), Some("Yes")),
        ("2", Some("AHEAD"), None),
        ("3", Some("MIND"), None),
    ])?;
    let mut doc = DigestDocument::new(vars());
    doc.board("CCM Tracking", "study", &layout(), &df)
        .note("Unverified only.");

    let html = doc.render(TableStyle::Left);
    assert!(html.contains("CCM Tracking: 3 Total Items Pending"));
    let ahead = html.find("<h3>1: AHEAD</h3>").expect("AHEAD group");
    let mind = html.find("<h3>2: MIND</h3>").expect("MIND group");
    assert!(ahead < mind);
    assert_eq!(data_rows(&html), 3);
    assert!(html.contains("<p>Unverified only."));
    Ok(())
}

#[test]
fn plain_text_strips_markup() -> PolarsResult<()> {
    let mut doc = DigestDocument::new(vars());
    doc.pending_section("Clinician", &layout(), &frame(&[("5", Some("NOVO"), None)])?);

    let text = doc.plain_text();
    assert!(text.contains("Clinician: 1 Items Pending"));
    assert!(text.contains("NOVO"));
    assert!(!text.contains('<'));
    Ok(())
}

#[test]
fn style_only_replaces_bare_openers() {
    let styled = TableStyle::Centered.apply("<table><th>A</th><td>x</td><td style=\"color:red\">y</td>");
    assert!(styled.starts_with("<table cellspacing=\"0\""));
    assert!(styled.contains("<td style=\"text-align:center;\">x</td>"));
    assert!(styled.contains("<td style=\"color:red\">y</td>"));
}
