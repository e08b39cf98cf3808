use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::DataFrame;

use crate::frame::{rows, RowView};

const TABLE_OPEN: &str = "<table>";
const TH_OPEN: &str = "<th>";
const TD_OPEN: &str = "<td>";

const STYLED_TABLE: &str =
    r#"<table cellspacing="0" cellpadding="4" rules="rows" style="color:#1f2240;background-color:#ffffff">"#;
const HIGHLIGHT_TD: &str = r#"<td style="background-color: #FFFF00;">"#;

/// Styled replacements for the bare table openers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStyle {
    Centered,
    Left,
}

impl TableStyle {
    pub fn th(self) -> &'static str {
        match self {
            TableStyle::Centered => r#"<th style="text-align:center;border-bottom:thin;padding:10">"#,
            TableStyle::Left => r#"<th style="text-align:left;border-bottom:thin;padding:10">"#,
        }
    }

    pub fn td(self) -> &'static str {
        match self {
            TableStyle::Centered => r#"<td style="text-align:center;">"#,
            TableStyle::Left => r#"<td style="text-align:left;">"#,
        }
    }

    /// Second pass: only bare openers are replaced, so cells that already
    /// carry inline styles keep them.
    pub fn apply(self, content: &str) -> String {
        content
            .replace(TABLE_OPEN, STYLED_TABLE)
            .replace(TD_OPEN, self.td())
            .replace(TH_OPEN, self.th())
    }
}

/// Cell content. Templates use `{name}` placeholders resolved first against
/// the row's columns, then against the document's link variables; anything
/// unresolved renders empty.
#[derive(Debug, Clone)]
pub enum Cell {
    Field(&'static str),
    Template(String),
    Conditional {
        field: &'static str,
        present: String,
        absent: String,
    },
}

impl Cell {
    fn render(&self, row: &RowView<'_>, vars: &BTreeMap<String, String>) -> String {
        match self {
            Cell::Field(name) => row.get(name).unwrap_or_default(),
            Cell::Template(template) => fill(template, row, vars),
            Cell::Conditional {
                field,
                present,
                absent,
            } => {
                if row.get(field).is_some() {
                    fill(present, row, vars)
                } else {
                    fill(absent, row, vars)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub header: &'static str,
    pub cell: Cell,
}

impl ColumnSpec {
    pub fn new(header: &'static str, cell: Cell) -> Self {
        Self { header, cell }
    }

    pub fn field(header: &'static str, field: &'static str) -> Self {
        Self::new(header, Cell::Field(field))
    }
}

/// Rows whose `field` equals `value` use the highlighted row template.
#[derive(Debug, Clone)]
pub struct Highlight {
    pub field: &'static str,
    pub value: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct TableLayout {
    pub columns: Vec<ColumnSpec>,
    pub highlight: Option<Highlight>,
    /// Raw markup appended to a row (it supplies its own `<td>`); skipped
    /// when it renders empty.
    pub trailing: Option<Cell>,
}

impl TableLayout {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            highlight: None,
            trailing: None,
        }
    }

    pub fn with_highlight(mut self, field: &'static str, value: &'static str) -> Self {
        self.highlight = Some(Highlight { field, value });
        self
    }

    pub fn with_trailing(mut self, cell: Cell) -> Self {
        self.trailing = Some(cell);
        self
    }

    fn header_row(&self) -> String {
        let mut out = String::from("        <tr>\n");
        for column in &self.columns {
            out.push_str(&format!("            {TH_OPEN}{}</th>\n", column.header));
        }
        out.push_str("        </tr>\n");
        out
    }

    fn is_highlighted(&self, row: &RowView<'_>) -> bool {
        self.highlight
            .as_ref()
            .is_some_and(|h| row.get(h.field).as_deref() == Some(h.value))
    }

    fn data_row(&self, row: &RowView<'_>, vars: &BTreeMap<String, String>) -> String {
        let opener = if self.is_highlighted(row) {
            HIGHLIGHT_TD
        } else {
            TD_OPEN
        };
        let mut out = String::from("<tr>\n");
        for column in &self.columns {
            out.push_str(&format!("    {opener}{}</td>\n", column.cell.render(row, vars)));
        }
        if let Some(trailing) = &self.trailing {
            let extra = trailing.render(row, vars);
            if !extra.is_empty() {
                out.push_str(&format!("    {extra}\n"));
            }
        }
        out.push_str("</tr>\n");
        out
    }

    fn table<'a, I>(&self, rows: I, vars: &BTreeMap<String, String>) -> String
    where
        I: IntoIterator<Item = RowView<'a>>,
    {
        let mut out = format!("    {TABLE_OPEN}\n");
        out.push_str(&self.header_row());
        for row in rows {
            out.push_str(&self.data_row(&row, vars));
        }
        out.push_str("    </table><hr>\n");
        out
    }
}

fn fill(template: &str, row: &RowView<'_>, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        let value = row.get(name).or_else(|| vars.get(name).cloned());
        out.push_str(&value.unwrap_or_default());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// One self-contained HTML digest assembled from sections. Sections are
/// built with bare openers; `render` styles them in a single pass.
#[derive(Debug, Clone, Default)]
pub struct DigestDocument {
    sections: Vec<String>,
    vars: BTreeMap<String, String>,
}

impl DigestDocument {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self {
            sections: Vec::new(),
            vars,
        }
    }

    pub fn pending_section(&mut self, label: &str, layout: &TableLayout, df: &DataFrame) -> &mut Self {
        let mut section = format!("    <h3>{label}: {} Items Pending</h3>\n", df.height());
        section.push_str(&layout.table(rows(df), &self.vars));
        self.sections.push(section);
        self
    }

    /// A missing table renders as zero completed items.
    pub fn completed_section(&mut self, layout: &TableLayout, df: Option<&DataFrame>) -> &mut Self {
        let count = df.map(DataFrame::height).unwrap_or(0);
        let mut section = format!("    <h3> {count} Recently Completed Items</h3>\n");
        match df {
            Some(df) => section.push_str(&layout.table(rows(df), &self.vars)),
            None => section.push_str(&layout.table(std::iter::empty(), &self.vars)),
        }
        self.sections.push(section);
        self
    }

    /// Total header, then one table per distinct value of `group_by`, sorted.
    pub fn board(
        &mut self,
        title: &str,
        group_by: &str,
        layout: &TableLayout,
        df: &DataFrame,
    ) -> &mut Self {
        let mut section = format!(
            "    <h3>{title}: {} Total Items Pending</h3>\n    <hr>\n",
            df.height()
        );
        let groups: BTreeSet<String> = rows(df)
            .map(|row| row.get(group_by).unwrap_or_default())
            .collect();
        for group in groups {
            let members: Vec<RowView<'_>> = rows(df)
                .filter(|row| row.get(group_by).unwrap_or_default() == group)
                .collect();
            section.push_str(&format!("    <h3>{}: {}</h3>\n", members.len(), group));
            section.push_str(&layout.table(members, &self.vars));
        }
        self.sections.push(section);
        self
    }

    /// Single-record table without a count header.
    pub fn notice(&mut self, layout: &TableLayout, row: RowView<'_>) -> &mut Self {
        self.sections.push(layout.table([row], &self.vars));
        self
    }

    pub fn note(&mut self, text: &str) -> &mut Self {
        self.sections.push(format!("<p>{text}\n"));
        self
    }

    pub fn render(&self, style: TableStyle) -> String {
        let mut body = String::from("<!DOCTYPE html>\n<html><body>\n");
        for section in &self.sections {
            body.push_str(section);
        }
        body.push_str("</body></html>\n");
        style.apply(&body)
    }

    /// Plain-text fallback for mail clients without HTML.
    pub fn plain_text(&self) -> String {
        let html = self.render(TableStyle::Left);
        let mut text = String::with_capacity(html.len() / 2);
        let mut in_tag = false;
        for ch in html.chars() {
            match ch {
                '<' => in_tag = true,
                '>' => {
                    in_tag = false;
                    text.push(' ');
                }
                _ if !in_tag => text.push(ch),
                _ => {}
            }
        }
        text.replace("&nbsp;", " ")
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
