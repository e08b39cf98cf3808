use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};
use thiserror::Error;

const PAGE_WIDTH_MM: f32 = 215.9;
const PAGE_HEIGHT_MM: f32 = 279.4;
const MARGIN_MM: f32 = 12.7;
const POINT_TO_MM: f32 = 0.3528;
const LAYER: &str = "content";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to render PDF: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    pub size: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub lines: Vec<Line>,
}

impl Page {
    pub fn heading(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line {
            text: text.into(),
            size: 16.0,
        });
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        for line in text.into().lines() {
            self.lines.push(Line {
                text: line.to_string(),
                size: 10.0,
            });
        }
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.text(" ")
    }

    /// Fixed-width grid; the first column is left-aligned, the rest right.
    pub fn grid(&mut self, rows: &[Vec<String>]) -> &mut Self {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![0usize; columns];
        for row in rows {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }
        for row in rows {
            let mut line = String::new();
            for (idx, cell) in row.iter().enumerate() {
                if idx == 0 {
                    line.push_str(&format!("{cell:<width$}", width = widths[idx]));
                } else {
                    line.push_str(&format!("  {cell:>width$}", width = widths[idx]));
                }
            }
            self.lines.push(Line {
                text: line,
                size: 9.0,
            });
        }
        self
    }
}

/// Letter-size text document set in a monospace face.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryDocument {
    pub title: String,
    pub pages: Vec<Page>,
}

impl SummaryDocument {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            pages: Vec::new(),
        }
    }

    pub fn page(&mut self) -> &mut Page {
        self.pages.push(Page::default());
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    pub fn render(&self) -> Result<Vec<u8>, RenderError> {
        let (doc, first_page, first_layer) =
            PdfDocument::new(&self.title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER);
        let font = doc
            .add_builtin_font(BuiltinFont::Courier)
            .map_err(|err| RenderError::Pdf(err.to_string()))?;

        let mut target = Some((first_page, first_layer));
        let mut page_number = 0usize;
        for page in &self.pages {
            let mut y = PAGE_HEIGHT_MM - MARGIN_MM;
            let mut layer = new_layer(&doc, &mut target);
            page_number += 1;
            for line in &page.lines {
                let step = line.size * POINT_TO_MM * 1.5;
                if y - step < MARGIN_MM * 2.0 {
                    footer(&layer, &font, &self.title, page_number);
                    layer = new_layer(&doc, &mut target);
                    page_number += 1;
                    y = PAGE_HEIGHT_MM - MARGIN_MM;
                }
                y -= step;
                layer.use_text(line.text.clone(), line.size, Mm(MARGIN_MM), Mm(y), &font);
            }
            footer(&layer, &font, &self.title, page_number);
        }

        doc.save_to_bytes()
            .map_err(|err| RenderError::Pdf(err.to_string()))
    }
}

fn new_layer(
    doc: &PdfDocumentReference,
    reserved: &mut Option<(printpdf::PdfPageIndex, printpdf::PdfLayerIndex)>,
) -> printpdf::PdfLayerReference {
    let (page, layer) = reserved
        .take()
        .unwrap_or_else(|| doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER));
    doc.get_page(page).get_layer(layer)
}

fn footer(layer: &printpdf::PdfLayerReference, font: &IndirectFontRef, title: &str, page: usize) {
    layer.use_text(
        format!("{title}    page {page}"),
        8.0,
        Mm(MARGIN_MM),
        Mm(MARGIN_MM / 2.0),
        font,
    );
}
