use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point};

use crate::model::{Dataset, StatusSummary};

use super::{truncate_cell, RenderError, RenderResult};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const TOP_MARGIN_MM: f32 = 270.0;
const BOTTOM_MARGIN_MM: f32 = 20.0;
const ROW_HEIGHT_MM: f32 = 7.0;

const SUMMARY_MAX_CHARS: usize = 45;
const ASSIGNEE_MAX_CHARS: usize = 20;

// Column start positions: Key, Summary, Type, Priority, Assignee, Status.
const COLUMNS: [f32; 6] = [12.0, 38.0, 104.0, 132.0, 154.0, 186.0];
const HEADERS: [&str; 6] = ["Key", "Summary", "Type", "Priority", "Assignee", "Status"];

/// Render the dataset as a paginated A4 PDF using the built-in Helvetica
/// faces. Long free-text cells are truncated for column width only; every row
/// is emitted in source order.
pub fn render_pdf(
    dataset: &Dataset,
    summary: &StatusSummary,
    generated_at: DateTime<Utc>,
) -> RenderResult<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        "RTM Test Execution Report",
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(to_pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(to_pdf_error)?;

    let mut layer_ref = doc.get_page(page).get_layer(layer);
    let mut y = 285.0;

    layer_ref.use_text(
        "RTM Test Execution Report",
        14.0,
        Mm(COLUMNS[0]),
        Mm(y),
        &bold,
    );
    y -= 7.0;
    layer_ref.use_text(
        format!(
            "Execution: {} ({})  |  Generated on: {}",
            dataset.execution.execution_key,
            dataset.execution.project_key,
            generated_at.format("%Y-%m-%d %H:%M:%S")
        ),
        9.0,
        Mm(COLUMNS[0]),
        Mm(y),
        &regular,
    );
    y -= 6.0;
    layer_ref.use_text(
        format!(
            "Total Issues: {}  |  Status Breakdown: {}",
            summary.total(),
            summary
        ),
        9.0,
        Mm(COLUMNS[0]),
        Mm(y),
        &regular,
    );
    y -= 9.0;

    write_header_row(&layer_ref, &bold, y);
    y -= ROW_HEIGHT_MM;

    for row in &dataset.issues {
        if y < BOTTOM_MARGIN_MM {
            let (new_page, new_layer) =
                doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            layer_ref = doc.get_page(new_page).get_layer(new_layer);
            y = TOP_MARGIN_MM;
            write_header_row(&layer_ref, &bold, y);
            y -= ROW_HEIGHT_MM;
        }
        let cells = [
            row.key.clone(),
            truncate_cell(&row.summary, SUMMARY_MAX_CHARS),
            truncate_cell(&row.issue_type, SUMMARY_MAX_CHARS),
            row.priority.clone(),
            truncate_cell(&row.assignee, ASSIGNEE_MAX_CHARS),
            row.status.clone(),
        ];
        for (idx, cell) in cells.iter().enumerate() {
            layer_ref.use_text(cell.as_str(), 8.0, Mm(COLUMNS[idx]), Mm(y), &regular);
        }
        rule(&layer_ref, y - 2.0);
        y -= ROW_HEIGHT_MM;
    }

    doc.save_to_bytes().map_err(to_pdf_error)
}

fn write_header_row(layer: &PdfLayerReference, bold: &IndirectFontRef, y: f32) {
    for (idx, header) in HEADERS.iter().enumerate() {
        layer.use_text(*header, 9.0, Mm(COLUMNS[idx]), Mm(y), bold);
    }
    rule(layer, y - 2.0);
}

fn rule(layer: &PdfLayerReference, y: f32) {
    let line = Line {
        points: vec![
            (Point::new(Mm(COLUMNS[0] - 2.0), Mm(y)), false),
            (Point::new(Mm(PAGE_WIDTH_MM - 12.0), Mm(y)), false),
        ],
        is_closed: false,
    };
    layer.add_line(line);
}

fn to_pdf_error<E: std::fmt::Display>(err: E) -> RenderError {
    RenderError::Pdf(err.to_string())
}
