use anyhow::{anyhow, Result};
use printpdf::{BuiltinFont, Line, Mm, PdfDocument, PdfLayerReference, Point};

use crate::calc::ScoreSheet;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 20.0;

const COL_NO: f32 = MARGIN + 2.0;
const COL_MEMBER: f32 = 34.0;
const COL_POSITION: f32 = 102.0;
const COL_SCORE: f32 = 154.0;

/// Fixed-layout single-page A4 score sheet. The caller owns persistence
/// and the `%PDF` signature check on the returned bytes.
pub fn render_score_sheet(sheet: &ScoreSheet) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Thesis defense score sheet {}", sheet.thesis_code),
        Mm(PAGE_W),
        Mm(PAGE_H),
        "sheet",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!(e.to_string()))?;
    let layer = doc.get_page(page).get_layer(layer);
    layer.set_outline_thickness(0.5);

    layer.use_text(
        "MINISTRY OF EDUCATION AND TRAINING",
        10.0,
        Mm(62.0),
        Mm(282.0),
        &font,
    );
    layer.use_text(
        "THESIS DEFENSE SCORE SHEET",
        15.0,
        Mm(56.0),
        Mm(268.0),
        &bold,
    );
    hline(&layer, 56.0, 154.0, 265.5);

    let mut y = 252.0;
    let mut meta = |label: &str, value: String| {
        layer.use_text(label, 10.5, Mm(MARGIN), Mm(y), &bold);
        layer.use_text(value.as_str(), 10.5, Mm(MARGIN + 34.0), Mm(y), &font);
        y -= 7.0;
    };
    meta(
        "Thesis:",
        format!("{} - {}", sheet.thesis_code, sheet.thesis_name),
    );
    meta("Major:", sheet.major_name.clone());
    meta("School year:", sheet.school_year_name.clone());
    meta("Students:", join_or_dash(&sheet.students));
    meta("Supervisors:", join_or_dash(&sheet.supervisors));
    meta(
        "Council:",
        sheet
            .council_name
            .clone()
            .unwrap_or_else(|| "-".to_string()),
    );
    let criteria_lines: Vec<String> = sheet
        .criteria
        .iter()
        .map(|c| format!("{} (weight {:.2})", c.name, c.weight))
        .collect();
    meta("Criteria:", join_or_dash(&criteria_lines));

    // Score table: one row per council member, closed by the total row.
    let table_top = 192.0;
    layer.use_text("No.", 10.5, Mm(COL_NO), Mm(table_top), &bold);
    layer.use_text("Council member", 10.5, Mm(COL_MEMBER), Mm(table_top), &bold);
    layer.use_text("Position", 10.5, Mm(COL_POSITION), Mm(table_top), &bold);
    layer.use_text("Weighted score", 10.5, Mm(COL_SCORE), Mm(table_top), &bold);
    hline(&layer, MARGIN, PAGE_W - MARGIN, table_top - 2.5);

    let mut row_y = table_top - 9.0;
    for (idx, row) in sheet.lecturer_scores.iter().enumerate() {
        layer.use_text(format!("{}", idx + 1), 10.5, Mm(COL_NO), Mm(row_y), &font);
        layer.use_text(
            row.lecturer_name.as_str(),
            10.5,
            Mm(COL_MEMBER),
            Mm(row_y),
            &font,
        );
        layer.use_text(
            row.position_name.as_str(),
            10.5,
            Mm(COL_POSITION),
            Mm(row_y),
            &font,
        );
        layer.use_text(
            format!("{:.2}", row.weighted_total),
            10.5,
            Mm(COL_SCORE),
            Mm(row_y),
            &font,
        );
        row_y -= 8.0;
    }
    hline(&layer, MARGIN, PAGE_W - MARGIN, row_y + 5.0);
    layer.use_text("Total score", 10.5, Mm(COL_POSITION), Mm(row_y - 1.0), &bold);
    let total = match sheet.total_score {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    };
    layer.use_text(total, 10.5, Mm(COL_SCORE), Mm(row_y - 1.0), &bold);

    layer.use_text("Secretary", 10.5, Mm(40.0), Mm(52.0), &bold);
    layer.use_text("(sign, full name)", 9.0, Mm(36.0), Mm(46.0), &font);
    layer.use_text("Chairman", 10.5, Mm(142.0), Mm(52.0), &bold);
    layer.use_text("(sign, full name)", 9.0, Mm(138.0), Mm(46.0), &font);

    doc.save_to_bytes().map_err(|e| anyhow!(e.to_string()))
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn hline(layer: &PdfLayerReference, x1: f32, x2: f32, y: f32) {
    layer.add_line(Line {
        points: vec![
            (Point::new(Mm(x1), Mm(y)), false),
            (Point::new(Mm(x2), Mm(y)), false),
        ],
        is_closed: false,
    });
}
