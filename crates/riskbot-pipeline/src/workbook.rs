//! Risk analysis workbook delivered alongside the chat summary.
//!
//! The first sheet lays out the assessment in sections (source, conclusion,
//! scenarios, losses, mitigation, vision, payback); the second lists the
//! records that were sent for analysis.

use std::collections::HashMap;

use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use serde::Serialize;

use riskbot_core::{CellValue, Error, ExtractedDocument, Result};
use riskbot_inference::RiskAssessment;

/// Name of the assessment sheet.
pub const ANALYSIS_SHEET: &str = "Risk analysis";

/// Name of the sheet listing the analysed records.
pub const DATA_SHEET: &str = "Extracted data";

/// Longest text a single xlsx cell can hold.
const MAX_CELL_CHARS: usize = 32_767;

/// Columns available on one xlsx worksheet.
const MAX_COLUMNS: usize = 16_384;

/// Report file produced for a delivered run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportAttachment {
    /// `{stem}_analysis.xlsx`, safe to use as a bare filename.
    pub filename: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ReportAttachment {
    /// Build the report for an analysed document.
    pub fn build(doc: &ExtractedDocument, assessment: &RiskAssessment) -> Result<Self> {
        let bytes = render(doc, assessment)
            .map_err(|e| Error::Internal(format!("report workbook could not be built: {}", e)))?;
        Ok(Self {
            filename: report_filename(&doc.source_name),
            bytes,
        })
    }
}

/// Report filename for an upload: its stem with `_analysis.xlsx` appended.
///
/// Directory components are dropped and anything other than letters,
/// digits, space, `-` and `_` becomes `_`.
pub fn report_filename(source_name: &str) -> String {
    let base = source_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim();
    if stem.is_empty() {
        "report_analysis.xlsx".to_string()
    } else {
        format!("{}_analysis.xlsx", stem)
    }
}

struct Styles {
    title: Format,
    section: Format,
    label: Format,
    header: Format,
    cell: Format,
    wrap: Format,
    emphasis: Format,
}

impl Styles {
    fn new() -> Self {
        let thin = |f: Format| f.set_border(FormatBorder::Thin);
        Self {
            title: Format::new()
                .set_bold()
                .set_font_size(16)
                .set_align(FormatAlign::Center),
            section: Format::new().set_bold().set_font_size(14),
            label: Format::new().set_bold(),
            header: thin(
                Format::new()
                    .set_bold()
                    .set_font_color(Color::White)
                    .set_background_color(Color::RGB(0x366092))
                    .set_align(FormatAlign::Center)
                    .set_text_wrap(),
            ),
            cell: thin(Format::new().set_text_wrap()),
            wrap: Format::new().set_text_wrap().set_align(FormatAlign::Top),
            emphasis: Format::new().set_bold().set_font_size(12),
        }
    }

    /// Fill for a risk level, matched on English and Russian level names.
    fn risk_level(level: &str) -> Format {
        let rgb = match level.trim().to_lowercase().as_str() {
            "low" | "низкий" => Some(0x00B050),
            "medium" | "средний" => Some(0xFFC000),
            "high" | "высокий" => Some(0xFF6600),
            "critical" | "критический" => Some(0xC00000),
            _ => None,
        };
        let format = Format::new()
            .set_bold()
            .set_align(FormatAlign::Center)
            .set_border(FormatBorder::Thin);
        match rgb {
            Some(rgb) => format
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(rgb)),
            None => format,
        }
    }
}

fn render(
    doc: &ExtractedDocument,
    assessment: &RiskAssessment,
) -> std::result::Result<Vec<u8>, XlsxError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    write_analysis_sheet(workbook.add_worksheet(), doc, assessment, &styles)?;
    write_data_sheet(workbook.add_worksheet(), doc, &styles)?;
    workbook.save_to_buffer()
}

fn clip(text: &str) -> String {
    text.trim().chars().take(MAX_CELL_CHARS).collect()
}

/// Split prose into sentences for one-per-row display.
fn sentences(text: &str) -> Vec<String> {
    let parts: Vec<String> = text
        .split(". ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.ends_with(['.', '!', '?']) {
                s.to_string()
            } else {
                format!("{}.", s)
            }
        })
        .collect();
    if parts.len() > 1 {
        parts
    } else {
        vec![text.trim().to_string()]
    }
}

fn bullets(
    sheet: &mut Worksheet,
    row: &mut u32,
    items: &[String],
    empty: Option<&str>,
    styles: &Styles,
) -> std::result::Result<(), XlsxError> {
    let mut written = false;
    for item in items.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        sheet.write_string_with_format(*row, 0, clip(&format!("• {}", item)), &styles.wrap)?;
        *row += 1;
        written = true;
    }
    if !written {
        if let Some(text) = empty {
            sheet.write_string(*row, 0, text)?;
            *row += 1;
        }
    }
    Ok(())
}

fn write_analysis_sheet(
    sheet: &mut Worksheet,
    doc: &ExtractedDocument,
    a: &RiskAssessment,
    styles: &Styles,
) -> std::result::Result<(), XlsxError> {
    sheet.set_name(ANALYSIS_SHEET)?;
    sheet.set_column_width(0, 45)?;
    sheet.set_column_width(1, 40)?;
    for col in 2..6 {
        sheet.set_column_width(col, 20)?;
    }

    sheet.merge_range(0, 0, 0, 5, "Project risk analysis result", &styles.title)?;
    let mut row: u32 = 2;

    // Source
    sheet.write_string_with_format(row, 0, "Analysed data", &styles.section)?;
    row += 1;
    sheet.write_string_with_format(row, 0, "Parameter", &styles.header)?;
    sheet.write_string_with_format(row, 1, "Value", &styles.header)?;
    row += 1;
    let records = if doc.truncated {
        format!("{} of {} (earliest rows only)", doc.row_count, doc.total_rows)
    } else {
        doc.row_count.to_string()
    };
    for (name, value) in [
        ("Source file", clip(&doc.source_name)),
        ("Records analysed", records),
    ] {
        sheet.write_string_with_format(row, 0, name, &styles.cell)?;
        sheet.write_string_with_format(row, 1, value, &styles.cell)?;
        row += 1;
    }
    row += 1;

    // Conclusion
    sheet.write_string_with_format(row, 0, "AI analysis conclusion", &styles.section)?;
    row += 1;
    sheet.write_string_with_format(row, 0, "Risk level:", &styles.label)?;
    sheet.write_string_with_format(
        row,
        1,
        clip(&a.risk_level),
        &Styles::risk_level(&a.risk_level),
    )?;
    row += 1;
    if let (Some(score), Some(tier)) = (a.business_score, a.score_tier()) {
        sheet.write_string_with_format(row, 0, "Business score:", &styles.label)?;
        sheet.write_string(row, 1, format!("{:.0}/100 ({})", score, tier.label()))?;
        row += 1;
    }
    row += 1;

    sheet.write_string_with_format(row, 0, "Rationale:", &styles.label)?;
    row += 1;
    let reason = if a.reason.trim().is_empty() {
        "Not provided".to_string()
    } else {
        clip(&a.reason)
    };
    sheet.merge_range(row, 0, row, 5, &reason, &styles.wrap)?;
    sheet.set_row_height(row, 60)?;
    row += 2;

    sheet.write_string_with_format(row, 0, "Critical factors:", &styles.label)?;
    row += 1;
    bullets(sheet, &mut row, &a.critical_factors, Some("None identified"), styles)?;
    row += 1;

    // Scenarios
    if !a.scenarios.is_empty() {
        sheet.write_string_with_format(row, 0, "Contingency scenario analysis", &styles.section)?;
        row += 1;
        let headers = [
            "Scenario",
            "Description",
            "NPV impact, mln rub",
            "IRR impact, %",
            "Probability",
            "Potential losses, mln rub",
        ];
        for (col, header) in headers.into_iter().enumerate() {
            sheet.write_string_with_format(row, col as u16, header, &styles.header)?;
        }
        row += 1;
        for scenario in &a.scenarios {
            sheet.write_string_with_format(row, 0, clip(&scenario.name), &styles.cell)?;
            sheet.write_string_with_format(row, 1, clip(&scenario.description), &styles.cell)?;
            for (col, value) in [
                (2u16, scenario.npv_impact),
                (3, scenario.irr_impact),
                (5, scenario.potential_losses),
            ] {
                match value {
                    Some(v) => sheet.write_number_with_format(row, col, v, &styles.cell)?,
                    None => sheet.write_string_with_format(row, col, "", &styles.cell)?,
                };
            }
            sheet.write_string_with_format(row, 4, clip(&scenario.probability), &styles.cell)?;
            row += 1;
        }
        row += 1;
    }

    if let Some(losses) = a.total_potential_losses {
        sheet.write_string_with_format(row, 0, "Total potential losses:", &styles.label)?;
        sheet.write_string_with_format(
            row,
            1,
            format!("{:.2} mln rub", losses),
            &styles.emphasis,
        )?;
        row += 2;
    }

    if a.risk_mitigation.iter().any(|s| !s.trim().is_empty()) {
        sheet.write_string_with_format(
            row,
            0,
            "Risk mitigation recommendations:",
            &styles.section,
        )?;
        row += 1;
        bullets(sheet, &mut row, &a.risk_mitigation, None, styles)?;
        row += 1;
    }

    if !a.business_vision.trim().is_empty() {
        sheet.write_string_with_format(row, 0, "Business vision:", &styles.section)?;
        row += 1;
        bullets(sheet, &mut row, &sentences(&a.business_vision), None, styles)?;
        row += 1;
    }

    if let Some(payback) = a.estimated_payback {
        sheet.write_string_with_format(
            row,
            0,
            "Estimated payback (including growth prospects):",
            &styles.label,
        )?;
        sheet.write_string_with_format(row, 1, format!("{} years", payback), &styles.emphasis)?;
    }
    Ok(())
}

fn write_data_sheet(
    sheet: &mut Worksheet,
    doc: &ExtractedDocument,
    styles: &Styles,
) -> std::result::Result<(), XlsxError> {
    sheet.set_name(DATA_SHEET)?;

    let headers = ["Sheet", "Row"]
        .into_iter()
        .chain(doc.columns.iter().map(String::as_str))
        .take(MAX_COLUMNS);
    let mut positions: HashMap<&str, u16> = HashMap::new();
    for (col, name) in headers.enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, clip(name), &styles.header)?;
        if col >= 2 {
            positions.insert(name, col);
        }
    }

    for (idx, record) in doc.rows.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_string(row, 0, clip(&record.sheet))?;
        sheet.write_number(row, 1, record.row_number as f64)?;
        for (name, value) in &record.cells {
            let Some(&col) = positions.get(name.as_str()) else {
                continue;
            };
            match value {
                CellValue::Empty => {}
                CellValue::Bool(b) => {
                    sheet.write_boolean(row, col, *b)?;
                }
                CellValue::Int(i) => {
                    sheet.write_number(row, col, *i as f64)?;
                }
                CellValue::Float(f) => {
                    sheet.write_number(row, col, *f)?;
                }
                CellValue::Text(t) => {
                    sheet.write_string(row, col, clip(t))?;
                }
            }
        }
    }
    Ok(())
}
