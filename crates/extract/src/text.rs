//! Line-oriented heuristics for receipts that arrive as plain text, either a
//! `text/plain` mail body or text pulled out of a PDF.

use appledger_core::{LineItem, Money, UnreconciledReceipt};

use crate::error::ParseError;
use crate::patterns::{
    clean_text, detect_currency, find_date, find_receipt_id, has_amount, last_amount,
    re_mail_noise, re_section_hint, re_summary_line, re_tax_line, re_total_line, strip_last_amount,
};

const NOISE_SCAN_LINES: usize = 80;
const SECTION_SCAN_START_LINES: usize = 240;
const SECTION_WINDOW_LINES: usize = 160;
const SECTION_FOOTER_LINES: usize = 12;
const MIN_SECTION_SHORT_CIRCUIT: usize = 6;

pub fn parse_text(text: &str, default_currency: &str) -> Result<UnreconciledReceipt, ParseError> {
    let lines: Vec<String> = text
        .lines()
        .map(clean_text)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return Err(ParseError::EmptyDocument);
    }
    let lines = strip_leading_noise(&lines);
    let lines = focus_receipt_section(lines);

    let receipt_id = find_receipt_id(lines).ok_or(ParseError::MissingReceiptId)?;
    let date = find_date(lines).ok_or(ParseError::MissingDate)?;
    let currency = detect_currency(lines, default_currency);

    let grand_total = grand_total(lines).ok_or(ParseError::MissingGrandTotal)?;
    let tax_total = tax_total(lines).ok_or(ParseError::MissingTax)?;

    let line_items = line_items(lines);
    if line_items.is_empty() {
        return Err(ParseError::NoLineItems);
    }

    Ok(UnreconciledReceipt {
        receipt_id,
        date,
        currency,
        line_items,
        tax_total,
        grand_total,
    })
}

fn is_noise(line: &str) -> bool {
    re_mail_noise().is_match(line)
}

/// Drops forwarded-mail headers and quoted lines in front of the receipt.
fn strip_leading_noise(lines: &[String]) -> &[String] {
    let scan = lines.len().min(NOISE_SCAN_LINES);
    let start = lines[..scan]
        .iter()
        .position(|l| !is_noise(l) && !l.starts_with('>'))
        .unwrap_or(scan);
    &lines[start..]
}

/// Narrows the text to the first window that starts at a receipt hint and looks
/// like a receipt, ending a few lines past its last total.
fn focus_receipt_section(lines: &[String]) -> &[String] {
    if lines.len() < MIN_SECTION_SHORT_CIRCUIT {
        return lines;
    }

    let candidates = lines
        .iter()
        .take(SECTION_SCAN_START_LINES)
        .enumerate()
        .filter(|(_, l)| re_section_hint().is_match(l) && !is_noise(l))
        .map(|(idx, _)| idx);

    for start in candidates {
        let end = lines.len().min(start + SECTION_WINDOW_LINES);
        let window = &lines[start..end];
        if !looks_like_receipt(window) {
            continue;
        }
        let focused_end = window
            .iter()
            .rposition(|l| is_grand_total_line(l) && has_amount(l))
            .map(|offset| lines.len().min(start + offset + SECTION_FOOTER_LINES))
            .unwrap_or(end);
        return &lines[start..focused_end];
    }
    lines
}

fn looks_like_receipt(window: &[String]) -> bool {
    let amount_lines = window.iter().filter(|l| has_amount(l)).count();
    amount_lines >= 3 && tax_total(window).is_some() && grand_total(window).is_some()
}

fn is_grand_total_line(line: &str) -> bool {
    re_total_line().is_match(line) && !re_tax_line().is_match(line)
}

/// The last amount on the last tax line.
fn tax_total(lines: &[String]) -> Option<Money> {
    lines
        .iter()
        .filter(|l| re_tax_line().is_match(l))
        .filter_map(|l| last_amount(l))
        .last()
}

fn grand_total(lines: &[String]) -> Option<Money> {
    lines
        .iter()
        .filter(|l| is_grand_total_line(l))
        .filter_map(|l| last_amount(l))
        .last()
}

fn line_items(lines: &[String]) -> Vec<LineItem> {
    lines
        .iter()
        .filter(|l| !re_summary_line().is_match(l))
        .filter_map(|l| {
            let amount = last_amount(l)?;
            let name = strip_last_amount(l).trim_matches(|c| c == ':' || c == '-' || c == ' ');
            (!name.is_empty()).then(|| LineItem::new(name, amount))
        })
        .collect()
}
