use std::sync::OnceLock;

use appledger_core::{LineItem, Money, UnreconciledReceipt};
use scraper::{ElementRef, Html, Selector};

use crate::error::ParseError;
use crate::patterns::{
    clean_text, detect_currency, find_date, find_receipt_id, has_amount, last_amount,
    re_receipt_id_label, strip_last_amount,
};

macro_rules! sel {
    ($name:ident, $css:expr) => {
        fn $name() -> &'static Selector {
            static S: OnceLock<Selector> = OnceLock::new();
            S.get_or_init(|| Selector::parse($css).expect("invalid selector"))
        }
    };
}

sel!(sel_lockup, "table.subscription-lockup__container");
sel!(sel_payment, "div.payment-information");
sel!(sel_p, "p");
sel!(sel_tr, "tr");
sel!(sel_title, ".title");
sel!(sel_addon, ".addon-duration");

const SUBSCRIPTION_NOISE: &[&str] = &["hp-cell", "iphone", "ipad", "mac", "watch", "apple tv", "vision"];
const TOTAL_LABELS: &[&str] = &["total", "order total", "amount charged", "charged"];

/// What one markup layout recovered from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch {
    pub template: &'static str,
    pub line_items: Vec<LineItem>,
    pub tax_total: Option<Money>,
    pub grand_total: Option<Money>,
}

/// A known receipt markup layout.
pub trait ReceiptTemplate: Sync {
    fn name(&self) -> &'static str;

    /// Returns `None` when the document has no line items in this layout.
    fn try_parse(&self, doc: &Html) -> Option<TemplateMatch>;
}

/// Tables classed `subscription-lockup__container`, with totals in the
/// `payment-information` block.
pub struct LockupTemplate;

/// Rows pairing a `td.item-cell` with a `td.price-cell`, totals in label/value rows.
pub struct ItemCellTemplate;

/// Tried in order; the first template that yields line items wins.
pub static TEMPLATES: [&dyn ReceiptTemplate; 2] = [&LockupTemplate, &ItemCellTemplate];

impl ReceiptTemplate for LockupTemplate {
    fn name(&self) -> &'static str {
        "lockup"
    }

    fn try_parse(&self, doc: &Html) -> Option<TemplateMatch> {
        let line_items: Vec<LineItem> = doc
            .select(sel_lockup())
            .filter_map(|table| {
                let tokens = p_tokens(table);
                let amount = tokens.iter().rev().find_map(|t| last_amount(t))?;
                let names: Vec<&str> = tokens
                    .iter()
                    .filter(|t| !has_amount(t))
                    .map(String::as_str)
                    .collect();
                compose_name(&names).map(|name| LineItem::new(name, amount))
            })
            .collect();
        if line_items.is_empty() {
            return None;
        }

        let (tax_total, grand_total) = doc
            .select(sel_payment())
            .next()
            .map(|section| totals_from_tokens(&p_tokens(section)))
            .unwrap_or((None, None));

        Some(TemplateMatch {
            template: self.name(),
            line_items,
            tax_total,
            grand_total,
        })
    }
}

impl ReceiptTemplate for ItemCellTemplate {
    fn name(&self) -> &'static str {
        "item-cell"
    }

    fn try_parse(&self, doc: &Html) -> Option<TemplateMatch> {
        let mut line_items = Vec::new();
        let mut labelled = Vec::new();

        for row in doc.select(sel_tr()) {
            let cells = direct_cells(row);
            let item_cell = cells.iter().find(|c| has_class(c, "item-cell"));
            let price_cell = cells.iter().find(|c| has_class(c, "price-cell"));

            match (item_cell, price_cell) {
                (Some(item), Some(price)) => {
                    if has_class(item, "aapl-mobile-cell") {
                        continue;
                    }
                    if let Some(line) = item_cell_line(item, price) {
                        line_items.push(line);
                    }
                }
                _ => {
                    // Summary rows: label in the first cell, amount in the last.
                    if let (Some(first), Some(last)) = (cells.first(), cells.last()) {
                        if let Some(amount) = last_amount(&element_text(*last)) {
                            labelled.push(element_text(*first));
                            labelled.push(amount.to_string());
                        }
                    }
                }
            }
        }
        if line_items.is_empty() {
            return None;
        }

        let (tax_total, grand_total) = totals_from_tokens(&labelled);
        Some(TemplateMatch {
            template: self.name(),
            line_items,
            tax_total,
            grand_total,
        })
    }
}

/// Parses an HTML receipt body by running the template chain and reading the
/// document-wide metadata (receipt id, date, currency).
pub fn parse_html(html: &str, default_currency: &str) -> Result<UnreconciledReceipt, ParseError> {
    let doc = Html::parse_document(html);

    let matched = TEMPLATES
        .iter()
        .find_map(|t| t.try_parse(&doc))
        .ok_or(ParseError::UnrecognizedTemplate)?;
    tracing::debug!(
        template = matched.template,
        items = matched.line_items.len(),
        "receipt template matched"
    );

    let lines = metadata_lines(&doc);
    let receipt_id = find_receipt_id(&lines).ok_or(ParseError::MissingReceiptId)?;
    let date = find_date(&lines).ok_or(ParseError::MissingDate)?;

    Ok(UnreconciledReceipt {
        receipt_id,
        date,
        currency: detect_currency(&lines, default_currency),
        line_items: matched.line_items,
        tax_total: matched.tax_total.ok_or(ParseError::MissingTax)?,
        grand_total: matched.grand_total.ok_or(ParseError::MissingGrandTotal)?,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn item_cell_line(item: &ElementRef, price: &ElementRef) -> Option<LineItem> {
    let amount = last_amount(&element_text(*price))?;
    let title = item
        .select(sel_title())
        .next()
        .map(element_text)
        .or_else(|| text_tokens(*item).into_iter().next())
        .filter(|t| !t.is_empty())?;
    let name = match item.select(sel_addon()).next().map(element_text) {
        Some(addon) if !addon.is_empty() => format!("{title} - {addon}"),
        _ => title,
    };
    Some(LineItem::new(name, amount))
}

/// `"<app> - <plan>"`, where the plan is the first token after the app name that is
/// not renewal or device metadata.
fn compose_name(tokens: &[&str]) -> Option<String> {
    let (app, rest) = tokens.split_first()?;
    match rest.iter().find(|t| !is_subscription_noise(t)) {
        Some(plan) => Some(format!("{app} - {plan}")),
        None => Some(app.to_string()),
    }
}

fn is_subscription_noise(token: &str) -> bool {
    let lowered = token.trim().to_lowercase();
    lowered.starts_with("renews ") || SUBSCRIPTION_NOISE.contains(&lowered.as_str())
}

/// Reads tax and grand total out of a flat label/value token stream.
fn totals_from_tokens(tokens: &[String]) -> (Option<Money>, Option<Money>) {
    let subtotal = amount_after_label(tokens, &["subtotal"]);
    let grand_total = amount_after_label(tokens, TOTAL_LABELS)
        .or_else(|| tokens.iter().rev().find_map(|t| last_amount(t)));
    let tax_total = amount_after_label(tokens, &["tax"]).or(match (subtotal, grand_total) {
        (Some(sub), Some(total)) => Some(total - sub),
        _ => None,
    });
    (tax_total, grand_total)
}

fn amount_after_label(tokens: &[String], labels: &[&str]) -> Option<Money> {
    let is_label = |s: &str| {
        let lowered = s.trim().trim_end_matches(':').trim().to_lowercase();
        labels.contains(&lowered.as_str())
    };

    for (idx, token) in tokens.iter().enumerate() {
        if let Some(amount) = last_amount(token) {
            if is_label(strip_last_amount(token)) {
                return Some(amount);
            }
            continue;
        }
        if !is_label(token.as_str()) {
            continue;
        }
        for candidate in &tokens[idx + 1..] {
            if let Some(amount) = last_amount(candidate) {
                return Some(amount);
            }
            if candidate.trim().ends_with(':') {
                break;
            }
        }
    }
    None
}

fn direct_cells(row: ElementRef) -> Vec<ElementRef> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| {
            let name = c.value().name();
            name.eq_ignore_ascii_case("td") || name.eq_ignore_ascii_case("th")
        })
        .collect()
}

fn has_class(el: &ElementRef, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn element_text(el: ElementRef) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// One token per `<p>` element under `el`.
fn p_tokens(el: ElementRef) -> Vec<String> {
    el.select(sel_p())
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Every non-empty text node under `el`, skipping style and script contents.
fn text_tokens(el: ElementRef) -> Vec<String> {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent().and_then(|p| p.value().as_element().map(|e| e.name().to_owned()));
            if matches!(parent.as_deref(), Some("style" | "script" | "title")) {
                return None;
            }
            let cleaned = clean_text(text);
            (!cleaned.is_empty()).then_some(cleaned)
        })
        .collect()
}

/// Text tokens plus "label value" lines for labels split from their value by markup.
fn metadata_lines(doc: &Html) -> Vec<String> {
    let tokens = text_tokens(doc.root_element());
    let joined: Vec<String> = tokens
        .windows(2)
        .filter(|pair| re_receipt_id_label().is_match(&pair[0]))
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect();
    tokens.into_iter().chain(joined).collect()
}
