use std::sync::OnceLock;

use appledger_core::Money;
use chrono::NaiveDate;
use regex::Regex;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        pub(crate) fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_amount,
    r"[-+]?\$?\d{1,3}(?:,\d{3})*\.\d{2}\b|[-+]?\$?\d+\.\d{2}\b");
re!(re_receipt_id,
    r"(?i)\b(?:order\s*id|document\s*(?:no|number)|receipt\s*id|invoice\s*id)\b\s*[:#.]?\s*([A-Z0-9][A-Z0-9\-]*)");
re!(re_receipt_id_label,
    r"(?i)^(?:order\s*id|receipt\s*id|invoice\s*id|document\s*(?:no|number)\.?|document)\s*:?$");
re!(re_date_candidate,
    r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|[A-Za-z]{3,9}\s+\d{1,2},\s+\d{4})\b");

// Line classifiers for plain-text receipts.
re!(re_tax_line, r"(?i)\btax\b|\bvat\b");
re!(re_total_line, r"(?i)\bgrand\s*total\b|\bamount\s*charged\b|\btotal\b");
re!(re_summary_line,
    r"(?i)\btax\b|\btotal\b|\bsubtotal\b|\border\s*id\b|\binvoice\b|\bamount\s*charged\b|\bbalance\b|\bprinted by\b");
re!(re_mail_noise,
    r"(?i)^(?:from|to|subject|sent|date|cc|bcc)\s*:|^on .+ wrote:$|^page\s+\d+\s+of\s+\d+|^sent from my");
re!(re_section_hint,
    r"(?i)\b(?:order\s*id|document\s*(?:no|number)|receipt\s*id|invoice\s*id|receipt|invoice|apple|app\s*store|itunes)\b");

/// Collapses all runs of whitespace (including NBSP) to single spaces.
pub(crate) fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The last amount token on a line, which is where receipts put the price.
pub(crate) fn last_amount(line: &str) -> Option<Money> {
    re_amount()
        .find_iter(line)
        .last()
        .and_then(|m| Money::parse(m.as_str()))
}

/// Text before the last amount token.
pub(crate) fn strip_last_amount(line: &str) -> &str {
    match re_amount().find_iter(line).last() {
        Some(m) => &line[..m.start()],
        None => line,
    }
}

pub(crate) fn has_amount(line: &str) -> bool {
    last_amount(line).is_some()
}

pub(crate) fn find_receipt_id<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().find_map(|line| {
        re_receipt_id()
            .captures(line.as_ref())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

pub(crate) fn find_date<S: AsRef<str>>(lines: &[S]) -> Option<NaiveDate> {
    lines
        .iter()
        .flat_map(|line| re_date_candidate().find_iter(line.as_ref()))
        .find_map(|m| parse_date(m.as_str()))
}

pub(crate) fn detect_currency<S: AsRef<str>>(lines: &[S], default_currency: &str) -> String {
    if lines.iter().any(|l| l.as_ref().contains('$')) {
        "USD".to_string()
    } else {
        default_currency.to_string()
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = clean_text(value);
    if value.contains('/') {
        let short_year = value.rsplit('/').next().is_some_and(|y| y.len() == 2);
        let fmt = if short_year { "%m/%d/%y" } else { "%m/%d/%Y" };
        return NaiveDate::parse_from_str(&value, fmt).ok();
    }
    ["%Y-%m-%d", "%b %d, %Y", "%B %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&value, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_amount_picks_rightmost_token() {
        assert_eq!(last_amount("Apple Music $10.99 $12.34"), Some(Money::from_cents(1234)));
        assert_eq!(last_amount("Total $1,234.56"), Some(Money::from_cents(123456)));
        assert_eq!(last_amount("Card •••• 1111"), None);
        assert_eq!(last_amount("Renews February 17, 2026"), None);
    }

    #[test]
    fn strip_last_amount_keeps_description() {
        assert_eq!(strip_last_amount("iCloud+ 50GB: $0.99"), "iCloud+ 50GB: ");
    }

    #[test]
    fn receipt_id_from_labelled_line() {
        let lines = ["Thanks for your order", "Order ID: MSD3TZ09X1"];
        assert_eq!(find_receipt_id(&lines).as_deref(), Some("MSD3TZ09X1"));
    }

    #[test]
    fn receipt_id_ignores_bare_label() {
        let lines = ["Order ID:", "DOCUMENT NO."];
        assert_eq!(find_receipt_id(&lines), None);
    }

    #[test]
    fn label_pattern_accepts_variants() {
        for label in ["Order ID:", "ORDER ID", "Document:", "DOCUMENT NO.", "Invoice ID"] {
            assert!(re_receipt_id_label().is_match(label), "{label}");
        }
        assert!(!re_receipt_id_label().is_match("Order ID: X1"));
    }

    #[test]
    fn date_formats() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day);
        assert_eq!(find_date(&["January 24, 2026"]), d(2026, 1, 24));
        assert_eq!(find_date(&["DATE Feb 11, 2026"]), d(2026, 2, 11));
        assert_eq!(find_date(&["2026-02-15"]), d(2026, 2, 15));
        assert_eq!(find_date(&["01/15/2024"]), d(2024, 1, 15));
        assert_eq!(find_date(&["1/15/24"]), d(2024, 1, 15));
        assert_eq!(find_date(&["no dates here"]), None);
    }

    #[test]
    fn currency_detection() {
        assert_eq!(detect_currency(&["Total $1.00"], "EUR"), "USD");
        assert_eq!(detect_currency(&["Total 1.00"], "EUR"), "EUR");
    }
}
