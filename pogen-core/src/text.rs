//! Text formatting helpers shared by the populator and the form controller
//!
//! Everything here is pure: address wrapping for the two-line supplier block,
//! amount-to-words for the total line, PO number validation, and the date
//! format used throughout the template.

use chrono::{Days, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::OnceLock;

/// Width of one supplier address line in the template
pub const DEFAULT_ADDRESS_WIDTH: usize = 45;

/// Date format of every date cell in the template
pub const DATE_FORMAT: &str = "%d/%m/%Y";

const CURRENCY_UNIT: &str = "Ringgit";
const CURRENCY_SUBUNIT: &str = "Cents";

/// Split an address into two lines of at most `max_length` characters.
///
/// The split prefers the last comma at or before `max_length`, then the last
/// whitespace, and finally falls back to a hard split. A comma left dangling at
/// the end of the first line is dropped when a second line exists.
pub fn wrap_address(address: &str, max_length: usize) -> (String, String) {
    let address = address.trim();
    let chars: Vec<char> = address.chars().collect();

    if chars.len() <= max_length {
        return (address.to_string(), String::new());
    }

    // chars.len() > max_length, so index max_length is in bounds
    let split_at = (1..=max_length)
        .rev()
        .find(|&i| chars[i] == ',')
        .map(|i| i + 1)
        .or_else(|| (1..=max_length).rev().find(|&i| chars[i].is_whitespace()))
        .unwrap_or(max_length);

    let mut line1 = chars[..split_at]
        .iter()
        .collect::<String>()
        .trim()
        .to_string();
    let line2 = chars[split_at..]
        .iter()
        .collect::<String>()
        .trim()
        .to_string();

    if line1.ends_with(',') && !line2.is_empty() {
        line1.pop();
    }

    (line1, line2)
}

/// Render an amount as a currency phrase, e.g. "Twelve Ringgit and Five Cents Only".
///
/// Negative amounts are treated as zero.
pub fn amount_to_words(amount: Decimal) -> String {
    let amount = if amount.is_sign_negative() {
        Decimal::ZERO
    } else {
        amount.round_dp(2)
    };

    let whole = amount.trunc();
    let units = whole.to_u128().unwrap_or(0);
    let cents = ((amount - whole) * Decimal::ONE_HUNDRED).to_u128().unwrap_or(0);

    let mut output = String::new();
    if units > 0 {
        output = format!("{} {}", title_case(&number_to_words(units)), CURRENCY_UNIT);
    }

    if cents > 0 {
        let cents_words = format!("{} {}", title_case(&number_to_words(cents)), CURRENCY_SUBUNIT);
        if output.is_empty() {
            output = cents_words;
        } else {
            output = format!("{output} and {cents_words}");
        }
    }

    if output.is_empty() {
        return format!("Zero {CURRENCY_UNIT} Only");
    }

    output.push_str(" Only");
    output
}

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [&str; 13] = [
    "",
    "thousand",
    "million",
    "billion",
    "trillion",
    "quadrillion",
    "quintillion",
    "sextillion",
    "septillion",
    "octillion",
    "nonillion",
    "decillion",
    "undecillion",
];

/// English words for `n`, lower case, without commas or "and".
///
/// `1234` becomes "one thousand two hundred thirty-four".
pub fn number_to_words(n: u128) -> String {
    if n == 0 {
        return ONES[0].to_string();
    }

    let mut groups = Vec::new();
    let mut rest = n;
    while rest > 0 {
        groups.push((rest % 1000) as usize);
        rest /= 1000;
    }

    let mut parts: Vec<String> = Vec::new();
    for (scale, &group) in groups.iter().enumerate().rev() {
        if group == 0 {
            continue;
        }
        let words = below_thousand(group);
        if scale == 0 {
            parts.push(words);
        } else {
            parts.push(format!("{words} {}", SCALES[scale]));
        }
    }

    parts.join(" ")
}

fn below_thousand(n: usize) -> String {
    let hundreds = n / 100;
    let rest = n % 100;

    let mut words = Vec::new();
    if hundreds > 0 {
        words.push(format!("{} hundred", ONES[hundreds]));
    }
    if rest > 0 {
        words.push(below_hundred(rest));
    }
    words.join(" ")
}

fn below_hundred(n: usize) -> String {
    if n < 20 {
        return ONES[n].to_string();
    }
    let tens = TENS[n / 10];
    match n % 10 {
        0 => tens.to_string(),
        ones => format!("{tens}-{}", ONES[ones]),
    }
}

/// Capitalise the first letter of every alphabetic run ("thirty-four" -> "Thirty-Four")
fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                result.extend(ch.to_uppercase());
            } else {
                result.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            result.push(ch);
            at_word_start = true;
        }
    }
    result
}

fn po_number_pattern() -> &'static Regex {
    static PO_NUMBER: OnceLock<Regex> = OnceLock::new();
    PO_NUMBER.get_or_init(|| Regex::new(r"^P-[0-9]{6}-[0-9]{3}M$").unwrap())
}

fn po_suffix_pattern() -> &'static Regex {
    static PO_SUFFIX: OnceLock<Regex> = OnceLock::new();
    PO_SUFFIX.get_or_init(|| Regex::new(r"-[0-9]{3}M$").unwrap())
}

/// Check a PO number against `P-######-###M`
pub fn is_valid_po_number(po_number: &str) -> bool {
    po_number_pattern().is_match(po_number)
}

/// Project number is the PO number without its `-###M` suffix
pub fn extract_project_number(po_number: &str) -> String {
    po_suffix_pattern().replace(po_number, "").into_owned()
}

/// Parse a `dd/mm/yyyy` date
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// Format a date as `dd/mm/yyyy`
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Expected delivery date, only when a positive lead time is known
pub fn delivery_date(issue_date: NaiveDate, lead_time_weeks: Option<u32>) -> Option<NaiveDate> {
    match lead_time_weeks {
        Some(weeks) if weeks > 0 => issue_date.checked_add_days(Days::new(u64::from(weeks) * 7)),
        _ => None,
    }
}
