//! Field vocabulary and value normalization.
//!
//! The set of scored fields is fixed. Each field name maps to exactly one
//! [`FieldRule`], which decides how two values of that field are compared
//! (string similarity, exact match after normalization, or numeric range) and
//! how a value is canonicalized and displayed.
//!
//! Three forms of a value exist:
//! - the *cleaned* value: collector noise removed, `None` when the value is
//!   effectively absent (`NOT_FOUND`, empty, malformed e-mail, ...)
//! - the *light key*: whitespace collapsed + case folded, used for `exact`
//! - the *canonical key*: field-specific (phone digits, website host, address
//!   abbreviations), used for `close` and for duplicate detection

use strsim::normalized_levenshtein;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRule {
    /// Normalized string distance on the canonical form.
    StringSimilarity(TextForm),
    /// Equal canonical keys, nothing in between.
    ExactNormalized(KeyForm),
    /// Numeric values within `tolerance` (relative to the larger magnitude).
    NumericRange { tolerance: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextForm {
    BusinessName,
    Address,
    Plain,
    Description,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyForm {
    Phone,
    Website,
    Email,
    PostalCode,
    Code,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: FieldRule,
}

const fn field_spec(name: &'static str, rule: FieldRule) -> FieldSpec {
    FieldSpec { name, rule }
}

/// Every field the engine scores. Keys outside this table are carried through
/// untouched on the entity but never reconciled or scored.
pub const VOCABULARY: &[FieldSpec] = &[
    field_spec("business_name", FieldRule::StringSimilarity(TextForm::BusinessName)),
    field_spec("dba_name", FieldRule::StringSimilarity(TextForm::BusinessName)),
    field_spec("phone_number", FieldRule::ExactNormalized(KeyForm::Phone)),
    field_spec("fax_number", FieldRule::ExactNormalized(KeyForm::Phone)),
    field_spec("address", FieldRule::StringSimilarity(TextForm::Address)),
    field_spec("city", FieldRule::StringSimilarity(TextForm::Plain)),
    field_spec("state", FieldRule::ExactNormalized(KeyForm::Code)),
    field_spec("zip", FieldRule::ExactNormalized(KeyForm::PostalCode)),
    field_spec("website", FieldRule::ExactNormalized(KeyForm::Website)),
    field_spec("general_email", FieldRule::ExactNormalized(KeyForm::Email)),
    field_spec("sales_email", FieldRule::ExactNormalized(KeyForm::Email)),
    field_spec("ceo_name", FieldRule::StringSimilarity(TextForm::Plain)),
    field_spec("ceo_email", FieldRule::ExactNormalized(KeyForm::Email)),
    field_spec("industry_classification", FieldRule::StringSimilarity(TextForm::Plain)),
    field_spec("naics_code", FieldRule::ExactNormalized(KeyForm::Code)),
    field_spec("business_description", FieldRule::StringSimilarity(TextForm::Description)),
    field_spec("employee_count", FieldRule::NumericRange { tolerance: 0.10 }),
    field_spec("annual_revenue", FieldRule::NumericRange { tolerance: 0.10 }),
    field_spec("founded_year", FieldRule::NumericRange { tolerance: 0.0 }),
];

pub fn field_rule(name: &str) -> Option<FieldRule> {
    VOCABULARY.iter().find(|s| s.name == name).map(|s| s.rule)
}

pub fn is_known_field(name: &str) -> bool {
    field_rule(name).is_some()
}

pub fn vocabulary_names() -> impl Iterator<Item = &'static str> {
    VOCABULARY.iter().map(|s| s.name)
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// Placeholder strings collectors emit instead of leaving a field empty.
const ABSENT_SENTINELS: &[&str] = &["not_found", "not found", "n/a", "na", "none", "null", "unknown", "-"];

const MAX_DESCRIPTION_CHARS: usize = 500;

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a raw collector value. Returns `None` when the value carries no
/// information (empty, a sentinel, or malformed for its rule).
pub fn clean_value(rule: Option<FieldRule>, raw: &str) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    if collapsed.is_empty() {
        return None;
    }
    let lowered = collapsed.to_lowercase();
    if ABSENT_SENTINELS.contains(&lowered.as_str()) {
        return None;
    }

    match rule {
        Some(FieldRule::ExactNormalized(KeyForm::Email)) => {
            let (local, domain) = lowered.split_once('@')?;
            if local.is_empty() || !domain.contains('.') || domain.ends_with('.') {
                return None;
            }
            Some(lowered)
        }
        Some(FieldRule::ExactNormalized(KeyForm::Website)) => {
            let key = website_key(&collapsed);
            if !key.contains('.') || key.contains(' ') {
                return None;
            }
            Some(collapsed)
        }
        Some(FieldRule::ExactNormalized(KeyForm::Phone)) => {
            if collapsed.chars().any(|c| c.is_ascii_digit()) {
                Some(collapsed)
            } else {
                None
            }
        }
        _ => Some(collapsed),
    }
}

/// Whitespace-collapsed, case-folded form. Two values with equal light keys
/// are considered identical (`exact` agreement).
pub fn light_key(value: &str) -> String {
    collapse_whitespace(value).to_lowercase()
}

// ---------------------------------------------------------------------------
// Canonical keys
// ---------------------------------------------------------------------------

/// Field-specific canonical key. Unknown fields fall back to the light key.
pub fn canonical(rule: Option<FieldRule>, value: &str) -> String {
    match rule {
        Some(FieldRule::StringSimilarity(TextForm::BusinessName)) => canonical_business_name(value),
        Some(FieldRule::StringSimilarity(TextForm::Address)) => canonical_address(value),
        Some(FieldRule::StringSimilarity(_)) => alnum_words(value).join(" "),
        Some(FieldRule::ExactNormalized(KeyForm::Phone)) => phone_digits(value),
        Some(FieldRule::ExactNormalized(KeyForm::Website)) => website_key(value),
        Some(FieldRule::ExactNormalized(KeyForm::Email)) => value.trim().to_lowercase(),
        Some(FieldRule::ExactNormalized(KeyForm::PostalCode)) => postal_code(value),
        Some(FieldRule::ExactNormalized(KeyForm::Code)) => value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase(),
        Some(FieldRule::NumericRange { .. }) => match parse_number(value) {
            Some(n) => format!("{n}"),
            None => light_key(value),
        },
        None => light_key(value),
    }
}

fn alnum_words(value: &str) -> Vec<String> {
    value
        .to_lowercase()
        .replace('&', " and ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "corp", "corporation", "co", "company", "ltd", "limited", "lp", "llp", "pllc", "pc",
];

pub fn canonical_business_name(value: &str) -> String {
    // "L.L.C." splits into single letters; glue runs of one-letter tokens back together.
    let mut words: Vec<String> = Vec::new();
    let mut run = String::new();
    for w in alnum_words(value) {
        if w.chars().count() == 1 {
            run.push_str(&w);
        } else {
            if !run.is_empty() {
                words.push(std::mem::take(&mut run));
            }
            words.push(w);
        }
    }
    if !run.is_empty() {
        words.push(run);
    }

    if words.first().map(|w| w == "the").unwrap_or(false) && words.len() > 1 {
        words.remove(0);
    }
    while words.len() > 1 && words.last().map(|w| LEGAL_SUFFIXES.contains(&w.as_str())).unwrap_or(false) {
        words.pop();
    }
    words.join(" ")
}

const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("road", "rd"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("court", "ct"),
    ("circle", "cir"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("square", "sq"),
    ("terrace", "ter"),
    ("suite", "ste"),
    ("apartment", "apt"),
    ("floor", "fl"),
    ("building", "bldg"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("northeast", "ne"),
    ("northwest", "nw"),
    ("southeast", "se"),
    ("southwest", "sw"),
];

pub fn canonical_address(value: &str) -> String {
    alnum_words(value)
        .into_iter()
        .map(|w| {
            ADDRESS_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == w)
                .map(|(_, short)| (*short).to_string())
                .unwrap_or(w)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Digits only; a leading US country code on an 11-digit number is dropped.
pub fn phone_digits(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Host + path, lower-cased, without scheme, `www.`, query or trailing slash.
pub fn website_key(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let no_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let no_www = no_scheme.strip_prefix("www.").unwrap_or(no_scheme);
    let end = no_www.find(['?', '#']).unwrap_or(no_www.len());
    no_www[..end].trim_end_matches('/').to_string()
}

/// First five digits (US ZIP), or the alphanumeric upper-cased code otherwise.
pub fn postal_code(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 5 && value.trim().chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        digits[..5].to_string()
    } else {
        value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }
}

/// Last five-digit token of an address, if any.
pub fn zip_from_address(value: &str) -> Option<String> {
    value
        .split(|c: char| !c.is_ascii_digit() && c != '-')
        .filter_map(|tok| {
            let head = tok.split('-').next().unwrap_or("");
            (head.len() == 5 && head.chars().all(|c| c.is_ascii_digit())).then(|| head.to_string())
        })
        .last()
}

/// Parse a numeric value as collectors report it:
/// - Strip `$`, commas, whitespace
/// - Handle `(123)` -> `-123`
/// - Allow a trailing `+` ("200+ employees" style ranges report the floor)
/// - Returns None if non-numeric characters remain after stripping
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim().trim_end_matches('+');
    if trimmed.is_empty() {
        return None;
    }

    let (is_negative, inner) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    for (i, c) in cleaned.chars().enumerate() {
        match c {
            '0'..='9' | '.' => {}
            '-' | '+' if i == 0 && !is_negative => {}
            _ => return None,
        }
    }

    let value: f64 = cleaned.parse().ok()?;
    Some(if is_negative { -value } else { value })
}

// ---------------------------------------------------------------------------
// Display forms
// ---------------------------------------------------------------------------

/// Presentation form of a cleaned value, as handed to the exporter.
pub fn display(rule: Option<FieldRule>, value: &str) -> String {
    match rule {
        Some(FieldRule::StringSimilarity(TextForm::BusinessName)) => display_business_name(value),
        Some(FieldRule::StringSimilarity(TextForm::Description)) => truncate_description(value),
        Some(FieldRule::ExactNormalized(KeyForm::Phone)) => {
            let digits = phone_digits(value);
            if digits.len() == 10 {
                format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
            } else {
                collapse_whitespace(value)
            }
        }
        Some(FieldRule::ExactNormalized(KeyForm::Website)) => format!("https://{}", website_key(value)),
        Some(FieldRule::ExactNormalized(KeyForm::Email)) => value.trim().to_lowercase(),
        Some(FieldRule::ExactNormalized(KeyForm::PostalCode)) => postal_code(value),
        Some(FieldRule::ExactNormalized(KeyForm::Code)) => collapse_whitespace(value).to_uppercase(),
        _ => collapse_whitespace(value),
    }
}

const SUFFIX_CASING: &[(&str, &str)] = &[
    ("inc", "Inc."),
    ("inc.", "Inc."),
    ("llc", "LLC"),
    ("l.l.c.", "LLC"),
    ("corp", "Corp."),
    ("corp.", "Corp."),
    ("ltd", "Ltd."),
    ("ltd.", "Ltd."),
    ("co.", "Co."),
];

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// All-lowercase names are title-cased; otherwise the source's casing is kept.
/// A trailing legal suffix always gets its standard form.
fn display_business_name(value: &str) -> String {
    let title_case = !value.chars().any(char::is_uppercase);
    let mut words: Vec<String> = value
        .split_whitespace()
        .map(|w| if title_case { capitalize(w) } else { w.to_string() })
        .collect();
    if let Some(last) = words.last_mut() {
        let lowered = last.to_lowercase();
        if let Some((_, cased)) = SUFFIX_CASING.iter().find(|(raw, _)| *raw == lowered) {
            *last = (*cased).to_string();
        }
    }
    words.join(" ")
}

fn truncate_description(value: &str) -> String {
    let cleaned = collapse_whitespace(value);
    if cleaned.chars().count() <= MAX_DESCRIPTION_CHARS {
        return cleaned;
    }
    let mut out: String = cleaned.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Similarity in [0, 1] between two canonical keys. Symmetric by construction.
pub fn field_similarity(rule: FieldRule, a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    match rule {
        FieldRule::StringSimilarity(_) => {
            if a == b {
                1.0
            } else {
                normalized_levenshtein(a, b)
            }
        }
        FieldRule::ExactNormalized(_) => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        FieldRule::NumericRange { tolerance } => {
            if numbers_within(a, b, tolerance) {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Whether two canonical keys are near-equal for `close` agreement.
pub fn values_close(rule: FieldRule, a: &str, b: &str, close_similarity: f64) -> bool {
    if a == b {
        return true;
    }
    match rule {
        FieldRule::StringSimilarity(_) => field_similarity(rule, a, b) >= close_similarity,
        FieldRule::ExactNormalized(_) => false,
        FieldRule::NumericRange { tolerance } => numbers_within(a, b, tolerance),
    }
}

fn numbers_within(a: &str, b: &str, tolerance: f64) -> bool {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= tolerance * x.abs().max(y.abs()),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_absent() {
        assert_eq!(clean_value(None, "NOT_FOUND"), None);
        assert_eq!(clean_value(None, "   "), None);
        assert_eq!(clean_value(None, "n/a"), None);
        assert_eq!(clean_value(None, "  Acme   Internet "), Some("Acme Internet".into()));
    }

    #[test]
    fn malformed_email_and_website_are_absent() {
        let email = field_rule("general_email");
        assert_eq!(clean_value(email, "info@acme"), None);
        assert_eq!(clean_value(email, "Info@Acme.com"), Some("info@acme.com".into()));
        let web = field_rule("website");
        assert_eq!(clean_value(web, "not a site"), None);
        assert!(clean_value(web, "acme.com").is_some());
    }

    #[test]
    fn phone_formats_share_a_key() {
        let rule = field_rule("phone_number");
        let a = canonical(rule, "(555) 123-4567");
        let b = canonical(rule, "555.123.4567");
        let c = canonical(rule, "+1 555 123 4567");
        assert_eq!(a, "5551234567");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(display(rule, "555.123.4567"), "(555) 123-4567");
    }

    #[test]
    fn website_key_strips_scheme_and_www() {
        assert_eq!(website_key("https://www.Acme.com/"), "acme.com");
        assert_eq!(website_key("http://acme.com/about?x=1"), "acme.com/about");
        assert_eq!(display(field_rule("website"), "www.acme.com"), "https://acme.com");
    }

    #[test]
    fn business_name_drops_legal_suffix() {
        assert_eq!(canonical_business_name("Acme Internet, Inc."), "acme internet");
        assert_eq!(canonical_business_name("ACME INTERNET LLC"), "acme internet");
        assert_eq!(canonical_business_name("Acme Internet L.L.C."), "acme internet");
        assert_eq!(canonical_business_name("The Company"), "company");
        assert_eq!(display(field_rule("business_name"), "acme internet inc."), "Acme Internet Inc.");
    }

    #[test]
    fn business_name_display_keeps_source_casing() {
        let rule = field_rule("business_name");
        assert_eq!(display(rule, "ACME internet inc"), "ACME internet Inc.");
        assert_eq!(display(rule, "blue  ridge broadband llc"), "Blue Ridge Broadband LLC");
        assert_eq!(display(rule, "eBay Fiber"), "eBay Fiber");
    }

    #[test]
    fn address_abbreviations() {
        assert_eq!(
            canonical_address("100 North Main Street, Suite 4"),
            canonical_address("100 N. Main St. Ste 4")
        );
        assert_eq!(zip_from_address("100 Main St, Raleigh, NC 27601-1234"), Some("27601".into()));
        assert_eq!(zip_from_address("100 Main St"), None);
    }

    #[test]
    fn parse_number_variants() {
        assert_eq!(parse_number("1,200"), Some(1200.0));
        assert_eq!(parse_number("$3,000"), Some(3000.0));
        assert_eq!(parse_number("200+"), Some(200.0));
        assert_eq!(parse_number("(50)"), Some(-50.0));
        assert_eq!(parse_number("about 50"), None);
    }

    #[test]
    fn numeric_range_closeness() {
        let rule = field_rule("employee_count").unwrap();
        assert!(values_close(rule, "100", "108", 0.9));
        assert!(!values_close(rule, "100", "150", 0.9));
        let year = field_rule("founded_year").unwrap();
        assert!(!values_close(year, "1998", "1999", 0.9));
    }

    #[test]
    fn similarity_is_symmetric_and_zero_on_empty() {
        let rule = field_rule("business_name").unwrap();
        let a = canonical_business_name("Acme Internet");
        let b = canonical_business_name("Acme Internets");
        assert_eq!(field_similarity(rule, &a, &b), field_similarity(rule, &b, &a));
        assert_eq!(field_similarity(rule, "", ""), 0.0);
    }

    #[test]
    fn description_is_truncated() {
        let long = "x".repeat(600);
        let out = display(field_rule("business_description"), &long);
        assert_eq!(out.chars().count(), 500);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn unknown_fields_have_no_rule() {
        assert!(field_rule("favorite_color").is_none());
        assert!(is_known_field("industry_classification"));
        assert_eq!(vocabulary_names().count(), VOCABULARY.len());
    }
}
