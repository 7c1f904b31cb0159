//! Text cleanup for feed values.
//!
//! Upstream feeds mix casing, pad values with runs of whitespace and
//! non-breaking spaces, and re-crawls of the same page can differ only in
//! casing. Everything written to the store passes through here first.

/// Honorific prefixes the roster puts in front of names, longest first.
const HONORIFICS: &[&str] = &[
    "the right honourable ",
    "the honourable ",
    "right hon. ",
    "rt. hon. ",
    "hon. ",
];

/// Statistics Canada province/territory codes (PRUID) and postal abbreviations.
const PROVINCES: &[(&str, &str, &str)] = &[
    ("10", "NL", "Newfoundland and Labrador"),
    ("11", "PE", "Prince Edward Island"),
    ("12", "NS", "Nova Scotia"),
    ("13", "NB", "New Brunswick"),
    ("24", "QC", "Quebec"),
    ("35", "ON", "Ontario"),
    ("46", "MB", "Manitoba"),
    ("47", "SK", "Saskatchewan"),
    ("48", "AB", "Alberta"),
    ("59", "BC", "British Columbia"),
    ("60", "YT", "Yukon"),
    ("61", "NT", "Northwest Territories"),
    ("62", "NU", "Nunavut"),
];

/// Trim and collapse every run of whitespace (including NBSP) to one space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Capitalize the first letter of each word and lowercase the rest.
/// Hyphens, apostrophes and opening parentheses start a new word.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_word_start = c.is_whitespace() || matches!(c, '-' | '\'' | '’' | '(' | '/');
    }
    out
}

/// Full cleanup for names and place names.
pub fn sanitize(s: &str) -> String {
    title_case(&collapse_whitespace(s))
}

/// Whitespace-only cleanup for labels whose casing is meaningful (caucus
/// abbreviations, bill titles, statuses).
pub fn sanitize_label(s: &str) -> String {
    collapse_whitespace(s)
}

/// Pick the value to store for a field re-read from a feed.
///
/// If the stored value and the incoming value sanitize to the same text the
/// stored value wins, so an already-clean `McDonald` is not rewritten to
/// `Mcdonald` by every crawl. Otherwise the sanitized incoming value replaces it.
pub fn smart_merge(stored: Option<&str>, incoming: &str, clean: fn(&str) -> String) -> String {
    let incoming_clean = clean(incoming);
    match stored {
        Some(existing) if clean(existing) == incoming_clean => existing.to_string(),
        _ => incoming_clean,
    }
}

/// `smart_merge` for optional fields: a missing incoming value keeps what is stored.
pub fn smart_merge_opt(
    stored: Option<&str>,
    incoming: Option<&str>,
    clean: fn(&str) -> String,
) -> Option<String> {
    match incoming.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => Some(smart_merge(stored, value, clean)),
        None => stored.map(String::from),
    }
}

/// Remove a leading honorific such as `Hon.` or `The Right Honourable`.
pub fn strip_honorific(name: &str) -> String {
    let collapsed = collapse_whitespace(name);
    let lower = collapsed.to_lowercase();
    for prefix in HONORIFICS {
        if lower.starts_with(prefix) {
            return collapsed[prefix.len()..].trim().to_string();
        }
    }
    collapsed
}

/// Split a display name into `(first, last)`.
///
/// Accepts `"Last, First"` (expenditure reports) and `"First Last"` (everything
/// else); in the latter the final token is the last name.
pub fn split_full_name(raw: &str) -> Option<(String, String)> {
    let name = strip_honorific(raw);
    if let Some((last, first)) = name.split_once(',') {
        let (first, last) = (first.trim(), last.trim());
        if first.is_empty() || last.is_empty() {
            return None;
        }
        return Some((first.to_string(), last.to_string()));
    }
    let (first, last) = name.rsplit_once(' ')?;
    Some((first.trim().to_string(), last.trim().to_string()))
}

/// Key used for name-based lookups: case-folded `"first last"`.
pub fn name_key(first: &str, last: &str) -> String {
    collapse_whitespace(&format!("{first} {last}")).to_lowercase()
}

/// Map a province code, abbreviation or name to its canonical name.
pub fn province_name(raw: &str) -> String {
    let value = collapse_whitespace(raw);
    for (code, abbrev, name) in PROVINCES {
        if value == *code || value.eq_ignore_ascii_case(abbrev) || value.eq_ignore_ascii_case(name) {
            return name.to_string();
        }
    }
    sanitize(&value)
}

/// Parse a disclosure amount such as `$1,234.56`, `(12.00)` or `-5` into cents.
pub fn parse_money_cents(raw: &str) -> Option<i64> {
    let mut value = collapse_whitespace(raw);
    if value.is_empty() {
        return None;
    }
    let mut negative = false;
    if value.starts_with('(') && value.ends_with(')') {
        negative = true;
        value = value[1..value.len() - 1].to_string();
    }
    let cleaned: String = value.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
    let cleaned = match cleaned.strip_prefix('-') {
        Some(rest) => {
            negative = !negative;
            rest.to_string()
        }
        None => cleaned,
    };

    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let cents = whole.checked_mul(100)?.checked_add(frac_cents)?;
    Some(if negative { -cents } else { cents })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_mixed_whitespace() {
        assert_eq!(collapse_whitespace("  Saint-Laurent\u{a0}\u{a0} (Quebec)\n"), "Saint-Laurent (Quebec)");
    }

    #[test]
    fn title_cases_hyphens_and_apostrophes() {
        assert_eq!(title_case("JEAN-YVES DUCLOS"), "Jean-Yves Duclos");
        assert_eq!(title_case("erin o'toole"), "Erin O'Toole");
        assert_eq!(sanitize("  ottawa   centre "), "Ottawa Centre");
    }

    #[test]
    fn smart_merge_keeps_clean_stored_casing() {
        assert_eq!(smart_merge(Some("McDonald"), "MCDONALD", sanitize), "McDonald");
        assert_eq!(smart_merge(Some("McDonald"), "  mcdonald ", sanitize), "McDonald");
    }

    #[test]
    fn smart_merge_replaces_changed_values() {
        assert_eq!(smart_merge(Some("Ottawa Centre"), "OTTAWA SOUTH", sanitize), "Ottawa South");
        assert_eq!(smart_merge(None, "ottawa south", sanitize), "Ottawa South");
    }

    #[test]
    fn smart_merge_is_stable_across_repeated_crawls() {
        let first = smart_merge(None, "LAC-SAINT-JEAN", sanitize);
        let second = smart_merge(Some(&first), "lac-saint-jean", sanitize);
        let third = smart_merge(Some(&second), "Lac-Saint-Jean", sanitize);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn smart_merge_opt_keeps_stored_when_incoming_missing() {
        assert_eq!(
            smart_merge_opt(Some("mp@parl.gc.ca"), None, sanitize_label),
            Some("mp@parl.gc.ca".to_string())
        );
        assert_eq!(smart_merge_opt(None, Some("  "), sanitize_label), None);
    }

    #[test]
    fn strips_honorifics() {
        assert_eq!(strip_honorific("The Right Honourable Justin Trudeau"), "Justin Trudeau");
        assert_eq!(strip_honorific("Hon.  Chrystia Freeland"), "Chrystia Freeland");
        assert_eq!(strip_honorific("Elizabeth May"), "Elizabeth May");
    }

    #[test]
    fn splits_names_in_both_orders() {
        assert_eq!(split_full_name("Smith, John"), Some(("John".into(), "Smith".into())));
        assert_eq!(split_full_name("Hon. Mary Ng"), Some(("Mary".into(), "Ng".into())));
        assert_eq!(split_full_name("Jean-Yves Duclos"), Some(("Jean-Yves".into(), "Duclos".into())));
        assert_eq!(split_full_name("Cher"), None);
    }

    #[test]
    fn name_key_is_case_and_space_insensitive() {
        assert_eq!(name_key(" John ", "SMITH"), "john smith");
    }

    #[test]
    fn maps_province_codes() {
        assert_eq!(province_name("35"), "Ontario");
        assert_eq!(province_name("qc"), "Quebec");
        assert_eq!(province_name("NUNAVUT"), "Nunavut");
        assert_eq!(province_name("atlantis"), "Atlantis");
    }

    #[test]
    fn parses_disclosure_amounts() {
        assert_eq!(parse_money_cents("$1,234.56"), Some(123_456));
        assert_eq!(parse_money_cents("(12.50)"), Some(-1_250));
        assert_eq!(parse_money_cents("-5"), Some(-500));
        assert_eq!(parse_money_cents("0.5"), Some(50));
        assert_eq!(parse_money_cents("n/a"), None);
        assert_eq!(parse_money_cents(""), None);
        assert_eq!(parse_money_cents("1.234"), None);
    }
}
