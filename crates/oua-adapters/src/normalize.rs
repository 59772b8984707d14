//! Field normalizers: university, program, grade, status and supplemental flag.
//!
//! Program normalization is an ordered list of string passes. Each pass sees
//! the output of the one before it, so reordering them changes results.

use std::sync::LazyLock;

use oua_core::StatusNorm;
use regex::Regex;

use crate::rules::NormalizationRules;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid normalizer regex")
}

static WITHOUT_UNIVERSITY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\s+university\s*$"));
static LEADING_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| re(r"^[\s\-–:,/()]+"));
static DEGREE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)^(bachelor\s+of\s+(applied\s+)?science\s+|bachelor\s+of\s+|b\.(sc\.|a\.|eng\.|comp\.)?\s*|bsc\s+|ba\s+|beng\s+|bas\s+|honours\s+|honors\s+|hons\.\s+)")
});
static CODE_PREFIX: LazyLock<Regex> = LazyLock::new(|| re(r"^[A-Z]{1,4}:\s+"));
static PAREN_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\s*\([^)]*\b(co[-\s]?op|coop|co\s*operative|pey|regular|honours?|hons|bsc|ibsc|b\.sc|ba|beng|campus|mississauga|scarborough|st\.?\s*george|utsg|utm|utsc|waterloo|milton|ivey|aeo|non\s*co[-\s]?op|4[-\s]?year|direct\s*entry|including|with\s+co|[a-z]{2,5}\d)\b[^)]*\)")
});
static INLINE_MODIFIER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)[\s,\-–+/|]+\(?(co[-\s]?op(erative)?|coop|pey\s*co[-\s]?op|pey|with\s+co[-\s]?op|including\s+co[-\s]?op|and\s+regular|non[-\s]?co[-\s]?op|regular|honours?\s+co[-\s]?op|honours?|honors?|hons)\)?(\s+only)?$")
});
static CAMPUS_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)[\s,\-–]+\(?(st\.?\s*george(\s+campus)?|utm|utsc|utsg|scarborough|mississauga|waterloo\s+campus|main\s+campus)\)?$")
});
static DEGREE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)[\s,]+(bsc|b\.sc\.?|ba|b\.a\.?|beng|b\.eng\.?|ibsc|bsc\s+ibsc)$")
});
static PROGRAM_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\s+(i{1,3}|iv|v|1|2|3|4|5)(\s*[-–(].+)?$"));
static PAREN_CODE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| re(r"\s*\([A-Z][A-Z0-9]{1,5}\)$"));
static YEARS_SUFFIX: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\s*\(?\d\s*[-–]?\s*years?\)?$"));
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| re(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?"));
static SUPPLEMENTAL_TRUTHY: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)yes|1|true"));

/// Parenthesized-noise stripping is repeated this many times for nested or adjacent blocks.
const PAREN_NOISE_PASSES: usize = 5;

const ACCEPTED_VALUES: &[&str] = &[
    "accepted",
    "admitted",
    "offer accepted",
    "admit",
    "yes",
    "confirmed",
    "accept",
    "offered",
    "admission",
    "enrolled",
    "offer",
];
const REJECTED_VALUES: &[&str] = &[
    "rejected",
    "denied",
    "declined",
    "no",
    "not admitted",
    "refused",
    "not accepted",
    "not offered",
];
const WAITLISTED_VALUES: &[&str] = &[
    "waitlisted",
    "wait list",
    "wait-list",
    "wait",
    "pending",
    "deferred",
    "hold",
];

/// Lowercase, turn every run of non-alphanumerics into one space, trim.
pub fn collapse_alnum(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Canonical university name, or the cleaned input when no alias matches.
pub fn normalize_university(raw: &str, rules: &NormalizationRules) -> String {
    let cleaned = collapse_alnum(raw);
    match rules.canonical_university(&cleaned) {
        Some(canonical) => canonical.to_string(),
        None => cleaned,
    }
}

pub fn normalize_program(raw_program: &str, raw_university: &str, rules: &NormalizationRules) -> String {
    let p = raw_program.trim();
    if p.is_empty() {
        return String::new();
    }
    let p = strip_university_prefix(p, raw_university, rules);
    let p = strip_degree_prefix(&p);
    let p = strip_code_prefix(&p);
    let p = strip_paren_noise(&p);
    let p = strip_inline_modifiers(&p);
    let p = strip_campus_suffix(&p);
    let p = strip_degree_suffix(&p);
    let p = strip_program_number(&p);
    let p = strip_paren_code_suffix(&p);
    let p = strip_years_suffix(&p);
    collapse_alnum(&p)
}

/// Spellings of the university that may prefix a program string.
fn university_variants(raw_university: &str, rules: &NormalizationRules) -> Vec<String> {
    let base = raw_university.trim();
    if base.is_empty() {
        return Vec::new();
    }
    let mut variants = vec![base.to_string()];
    let without_suffix = WITHOUT_UNIVERSITY_SUFFIX.replace(base, "");
    let without_suffix = without_suffix.trim();
    if without_suffix != base {
        variants.push(without_suffix.to_string());
    }
    let canonical = normalize_university(base, rules);
    if !canonical.is_empty() && canonical != base.to_lowercase() {
        variants.push(canonical.clone());
    }
    variants.extend(rules.abbreviations_for(&canonical).iter().cloned());
    variants.retain(|v| v.chars().count() > 2);
    variants
}

/// Pass 1: "Carleton University - B. Computer Science" -> "B. Computer Science".
pub fn strip_university_prefix(program: &str, raw_university: &str, rules: &NormalizationRules) -> String {
    let program_test = collapse_alnum(program);
    for variant in university_variants(raw_university, rules) {
        let variant_norm = collapse_alnum(&variant);
        if variant_norm.len() > 3 && program_test.starts_with(&variant_norm) {
            let rest: String = program.chars().skip(variant.chars().count()).collect();
            return LEADING_SEPARATORS.replace(&rest, "").trim().to_string();
        }
    }
    program.to_string()
}

/// Pass 2: leading "Bachelor of ...", "B.Sc.", "Honours" qualifiers.
pub fn strip_degree_prefix(program: &str) -> String {
    DEGREE_PREFIX.replace(program, "").trim().to_string()
}

/// Pass 3: leading all-caps code token such as "MN: ".
pub fn strip_code_prefix(program: &str) -> String {
    CODE_PREFIX.replace(program, "").trim().to_string()
}

/// Pass 4: parenthesized co-op, honours, degree and campus blocks.
pub fn strip_paren_noise(program: &str) -> String {
    let mut p = program.to_string();
    for _ in 0..PAREN_NOISE_PASSES {
        p = PAREN_NOISE.replace_all(&p, "").trim().to_string();
    }
    p
}

/// Pass 5: trailing co-op/honours modifiers after a separator.
pub fn strip_inline_modifiers(program: &str) -> String {
    INLINE_MODIFIER.replace_all(program, "").trim().to_string()
}

/// Pass 6: trailing campus or location token.
pub fn strip_campus_suffix(program: &str) -> String {
    CAMPUS_SUFFIX.replace_all(program, "").trim().to_string()
}

/// Pass 7: trailing degree abbreviation.
pub fn strip_degree_suffix(program: &str) -> String {
    DEGREE_SUFFIX.replace_all(program, "").trim().to_string()
}

/// Pass 8: trailing ordinal or program number ("Engineering 1", "Life Sciences I - Gateway").
pub fn strip_program_number(program: &str) -> String {
    PROGRAM_NUMBER.replace(program, "").trim().to_string()
}

/// Pass 9: trailing short code in parentheses, e.g. "(CMP1)".
pub fn strip_paren_code_suffix(program: &str) -> String {
    PAREN_CODE_SUFFIX.replace(program, "").trim().to_string()
}

/// Pass 10: trailing "N years" / "(4-year)".
pub fn strip_years_suffix(program: &str) -> String {
    YEARS_SUFFIX.replace(program, "").trim().to_string()
}

/// Parse a grade cell. The valid range here is `[0, 100]`; the admission
/// floor is applied by the ingest pipeline.
pub fn normalize_grade(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let number = LEADING_NUMBER.find(trimmed)?.as_str().parse::<f64>().ok()?;
    normalize_grade_value(number)
}

pub fn normalize_grade_value(value: f64) -> Option<f64> {
    (value.is_finite() && (0.0..=100.0).contains(&value)).then_some(value)
}

pub fn normalize_status(raw: &str) -> StatusNorm {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        StatusNorm::Unknown
    } else if ACCEPTED_VALUES.contains(&value.as_str()) {
        StatusNorm::Accepted
    } else if REJECTED_VALUES.contains(&value.as_str()) {
        StatusNorm::Rejected
    } else if WAITLISTED_VALUES.contains(&value.as_str()) {
        StatusNorm::Waitlisted
    } else {
        StatusNorm::Unknown
    }
}

pub fn parse_supplemental(raw: &str) -> bool {
    SUPPLEMENTAL_TRUTHY.is_match(raw)
}
