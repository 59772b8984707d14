//! Header mapping: arbitrary CSV headers (often whole Google Form questions)
//! onto canonical fields.

use oua_core::{CanonicalField, ColumnMapping};
use tracing::debug;

/// Substring aliases shorter than this never match inside a longer header.
const MIN_SUBSTRING_ALIAS_LEN: usize = 4;

/// Alias lists per field.
pub const FIELD_ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::University,
        &[
            "university",
            "school",
            "institution",
            "uni",
            "college",
            "which university",
            "what university",
            "university was this",
        ],
    ),
    (
        // "which program" is left out: it appears inside status and comment questions.
        CanonicalField::ProgramName,
        &[
            "program name",
            "program_title",
            "what program",
            "program",
            "major",
            "plan",
            "specialization",
        ],
    ),
    (
        CanonicalField::OuacCode,
        &[
            "ouac code",
            "ouac_code",
            "ouac program code",
            "ouacprogramcode",
            "program code",
            "ouac",
            "code",
        ],
    ),
    (
        CanonicalField::AdmissionGrade,
        &[
            "acceptance average",
            "admission average",
            "admission avg",
            "average when accepted",
            "what was your average",
            "final average",
            "final avg",
            "admission_grade",
            "avg",
            "average",
            "cutoff",
            "grade",
        ],
    ),
    (
        CanonicalField::AdmissionDate,
        &[
            "what date did you receive",
            "what date was the offer",
            "date of offer",
            "offer date",
            "date received",
            "date admitted",
            "date offered",
            "decision date",
            "admission date",
            "admit date",
            "admission_date",
            "decision_date",
            "month",
            "round",
            "date",
        ],
    ),
    (
        CanonicalField::Status,
        &[
            "accepted rejected waitlisted",
            "were you accepted",
            "accepted waitlisted deferred",
            "offer rejection deferral",
            "admission status",
            "offer status",
            "admit_status",
            "admission_decision",
            "status",
            "decision",
            "result",
        ],
    ),
    (
        CanonicalField::SupplementalRequired,
        &[
            "supplemental required",
            "supplemental_required",
            "supplemental req",
            "supplemental application",
            "supplemental_app",
            "supplemental requirement",
            "supplemental",
        ],
    ),
];

pub fn aliases_for(field: CanonicalField) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// Lowercase and drop everything that is not an ASCII letter or digit.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolve every canonical field against `headers`.
///
/// Fields are resolved in [`CanonicalField::ALL`] order. For each field an exact
/// alias match among unclaimed headers wins; only if there is none do
/// substring matches apply, longest alias first. A header claimed by an
/// earlier field is invisible to later ones.
pub fn map_columns<S: AsRef<str>>(headers: &[S]) -> ColumnMapping {
    let normalized: Vec<(&str, String)> = headers
        .iter()
        .map(|h| (h.as_ref(), normalize_header(h.as_ref())))
        .collect();
    let mut mapping = ColumnMapping::new();

    for field in CanonicalField::ALL {
        let aliases = aliases_for(field);
        let available: Vec<&(&str, String)> = normalized
            .iter()
            .filter(|(raw, _)| !mapping.claims(raw))
            .collect();

        let exact = aliases.iter().find_map(|alias| {
            let norm_alias = normalize_header(alias);
            available
                .iter()
                .find(|(_, norm)| *norm == norm_alias)
                .map(|(raw, _)| *raw)
        });

        let found = exact.or_else(|| {
            let mut by_length: Vec<&str> = aliases.to_vec();
            by_length.sort_by(|a, b| b.len().cmp(&a.len()));
            by_length.into_iter().find_map(|alias| {
                let norm_alias = normalize_header(alias);
                if norm_alias.len() < MIN_SUBSTRING_ALIAS_LEN {
                    return None;
                }
                available
                    .iter()
                    .find(|(_, norm)| norm.contains(&norm_alias))
                    .map(|(raw, _)| *raw)
            })
        });

        if let Some(header) = found {
            debug!(%field, header, "mapped column");
            mapping.insert(field, header);
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias_beats_earlier_substring_header() {
        let mapping = map_columns(&["Average", "Admission Average"]);
        assert_eq!(
            mapping.get(CanonicalField::AdmissionGrade),
            Some("Admission Average")
        );
    }

    #[test]
    fn grade_alias_list_has_both_exact_and_substring_forms() {
        let aliases = aliases_for(CanonicalField::AdmissionGrade);
        assert!(aliases.contains(&"admission average"));
        assert!(aliases.contains(&"average"));
    }

    #[test]
    fn google_form_questions_map_by_substring() {
        let headers = [
            "Timestamp",
            "Which university was this offer from?",
            "What program did you get into?",
            "What was your average when accepted? (top 6)",
            "What date did you receive your offer?",
            "OUAC Program Code (if known)",
        ];
        let mapping = map_columns(&headers);
        assert_eq!(
            mapping.get(CanonicalField::University),
            Some("Which university was this offer from?")
        );
        assert_eq!(
            mapping.get(CanonicalField::ProgramName),
            Some("What program did you get into?")
        );
        assert_eq!(
            mapping.get(CanonicalField::AdmissionGrade),
            Some("What was your average when accepted? (top 6)")
        );
        assert_eq!(
            mapping.get(CanonicalField::AdmissionDate),
            Some("What date did you receive your offer?")
        );
        assert_eq!(
            mapping.get(CanonicalField::OuacCode),
            Some("OUAC Program Code (if known)")
        );
        assert_eq!(mapping.get(CanonicalField::Status), None);
    }

    #[test]
    fn claimed_header_is_not_reused_by_later_fields() {
        // "program code" would satisfy the program-name substring alias too,
        // but program_name resolves first and takes the exact header.
        let mapping = map_columns(&["Program", "Program Code"]);
        assert_eq!(mapping.get(CanonicalField::ProgramName), Some("Program"));
        assert_eq!(mapping.get(CanonicalField::OuacCode), Some("Program Code"));

        let single = map_columns(&["Program Code"]);
        assert_eq!(single.get(CanonicalField::ProgramName), Some("Program Code"));
        assert_eq!(single.get(CanonicalField::OuacCode), None);
    }

    #[test]
    fn short_aliases_only_match_exactly() {
        let mapping = map_columns(&["Favourite Avgerage Unicorn"]);
        assert_eq!(mapping.get(CanonicalField::University), None);
        assert_eq!(mapping.get(CanonicalField::AdmissionGrade), None);

        let exact = map_columns(&["Uni", "Avg"]);
        assert_eq!(exact.get(CanonicalField::University), Some("Uni"));
        assert_eq!(exact.get(CanonicalField::AdmissionGrade), Some("Avg"));
    }

    #[test]
    fn header_normalization_strips_punctuation_and_case() {
        assert_eq!(normalize_header("OUAC_Code (e.g. WCS)"), "ouaccodeegwcs");
    }
}
