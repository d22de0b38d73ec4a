//! # TLD Extraction
//!
//! The shared top-level-domain rule used by the statistics engine, the
//! timeline engine, and the TLD risk detector. This is deliberately a
//! fixed two-label heuristic, not a public-suffix-list lookup: it
//! under-groups multi-label ccSLDs, but it is cheap, deterministic, and
//! matches what the campaign dumps themselves group by.

/// Extract the TLD of a host per the two-label rule.
///
/// Split the host on `.`; with two or more labels the TLD is `.` plus the
/// last two labels joined by `.`. A single-label host (e.g. "localhost")
/// is returned unchanged.
///
/// # Examples
/// ```
/// use strikewatch::tld::extract_tld;
/// assert_eq!(extract_tld("mail.example.gov.lv"), ".gov.lv");
/// assert_eq!(extract_tld("localhost"), "localhost");
/// ```
pub fn extract_tld(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        format!(".{}.{}", labels[labels.len() - 2], labels[labels.len() - 1])
    } else {
        host.to_string()
    }
}

/// Whether an extracted TLD counts as high-risk against the allowlist.
///
/// The two-label rule can never produce a bare `.gov` for a multi-label
/// host (it yields `.example.gov`), so exact matching would make
/// single-label allowlist entries dead. A TLD therefore matches when it
/// equals an entry or ends with one. Note `.gov.lv` does NOT match
/// `.gov`: the suffix comparison is against the allowlist entry, and
/// `.gov.lv` ends in `.lv`.
pub fn is_high_risk(tld: &str, allowlist: &[String]) -> bool {
    allowlist
        .iter()
        .any(|risk| tld == risk || tld.ends_with(risk.as_str()))
}
