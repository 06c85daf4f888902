// CCN normalization
// CMS Certification Numbers are 6 characters. Source files disagree on
// padding and case, so every CCN entering the system passes through here.

/// Normalize a raw CCN cell to the canonical 6-character form.
///
/// One rule, applied everywhere:
/// - trim whitespace, uppercase
/// - 1-6 digits: left-pad with zeros to width 6 ("12" -> "000012")
/// - exactly 6 alphanumerics: accepted as-is (CMS embeds letters in some
///   facility-type positions, e.g. "01300F")
/// - anything else: rejected (None)
///
/// Idempotent: feeding the output back in returns it unchanged.
pub fn normalize_ccn(raw: &str) -> Option<String> {
    let cleaned = raw.trim().to_uppercase();

    if cleaned.is_empty() {
        return None;
    }

    if cleaned.len() <= 6 && cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{:0>6}", cleaned));
    }

    if cleaned.len() == 6 && cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(cleaned);
    }

    None
}
