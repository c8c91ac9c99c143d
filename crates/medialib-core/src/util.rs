use regex::Regex;
use std::sync::OnceLock;

const SIZE_UNITS: [&str; 9] = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Human readable file size, e.g. `1.46kB`.
///
/// The unit is picked from the number of decimal digits (every three digits
/// moves one unit up) while the value is divided by powers of 1024, so
/// `1000` renders as `0.98kB`.
pub fn filesize_to_human(bytes: u64, decimals: usize) -> String {
    let digits = bytes.to_string().len();
    let factor = ((digits - 1) / 3).min(SIZE_UNITS.len() - 1);
    let value = bytes as f64 / 1024_f64.powi(factor as i32);
    format!("{:.*}{}", decimals, value, SIZE_UNITS[factor])
}

fn non_slug_chars() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").ok()).as_ref()
}

/// Lowercase, dash-separated ASCII slug of a file name.
pub fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let slug = match non_slug_chars() {
        Some(re) => re.replace_all(&lowered, "-").into_owned(),
        None => lowered
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect(),
    };
    slug.trim_matches('-').to_string()
}

/// Original client name without its extension (`report.final.pdf` → `report.final`).
pub fn strip_extension<'a>(name: &'a str, extension: &str) -> &'a str {
    if extension.is_empty() {
        return name;
    }
    let suffix_len = extension.len() + 1;
    if name.len() > suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{}", extension))
    {
        &name[..name.len() - suffix_len]
    } else {
        name
    }
}

/// Lowercased extension of a client file name, empty when there is none.
pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesize_units_follow_digit_count() {
        assert_eq!(filesize_to_human(0, 2), "0.00B");
        assert_eq!(filesize_to_human(999, 2), "999.00B");
        assert_eq!(filesize_to_human(1500, 2), "1.46kB");
        assert_eq!(filesize_to_human(10 * 1024 * 1024, 2), "10.00MB");
        assert_eq!(filesize_to_human(2048, 0), "2kB");
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  My Holiday Photo "), "my-holiday-photo");
        assert_eq!(slugify("Report_2024 (final)"), "report-2024-final");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn strip_extension_is_case_insensitive() {
        assert_eq!(strip_extension("report.final.PDF", "pdf"), "report.final");
        assert_eq!(strip_extension("README", "md"), "README");
        assert_eq!(strip_extension(".pdf", "pdf"), ".pdf");
    }

    #[test]
    fn extension_of_lowercases() {
        assert_eq!(extension_of("Clip.MOV"), "mov");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of(".env"), "");
    }
}
