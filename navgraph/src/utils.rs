/// Normalize a string by removing zero-width and special Unicode whitespace characters,
/// collapsing runs of whitespace and lowercasing it.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| {
            // Remove zero-width and non-breaking spaces, but keep regular spaces
            !matches!(
                *c,
                '\u{200B}' | // zero-width space
                '\u{200C}' | // zero-width non-joiner
                '\u{200D}' | // zero-width joiner
                '\u{00A0}' | // non-breaking space
                '\u{FEFF}' // zero-width no-break space
            )
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split an identifier such as `SettingsActivity` or `com.app:id/nav_drawer`
/// into lowercase words.
pub fn split_identifier(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in s.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_invisible_characters() {
        assert_eq!(normalize("  Save\u{200B}  Note\u{00A0}"), "save note");
    }

    #[test]
    fn split_identifier_handles_camel_case_and_separators() {
        assert_eq!(
            split_identifier("com.app.ui.SettingsActivity"),
            vec!["com", "app", "ui", "settings", "activity"]
        );
        assert_eq!(
            split_identifier("com.app:id/nav_drawer_toggle"),
            vec!["com", "app", "id", "nav", "drawer", "toggle"]
        );
    }
}
