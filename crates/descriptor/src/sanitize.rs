//! String sanitization for storage filenames.

use regex::Regex;
use std::sync::LazyLock;

static INVALID_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[/\\:*?"<>| ]"#).unwrap());

const MAX_LENGTH: usize = 255;

/// Sanitize a string into a valid, lowercase filename fragment.
///
/// Replaces `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|` and spaces with
/// underscores, lowercases the result, and truncates it to 255 bytes.
///
/// # Examples
///
/// ```
/// use corral_descriptor::sanitize_string;
/// assert_eq!(sanitize_string("Example: Invalid/File*Name?"), "example__invalid_file_name_");
/// ```
pub fn sanitize_string(string: &str) -> String {
    let mut sanitized = INVALID_CHARS.replace_all(string, "_").to_lowercase();
    if sanitized.len() > MAX_LENGTH {
        // Truncate on a character boundary.
        let mut end = MAX_LENGTH;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }
    sanitized
}
