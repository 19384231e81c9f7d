//! LIKE pattern escaping
//!
//! Search text is embedded between `%` wildcards, so literal `%`, `_` and the
//! escape character itself must be neutralized first. Generated predicates
//! declare the escape character with `ESCAPE '\'`.

/// Escape character used in every generated LIKE predicate.
pub const LIKE_ESCAPE_CHAR: char = '\\';

/// SQL suffix declaring [`LIKE_ESCAPE_CHAR`].
pub const LIKE_ESCAPE_SQL: &str = "ESCAPE '\\'";

/// Escape `%`, `_` and `\` so they match literally inside a LIKE pattern.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE_CHAR) {
            out.push(LIKE_ESCAPE_CHAR);
        }
        out.push(c);
    }
    out
}

/// Build a "contains" pattern: `%<escaped>%`.
pub fn contains_pattern(input: &str) -> String {
    format!("%{}%", escape_like(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(escape_like("alice"), "alice");
    }

    #[test]
    fn test_wildcards_escaped() {
        assert_eq!(escape_like("50%"), "50\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("c:\\dir"), "c:\\\\dir");
    }

    #[test]
    fn test_contains_pattern() {
        assert_eq!(contains_pattern("50%"), "%50\\%%");
    }
}
