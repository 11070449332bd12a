//! Environment-variable substitution for the raw config text.
//!
//! Supports the two shell-style forms used in `pulsebot.yaml`:
//! `${VAR}` and `${VAR:-default}`. An unset variable without a default
//! expands to the empty string, so optional credentials can stay in the
//! template; section validation catches missing values for enabled features.

/// Expands `${VAR}` and `${VAR:-default}` in `input` against the process
/// environment. Text outside `${...}` passes through unchanged, including
/// lone `$` characters.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated ${...: keep literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(expr: &str) -> String {
    let (name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (expr, None),
    };
    match std::env::var(name) {
        Ok(v) => v,
        Err(_) => default.unwrap_or("").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(expand_env("host: localhost"), "host: localhost");
        assert_eq!(expand_env("cost: $5"), "cost: $5");
    }

    #[test]
    fn set_variable_is_substituted() {
        std::env::set_var("SUBST_TEST_SET", "proton");
        assert_eq!(expand_env("host: ${SUBST_TEST_SET}"), "host: proton");
        std::env::remove_var("SUBST_TEST_SET");
    }

    #[test]
    fn unset_variable_without_default_is_empty() {
        std::env::remove_var("SUBST_TEST_UNSET");
        assert_eq!(expand_env("key: ${SUBST_TEST_UNSET}"), "key: ");
    }

    #[test]
    fn unset_variable_uses_default() {
        std::env::remove_var("SUBST_TEST_DEF");
        assert_eq!(
            expand_env("port: ${SUBST_TEST_DEF:-8123}"),
            "port: 8123"
        );
    }

    #[test]
    fn set_variable_wins_over_default() {
        std::env::set_var("SUBST_TEST_WIN", "3218");
        assert_eq!(expand_env("port: ${SUBST_TEST_WIN:-8123}"), "port: 3218");
        std::env::remove_var("SUBST_TEST_WIN");
    }

    #[test]
    fn multiple_occurrences_and_unterminated() {
        std::env::set_var("SUBST_TEST_A", "a");
        std::env::set_var("SUBST_TEST_B", "b");
        assert_eq!(
            expand_env("${SUBST_TEST_A}/${SUBST_TEST_B}"),
            "a/b"
        );
        assert_eq!(expand_env("tail ${unclosed"), "tail ${unclosed");
        std::env::remove_var("SUBST_TEST_A");
        std::env::remove_var("SUBST_TEST_B");
    }

    #[test]
    fn default_may_contain_colon() {
        std::env::remove_var("SUBST_TEST_URL");
        assert_eq!(
            expand_env("${SUBST_TEST_URL:-http://localhost:8080}"),
            "http://localhost:8080"
        );
    }
}
