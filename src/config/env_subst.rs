use std::env;

/// Substitute `${VAR}` and `${VAR:-default}` references in `input` with
/// values from the process environment, applied before YAML parsing.
///
/// Unset variables without a default are replaced with an empty string.
#[must_use]
pub fn substitute(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(close) = find_matching_brace(input, i + 2) {
                let inner = &input[i + 2..close];
                out.push_str(&resolve(inner));
                i = close + 1;
                continue;
            }
        }
        out.push(input[i..].chars().next().unwrap_or('\0'));
        i += input[i..].chars().next().map_or(1, char::len_utf8);
    }
    out
}

fn find_matching_brace(input: &str, start: usize) -> Option<usize> {
    input[start..].find('}').map(|pos| start + pos)
}

fn resolve(expr: &str) -> String {
    if let Some((name, default)) = expr.split_once(":-") {
        env::var(name).unwrap_or_else(|_| default.to_string())
    } else {
        env::var(expr).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_existing_var() {
        env::set_var("ADAPTIVE_GW_TEST_VAR", "hello");
        assert_eq!(substitute("value: ${ADAPTIVE_GW_TEST_VAR}"), "value: hello");
        env::remove_var("ADAPTIVE_GW_TEST_VAR");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        env::remove_var("ADAPTIVE_GW_MISSING_VAR");
        assert_eq!(
            substitute("value: ${ADAPTIVE_GW_MISSING_VAR:-fallback}"),
            "value: fallback"
        );
    }

    #[test]
    fn empty_string_when_unset_and_no_default() {
        env::remove_var("ADAPTIVE_GW_MISSING_VAR2");
        assert_eq!(substitute("value: ${ADAPTIVE_GW_MISSING_VAR2}"), "value: ");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(substitute("plain text, no vars"), "plain text, no vars");
    }

    #[test]
    fn substitutes_multiple_occurrences() {
        env::set_var("ADAPTIVE_GW_A", "1");
        env::set_var("ADAPTIVE_GW_B", "2");
        assert_eq!(
            substitute("${ADAPTIVE_GW_A}-${ADAPTIVE_GW_B}"),
            "1-2"
        );
        env::remove_var("ADAPTIVE_GW_A");
        env::remove_var("ADAPTIVE_GW_B");
    }
}
