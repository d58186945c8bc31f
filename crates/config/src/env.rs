/// Replace `${ENV_VAR}` placeholders in a raw config string.
///
/// Placeholders whose variable is unset are left untouched so the parse
/// error (or downstream validation) points at the real problem.
pub fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                // Unclosed or empty placeholder, emit literally.
                out.push_str("${");
                rest = after;
            },
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        // PATH is always present; avoids mutating the test environment.
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(substitute_env("bin = ${PATH}"), format!("bin = {path}"));
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${MANIFOLD_NO_SUCH_VAR_123}"),
            "${MANIFOLD_NO_SUCH_VAR_123}"
        );
    }

    #[test]
    fn handles_unclosed_placeholder() {
        assert_eq!(substitute_env("prefix ${oops"), "prefix ${oops");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(substitute_env("no placeholders here"), "no placeholders here");
    }
}
