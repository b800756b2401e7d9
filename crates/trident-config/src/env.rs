use std::{borrow::Cow, sync::OnceLock};

use regex::{Captures, Regex};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `{{ env.NAME }}` or `{{ env.NAME | default("value") }}`
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([A-Za-z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\)\s*)?\}\}"#).expect("valid placeholder regex")
    })
}

/// Substitute `{{ env.NAME }}` placeholders in raw TOML text
///
/// A `| default("value")` suffix supplies the text used when the variable is
/// unset. Comment lines are left untouched so disabled settings never fail
/// expansion.
pub fn expand_env(input: &str) -> Result<String, String> {
    let mut lines = Vec::new();

    for line in input.split('\n') {
        if line.trim_start().starts_with('#') {
            lines.push(Cow::Borrowed(line));
            continue;
        }

        let mut failure = None;
        let expanded = placeholder().replace_all(line, |caps: &Captures<'_>| match resolve(caps) {
            Ok(value) => value,
            Err(message) => {
                failure.get_or_insert(message);
                String::new()
            }
        });

        if let Some(message) = failure {
            return Err(message);
        }

        lines.push(expanded);
    }

    Ok(lines.join("\n"))
}

fn resolve(caps: &Captures<'_>) -> Result<String, String> {
    let key = &caps[1];
    let Some(name) = key.strip_prefix("env.").filter(|name| !name.contains('.')) else {
        return Err(format!("unsupported placeholder `{key}`, expected `env.NAME`"));
    };

    match (std::env::var(name), caps.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.as_str().to_owned()),
        (Err(_), None) => Err(format!("environment variable `{name}` is not set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let input = "[upstream]\nhost = \"example.com\"\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn substitutes_set_variables() {
        let vars = [("TRIDENT_TOKEN", Some("ya29.abc")), ("TRIDENT_PROJECT", Some("proj-1"))];
        temp_env::with_vars(vars, || {
            let result = expand_env("token = \"{{ env.TRIDENT_TOKEN }}\"\nproject = \"{{env.TRIDENT_PROJECT}}\"").unwrap();
            assert_eq!(result, "token = \"ya29.abc\"\nproject = \"proj-1\"");
        });
    }

    #[test]
    fn unset_variable_is_an_error() {
        temp_env::with_var_unset("TRIDENT_ABSENT", || {
            let err = expand_env("token = \"{{ env.TRIDENT_ABSENT }}\"").unwrap_err();
            assert!(err.contains("TRIDENT_ABSENT"));
        });
    }

    #[test]
    fn default_applies_only_when_unset() {
        temp_env::with_var_unset("TRIDENT_PROXY", || {
            let result = expand_env("url = \"{{ env.TRIDENT_PROXY | default(\"socks5://127.0.0.1:1080\") }}\"").unwrap();
            assert_eq!(result, "url = \"socks5://127.0.0.1:1080\"");
        });

        temp_env::with_var("TRIDENT_PROXY", Some("http://proxy:3128"), || {
            let result = expand_env("url = \"{{ env.TRIDENT_PROXY | default(\"unused\") }}\"").unwrap();
            assert_eq!(result, "url = \"http://proxy:3128\"");
        });
    }

    #[test]
    fn rejects_non_env_scopes() {
        let err = expand_env("key = \"{{ secrets.TOKEN }}\"").unwrap_err();
        assert!(err.contains("secrets.TOKEN"));
    }

    #[test]
    fn comment_lines_are_not_expanded() {
        temp_env::with_var_unset("TRIDENT_ABSENT", || {
            let input = "  # token = \"{{ env.TRIDENT_ABSENT }}\"\nkey = 1";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
