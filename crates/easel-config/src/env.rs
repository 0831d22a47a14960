use std::sync::OnceLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in a raw TOML string
///
/// An optional fallback is supported via `{{ env.VAR | default("value") }}`.
/// TOML comment lines pass through untouched, so a commented-out secret does
/// not fail the load.
pub fn expand_env(input: &str) -> Result<String, String> {
    expand_with(input, |var| std::env::var(var).ok())
}

/// Expansion with an injectable variable source, for tests
fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String, String> {
    fn re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
                .expect("must be valid regex")
        })
    }

    let mut output = String::with_capacity(input.len());

    for line in input.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut last_end = 0;
        for captures in re().captures_iter(line) {
            let whole = captures.get(0).expect("match exists");
            let var = &captures[1];
            let fallback = captures.get(2).map(|m| m.as_str());

            output.push_str(&line[last_end..whole.start()]);
            match lookup(var).or_else(|| fallback.map(str::to_owned)) {
                Some(value) => output.push_str(&value),
                None => return Err(format!("environment variable not found: `{var}`")),
            }
            last_end = whole.end();
        }
        output.push_str(&line[last_end..]);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_owned())
        }
    }

    #[test]
    fn plain_text_unchanged() {
        let input = "key = \"value\"\n";
        assert_eq!(expand_with(input, vars(&[])).unwrap(), input);
    }

    #[test]
    fn variable_substituted() {
        let out = expand_with("key = \"{{ env.API_KEY }}\"", vars(&[("API_KEY", "sk-1")])).unwrap();
        assert_eq!(out, "key = \"sk-1\"");
    }

    #[test]
    fn missing_variable_errors() {
        let err = expand_with("key = \"{{ env.NOPE }}\"", vars(&[])).unwrap_err();
        assert!(err.contains("NOPE"));
    }

    #[test]
    fn fallback_used_when_unset() {
        let out = expand_with(r#"key = "{{ env.NOPE | default("x") }}""#, vars(&[])).unwrap();
        assert_eq!(out, "key = \"x\"");
    }

    #[test]
    fn fallback_ignored_when_set() {
        let out = expand_with(
            r#"key = "{{ env.SET | default("x") }}""#,
            vars(&[("SET", "real")]),
        )
        .unwrap();
        assert_eq!(out, "key = \"real\"");
    }

    #[test]
    fn comments_skip_expansion() {
        let input = "# key = \"{{ env.NOPE }}\"\nother = 1\n";
        assert_eq!(expand_with(input, vars(&[])).unwrap(), input);
    }

    #[test]
    fn process_env_is_read() {
        temp_env::with_var("EASEL_TEST_VAR", Some("ok"), || {
            let out = expand_env("key = \"{{ env.EASEL_TEST_VAR }}\"").unwrap();
            assert_eq!(out, "key = \"ok\"");
        });
    }
}
