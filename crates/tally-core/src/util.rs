/// Reads switches such as `TALLY_LOG_ROLL=on`. Unrecognised text is `None`
/// so callers keep their default.
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    let flag = raw.trim();
    const ON: [&str; 4] = ["1", "true", "yes", "on"];
    const OFF: [&str; 4] = ["0", "false", "no", "off"];
    if ON.iter().any(|v| flag.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if OFF.iter().any(|v| flag.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

/// `None` when `key` is unset or not a recognised switch value.
pub fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|raw| parse_bool_flag(&raw))
}

/// Non-empty, trimmed value of an environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_roll_switch_values() {
        assert_eq!(parse_bool_flag("true"), Some(true));
        assert_eq!(parse_bool_flag("YES"), Some(true));
        assert_eq!(parse_bool_flag(" on "), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
        assert_eq!(parse_bool_flag(""), None);
    }

    #[test]
    fn env_readers() {
        std::env::set_var("TALLY_TEST_BOOL", "on");
        assert_eq!(env_bool("TALLY_TEST_BOOL"), Some(true));
        std::env::set_var("TALLY_TEST_BOOL", "No");
        assert_eq!(env_bool("TALLY_TEST_BOOL"), Some(false));
        std::env::remove_var("TALLY_TEST_BOOL");
        assert_eq!(env_bool("TALLY_TEST_BOOL"), None);

        std::env::set_var("TALLY_TEST_STRING", "   ");
        assert_eq!(env_string("TALLY_TEST_STRING"), None);
        std::env::set_var("TALLY_TEST_STRING", " /var/tally ");
        assert_eq!(env_string("TALLY_TEST_STRING").as_deref(), Some("/var/tally"));
        std::env::remove_var("TALLY_TEST_STRING");
    }
}
