// Environment-variable configuration helpers shared by every component's
// `*Config::from_env()` constructor (mirrors everruns-observability::config).

use std::str::FromStr;

/// Read an environment variable, returning `None` if unset or empty.
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read and parse an environment variable, falling back to `default` if unset,
/// empty, or unparseable.
pub fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read a boolean environment variable (`"true"`/`"1"` are truthy).
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_var(key) {
        Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_or_falls_back_on_missing() {
        std::env::remove_var("OMNIA_TEST_MISSING_VAR");
        let v: u64 = env_var_or("OMNIA_TEST_MISSING_VAR", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn env_flag_accepts_one_and_true() {
        std::env::set_var("OMNIA_TEST_FLAG_A", "1");
        std::env::set_var("OMNIA_TEST_FLAG_B", "TRUE");
        assert!(env_flag("OMNIA_TEST_FLAG_A", false));
        assert!(env_flag("OMNIA_TEST_FLAG_B", false));
        std::env::remove_var("OMNIA_TEST_FLAG_A");
        std::env::remove_var("OMNIA_TEST_FLAG_B");
    }
}
