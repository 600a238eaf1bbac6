//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("TOKEN") {
        return "***".to_string();
    }
    val.trim().to_string()
}

/// Log a consolidated snapshot of the loader's environment.
pub fn log_snapshot(title: &str, keys: &[&str]) {
    init_env();
    let snapshot: Vec<(String, String)> = keys
        .iter()
        .map(|&k| (k.to_string(), redact_value(k, &env_opt(k).unwrap_or_default())))
        .collect();
    info!(target: "preflight", title, snapshot = ?snapshot, "configuration snapshot");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("CATALOG_TEST_BATCH", "not-a-number");
        assert_eq!(env_parse("CATALOG_TEST_BATCH", 7usize), 7);
        std::env::set_var("CATALOG_TEST_BATCH", " 42 ");
        assert_eq!(env_parse("CATALOG_TEST_BATCH", 7usize), 42);
        std::env::remove_var("CATALOG_TEST_BATCH");
    }

    #[test]
    fn flags_and_blank_values() {
        std::env::set_var("CATALOG_TEST_FLAG", "Yes");
        assert!(env_flag("CATALOG_TEST_FLAG", false));
        std::env::set_var("CATALOG_TEST_FLAG", "   ");
        assert_eq!(env_opt("CATALOG_TEST_FLAG"), None);
        std::env::remove_var("CATALOG_TEST_FLAG");
        assert!(env_flag("CATALOG_TEST_FLAG", true));
    }

    #[test]
    fn secrets_are_redacted() {
        assert_eq!(redact_value("STORE_PASSWORD", "hunter2"), "***");
        assert_eq!(redact_value("CATALOG_STORE", " data/catalog.db "), "data/catalog.db");
    }
}
