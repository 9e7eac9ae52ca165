//! Minimal environment forwarded to the agent process.

/// Variables the agent may inherit. Everything else is dropped so credentials
/// held by this process never reach the agent.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "TERM",
    "LANG",
    "LC_ALL",
    "NODE_ENV",
    "CLAUDE_PATH",
    "TMPDIR",
    "TMP",
    "TEMP",
];

/// Build the child environment from the ambient process environment.
pub fn safe_environment() -> Vec<(String, String)> {
    safe_environment_from(|key| std::env::var(key).ok())
}

/// Build the child environment from an arbitrary lookup.
///
/// Absent and empty values are omitted.
pub fn safe_environment_from<F>(lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    ALLOWED_ENV_VARS
        .iter()
        .filter_map(|key| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .map(|value| (key.to_string(), value))
        })
        .collect()
}
