//! API-key resolution for MCP server auth (spec §4.G). Ported from
//! `pydantic_agent/mcp/auth.py`'s `resolve_auth_key`/`build_auth_headers`.

use std::env;

use super::config::MCPAuthConfig;
use crate::error::ConfigurationError;

fn env_var_reference(key: &str) -> Option<&str> {
    key.strip_prefix("${")?.strip_suffix('}')
}

/// Resolves the API key, following `key_env` (required if set) then `key`
/// (literal or `${VAR}` reference). Returns `Ok(None)` only when neither
/// field is configured.
pub fn resolve_auth_key(auth: &MCPAuthConfig) -> Result<Option<String>, ConfigurationError> {
    if let Some(ref var) = auth.key_env {
        return env::var(var)
            .map(Some)
            .map_err(|_| ConfigurationError {
                config_key: var.clone(),
                expected: "environment variable to be set".into(),
                actual: "unset".into(),
            });
    }

    if let Some(ref key) = auth.key {
        if let Some(var) = env_var_reference(key) {
            return env::var(var)
                .map(Some)
                .map_err(|_| ConfigurationError {
                    config_key: var.to_string(),
                    expected: "environment variable to be set".into(),
                    actual: "unset".into(),
                });
        }
        return Ok(Some(key.clone()));
    }

    Ok(None)
}

/// Builds the header map to attach to requests against an MCP server,
/// adding a `Bearer ` prefix for the `Authorization` header if missing.
pub fn build_auth_headers(auth: &MCPAuthConfig) -> Result<Vec<(String, String)>, ConfigurationError> {
    let Some(mut key) = resolve_auth_key(auth)? else {
        return Ok(Vec::new());
    };

    if auth.header.eq_ignore_ascii_case("authorization") && !key.starts_with("Bearer ") {
        key = format!("Bearer {key}");
    }

    Ok(vec![(auth.header.clone(), key)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_passthrough() {
        let auth = MCPAuthConfig { key_env: None, key: Some("sk-abc".into()), header: "Authorization".into() };
        assert_eq!(resolve_auth_key(&auth).unwrap(), Some("sk-abc".into()));
    }

    #[test]
    fn env_var_reference_pattern_resolves() {
        std::env::set_var("MCP_TEST_KEY_XYZ", "resolved-value");
        let auth = MCPAuthConfig {
            key_env: None,
            key: Some("${MCP_TEST_KEY_XYZ}".into()),
            header: "Authorization".into(),
        };
        assert_eq!(resolve_auth_key(&auth).unwrap(), Some("resolved-value".into()));
        std::env::remove_var("MCP_TEST_KEY_XYZ");
    }

    #[test]
    fn missing_key_env_is_an_error_not_a_skip() {
        let auth = MCPAuthConfig {
            key_env: Some("MCP_DEFINITELY_UNSET_VAR".into()),
            key: None,
            header: "Authorization".into(),
        };
        assert!(resolve_auth_key(&auth).is_err());
    }

    #[test]
    fn no_auth_configured_yields_no_headers() {
        let auth = MCPAuthConfig::default();
        assert!(build_auth_headers(&auth).unwrap().is_empty());
    }

    #[test]
    fn authorization_header_gets_bearer_prefix() {
        let auth = MCPAuthConfig { key_env: None, key: Some("sk-abc".into()), header: "Authorization".into() };
        let headers = build_auth_headers(&auth).unwrap();
        assert_eq!(headers[0], ("Authorization".to_string(), "Bearer sk-abc".to_string()));
    }

    #[test]
    fn non_authorization_header_is_left_unprefixed() {
        let auth = MCPAuthConfig { key_env: None, key: Some("sk-abc".into()), header: "X-Api-Key".into() };
        let headers = build_auth_headers(&auth).unwrap();
        assert_eq!(headers[0], ("X-Api-Key".to_string(), "sk-abc".to_string()));
    }
}
