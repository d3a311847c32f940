//! Shared helpers for provider adapters: error mapping and credentials.

use cm_domain::config::AuthConfig;
use cm_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Build the error for a non-2xx response. The status decides whether the
/// retry combinator tries again (429 / 5xx) or gives up (other 4xx).
pub fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Error::Auth(format!("{provider}: HTTP {} - {body}", status.as_u16()));
    }
    Error::Generation {
        provider: provider.to_owned(),
        status: Some(status.as_u16()),
        message: format!("HTTP {} - {body}", status.as_u16()),
    }
}

/// Where an API key was found. Logged, never the key itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeySource {
    Plaintext,
    Keychain,
    Env,
    KeychainEnvFallback,
}

/// Resolve the API key for an endpoint.
///
/// Tried in order: plaintext `key`, the OS keychain (`service` +
/// `account`), the `env` variable, then `{SERVICE}_{ACCOUNT}` for hosts
/// without a keychain daemon.
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    let (key, source) = resolve_api_key_with_source(auth)?;
    tracing::debug!(?source, "API key resolved");
    Ok(key)
}

pub(crate) fn resolve_api_key_with_source(auth: &AuthConfig) -> Result<(String, KeySource)> {
    if let Some(key) = &auth.key {
        tracing::warn!("API key read from plaintext `auth.key`; prefer `auth.env` or the keychain");
        return Ok((key.clone(), KeySource::Plaintext));
    }

    let keychain = auth.service.as_deref().zip(auth.account.as_deref());

    if let Some((service, account)) = keychain {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok((secret, KeySource::Keychain)),
            Err(e) => tracing::debug!(service, account, error = %e, "keychain miss"),
        }
    }

    if let Some(var) = &auth.env {
        return std::env::var(var)
            .map(|key| (key, KeySource::Env))
            .map_err(|_| Error::Auth(format!("API key variable '{var}' is not set")));
    }

    if let Some((service, account)) = keychain {
        let var = keychain_fallback_env_name(service, account);
        if let Ok(key) = std::env::var(&var) {
            tracing::info!(env_var = %var, "API key read from keychain fallback variable");
            return Ok((key, KeySource::KeychainEnvFallback));
        }
    }

    Err(Error::Auth(
        "no API key configured: set auth.env, auth.key or auth.service + auth.account".into(),
    ))
}

/// Read a secret from the OS keychain. Fails on headless systems.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    keyring::Entry::new(service, account)
        .and_then(|entry| entry.get_password())
        .map_err(|e| Error::Auth(format!("keychain {service}/{account}: {e}")))
}

/// `("chatmem", "groq-api-key")` → `"CHATMEM_GROQ_API_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!("{service}_{account}").to_uppercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_name_is_upper_snake() {
        assert_eq!(
            keychain_fallback_env_name("chatmem", "groq-api-key"),
            "CHATMEM_GROQ_API_KEY"
        );
    }

    #[test]
    fn plaintext_key_wins() {
        let auth = AuthConfig {
            key: Some("sk-plain".into()),
            env: Some("CM_TEST_NEVER_READ".into()),
            service: Some("chatmem".into()),
            account: Some("unused".into()),
            ..Default::default()
        };
        let (key, source) = resolve_api_key_with_source(&auth).unwrap();
        assert_eq!(key, "sk-plain");
        assert_eq!(source, KeySource::Plaintext);
    }

    #[test]
    fn env_variable_is_read() {
        let var = "CM_TEST_UTIL_ENV_KEY_4711";
        std::env::set_var(var, "from-env");
        let auth = AuthConfig {
            env: Some(var.into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_api_key_with_source(&auth).unwrap(),
            ("from-env".to_owned(), KeySource::Env)
        );
        std::env::remove_var(var);
    }

    #[test]
    fn missing_env_variable_names_it() {
        let auth = AuthConfig {
            env: Some("CM_TEST_UTIL_ABSENT_0815".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("CM_TEST_UTIL_ABSENT_0815"));
    }

    #[test]
    fn nothing_configured_is_an_auth_error() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn headless_keychain_falls_back_to_env() {
        std::env::set_var("CHATMEM_TEST_HEADLESS", "fallback-secret");
        let auth = AuthConfig {
            service: Some("chatmem".into()),
            account: Some("test-headless".into()),
            ..Default::default()
        };
        let (key, source) = resolve_api_key_with_source(&auth).unwrap();
        assert_eq!(key, "fallback-secret");
        assert_eq!(source, KeySource::KeychainEnvFallback);
        std::env::remove_var("CHATMEM_TEST_HEADLESS");
    }

    #[test]
    fn status_codes_decide_retry() {
        assert!(status_error("groq", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(status_error("groq", reqwest::StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!status_error("groq", reqwest::StatusCode::BAD_REQUEST, "nope").is_transient());
        assert!(matches!(
            status_error("groq", reqwest::StatusCode::FORBIDDEN, ""),
            Error::Auth(_)
        ));
    }
}
