use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use url::Url;

use crate::constants::network::{TIMEOUT_MIN_MS, MAX_RETRIES};
use crate::constants::protocols::ALLOWED_HTTP;
use crate::constants::rate_limit::{DEFAULT_PER_MINUTE, MAX_PER_MINUTE};
use crate::errors::IntegrationError;
use crate::models::AuthDetail;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_name(&self, value: &str, label: &str) -> Result<String, IntegrationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IntegrationError::validation(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if trimmed.contains('\0') {
            return Err(IntegrationError::validation(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    /// Structural check only; the address check happens per call on the final URL.
    pub fn ensure_base_url(&self, value: &str) -> Result<String, IntegrationError> {
        let trimmed = self.ensure_name(value, "Base URL")?;
        let parsed = Url::parse(&trimmed)
            .map_err(|_| IntegrationError::validation("Base URL must be an absolute URL"))?;
        if !ALLOWED_HTTP.contains(&parsed.scheme()) {
            return Err(IntegrationError::validation(
                "Base URL must use http or https",
            ));
        }
        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(IntegrationError::validation("Base URL must include a host"));
        }
        if parsed.fragment().is_some() {
            return Err(IntegrationError::validation(
                "Base URL must not include a fragment",
            ));
        }
        Ok(trimmed)
    }

    pub fn ensure_rate_limit(&self, value: Option<u32>) -> Result<u32, IntegrationError> {
        let limit = value.unwrap_or(DEFAULT_PER_MINUTE);
        if limit == 0 || limit > MAX_PER_MINUTE {
            return Err(IntegrationError::validation(format!(
                "Rate limit must be between 1 and {} requests per minute",
                MAX_PER_MINUTE
            )));
        }
        Ok(limit)
    }

    pub fn ensure_headers(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, IntegrationError> {
        let mut out = BTreeMap::new();
        for (key, value) in headers {
            let name = key.trim();
            if name.is_empty() {
                continue;
            }
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                IntegrationError::validation(format!("Invalid header name: {}", name))
            })?;
            if value.contains('\r') || value.contains('\n') {
                return Err(IntegrationError::validation(format!(
                    "Header {} must not contain line breaks",
                    name
                )));
            }
            out.insert(name.to_string(), value.clone());
        }
        Ok(out)
    }

    /// Checks a header after template substitution.
    pub fn ensure_header_pair(
        &self,
        name: &str,
        value: &str,
    ) -> Result<(HeaderName, HeaderValue), IntegrationError> {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| IntegrationError::validation(format!("Invalid header name: {}", name)))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            IntegrationError::validation(format!("Invalid value for header {}", name))
        })?;
        Ok((header_name, header_value))
    }

    pub fn ensure_auth_detail(&self, detail: &AuthDetail) -> Result<AuthDetail, IntegrationError> {
        let key_name = match detail.key_name.as_deref() {
            None => None,
            Some(raw) => Some(self.ensure_name(raw, "API key name")?),
        };
        Ok(AuthDetail {
            placement: detail.placement,
            key_name,
        })
    }

    pub fn ensure_method(&self, value: &str) -> Result<Method, IntegrationError> {
        let upper = value.trim().to_uppercase();
        let upper = if upper.is_empty() { "GET".to_string() } else { upper };
        if !ALLOWED_METHODS.contains(&upper.as_str()) {
            return Err(IntegrationError::validation(format!(
                "Unsupported HTTP method: {}",
                value
            )));
        }
        Method::from_bytes(upper.as_bytes()).map_err(|_| {
            IntegrationError::validation(format!("Unsupported HTTP method: {}", value))
        })
    }

    /// Falls back to `default_ms` and clamps to `max_ms`.
    pub fn ensure_timeout(
        &self,
        value: Option<u64>,
        default_ms: u64,
        max_ms: u64,
    ) -> Result<u64, IntegrationError> {
        match value {
            None => Ok(default_ms.min(max_ms)),
            Some(ms) if ms < TIMEOUT_MIN_MS => Err(IntegrationError::validation(
                "Timeout must be a positive number of milliseconds",
            )),
            Some(ms) => Ok(ms.min(max_ms)),
        }
    }

    pub fn ensure_retries(&self, value: Option<u32>) -> Result<u32, IntegrationError> {
        let retries = value.unwrap_or(0);
        if retries > MAX_RETRIES {
            return Err(IntegrationError::validation(format!(
                "Retries must be at most {}",
                MAX_RETRIES
            )));
        }
        Ok(retries)
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Validation;
    use crate::errors::ErrorKind;
    use std::collections::BTreeMap;

    #[test]
    fn ensure_base_url_requires_http_host() {
        let v = Validation::new();
        assert_eq!(
            v.ensure_base_url(" https://api.example.com/v1/ ").unwrap(),
            "https://api.example.com/v1/"
        );
        for bad in ["", "api.example.com", "ftp://x.test", "https://x.test/#frag"] {
            assert_eq!(v.ensure_base_url(bad).unwrap_err().kind, ErrorKind::Validation, "{}", bad);
        }
    }

    #[test]
    fn ensure_rate_limit_defaults_and_bounds() {
        let v = Validation::new();
        assert_eq!(v.ensure_rate_limit(None).unwrap(), 60);
        assert_eq!(v.ensure_rate_limit(Some(10)).unwrap(), 10);
        assert!(v.ensure_rate_limit(Some(0)).is_err());
        assert!(v.ensure_rate_limit(Some(1_000_000)).is_err());
    }

    #[test]
    fn ensure_headers_rejects_line_breaks_and_skips_blank_names() {
        let v = Validation::new();
        let mut headers = BTreeMap::new();
        headers.insert(" X-Trace ".to_string(), "1".to_string());
        headers.insert("  ".to_string(), "ignored".to_string());
        let out = v.ensure_headers(&headers).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get("X-Trace").map(String::as_str), Some("1"));

        headers.insert("X-Bad".to_string(), "a\r\nInjected: yes".to_string());
        assert!(v.ensure_headers(&headers).is_err());
    }

    #[test]
    fn ensure_method_normalizes_case() {
        let v = Validation::new();
        assert_eq!(v.ensure_method("post").unwrap(), reqwest::Method::POST);
        assert_eq!(v.ensure_method("").unwrap(), reqwest::Method::GET);
        assert!(v.ensure_method("TRACE").is_err());
    }

    #[test]
    fn ensure_timeout_clamps_to_max() {
        let v = Validation::new();
        assert_eq!(v.ensure_timeout(None, 30_000, 120_000).unwrap(), 30_000);
        assert_eq!(v.ensure_timeout(Some(500_000), 30_000, 120_000).unwrap(), 120_000);
        assert!(v.ensure_timeout(Some(0), 30_000, 120_000).is_err());
    }
}
