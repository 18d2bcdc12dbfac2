//! Registration input validation: URL scheme, SSRF protection, event types.

use std::net::IpAddr;

use crate::error::EngineError;
use crate::models::WebhookEventType;

/// Validate an endpoint delivery URL.
///
/// The URL must parse, use `https` (or `http` when `require_https` is off),
/// and must not point at a private or internal host unless
/// `allow_internal_hosts` is set (development only).
pub fn validate_endpoint_url(
    raw: &str,
    require_https: bool,
    allow_internal_hosts: bool,
) -> Result<(), EngineError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| EngineError::InvalidUrl(format!("Unparseable URL: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if !require_https => {}
        "http" => {
            return Err(EngineError::InvalidUrl(
                "Endpoint URLs must use HTTPS".to_string(),
            ));
        }
        other => {
            return Err(EngineError::InvalidUrl(format!(
                "Unsupported URL scheme: {other}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| EngineError::InvalidUrl("URL must have a host".to_string()))?;

    if allow_internal_hosts {
        return Ok(());
    }
    reject_internal_host(host)
}

/// Reject hosts that would let a webhook reach internal infrastructure:
/// loopback, RFC 1918 ranges, link-local (cloud metadata), CGNAT, and
/// well-known internal hostnames.
pub fn reject_internal_host(host: &str) -> Result<(), EngineError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        let internal = match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_unspecified()
                    || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
        if internal {
            return Err(EngineError::SsrfDetected(format!(
                "Host {host} is a private/internal address"
            )));
        }
        return Ok(());
    }

    let lower = host.to_ascii_lowercase();
    let restricted = lower == "localhost"
        || lower == "metadata.google.internal"
        || lower.ends_with(".internal")
        || lower.ends_with(".local");
    if restricted {
        return Err(EngineError::SsrfDetected(format!(
            "Host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

/// Validate delivery limits: timeouts must be at least one second, the
/// retry budget must not be negative, and a rate-limit override must allow
/// at least one delivery per hour.
pub fn validate_limits(
    timeout_secs: Option<u64>,
    max_retries: Option<i64>,
    rate_limit_per_hour: Option<u32>,
) -> Result<(), EngineError> {
    if timeout_secs == Some(0) {
        return Err(EngineError::Validation(
            "timeout_secs must be at least 1".to_string(),
        ));
    }
    if let Some(retries) = max_retries {
        if retries < 0 {
            return Err(EngineError::Validation(format!(
                "max_retries must not be negative, got {retries}"
            )));
        }
    }
    if rate_limit_per_hour == Some(0) {
        return Err(EngineError::Validation(
            "rate_limit_per_hour must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Validate that every subscribed event type names a known
/// [`WebhookEventType`]; reports the first unknown one.
pub fn validate_event_types(event_types: &[String]) -> Result<(), EngineError> {
    for et in event_types {
        if WebhookEventType::parse(et).is_none() {
            return Err(EngineError::Validation(format!(
                "Unknown event type: {et}"
            )));
        }
    }
    Ok(())
}

/// Validate custom header names (token characters only, non-empty).
pub fn validate_custom_headers(
    headers: &[crate::models::CustomHeader],
) -> Result<(), EngineError> {
    for h in headers {
        let valid = !h.name.is_empty()
            && h.name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(EngineError::Validation(format!(
                "Invalid custom header name: {:?}",
                h.name
            )));
        }
        if h.value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(EngineError::Validation(format!(
                "Invalid custom header value for {:?}",
                h.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomHeader;

    #[test]
    fn https_url_accepted() {
        assert!(validate_endpoint_url("https://hooks.example.com/cb", true, false).is_ok());
        assert!(validate_endpoint_url("https://hooks.example.com:8443/cb", true, false).is_ok());
    }

    #[test]
    fn http_rejected_unless_allowed() {
        assert!(validate_endpoint_url("http://hooks.example.com/cb", true, false).is_err());
        assert!(validate_endpoint_url("http://hooks.example.com/cb", false, false).is_ok());
    }

    #[test]
    fn garbage_and_odd_schemes_rejected() {
        assert!(validate_endpoint_url("not a url", true, false).is_err());
        assert!(validate_endpoint_url("ftp://example.com/x", true, false).is_err());
    }

    #[test]
    fn ssrf_blocks_private_ranges() {
        for host in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.9",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "::1",
            "::",
        ] {
            assert!(reject_internal_host(host).is_err(), "{host} should be blocked");
        }
    }

    #[test]
    fn ssrf_blocks_internal_hostnames() {
        assert!(reject_internal_host("localhost").is_err());
        assert!(reject_internal_host("LOCALHOST").is_err());
        assert!(reject_internal_host("metadata.google.internal").is_err());
        assert!(reject_internal_host("db.internal").is_err());
        assert!(reject_internal_host("printer.local").is_err());
    }

    #[test]
    fn ssrf_allows_public_hosts() {
        assert!(reject_internal_host("8.8.8.8").is_ok());
        assert!(reject_internal_host("hooks.example.com").is_ok());
    }

    #[test]
    fn ssrf_applies_through_url_validation() {
        let err = validate_endpoint_url("https://192.168.0.5/webhook", true, false).unwrap_err();
        assert!(matches!(err, EngineError::SsrfDetected(_)));
    }

    #[test]
    fn internal_hosts_allowed_when_opted_in() {
        assert!(validate_endpoint_url("http://127.0.0.1:8080/cb", false, true).is_ok());
        assert!(validate_endpoint_url("http://localhost/cb", false, true).is_ok());
    }

    #[test]
    fn event_types_validated_against_catalogue() {
        let ok = vec!["member.created".to_string(), "test.ping".to_string()];
        assert!(validate_event_types(&ok).is_ok());

        let bad = vec!["member.created".to_string(), "nope.nope".to_string()];
        let err = validate_event_types(&bad).unwrap_err();
        assert!(err.to_string().contains("nope.nope"));

        assert!(validate_event_types(&[]).is_ok());
    }

    #[test]
    fn limits_accept_sane_values() {
        assert!(validate_limits(None, None, None).is_ok());
        assert!(validate_limits(Some(5), Some(0), Some(100)).is_ok());
        assert!(validate_limits(Some(300), Some(10), None).is_ok());
    }

    #[test]
    fn negative_retry_budget_rejected() {
        let err = validate_limits(None, Some(-5), None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn zero_timeout_and_zero_rate_limit_rejected() {
        assert!(validate_limits(Some(0), None, None).is_err());
        assert!(validate_limits(None, None, Some(0)).is_err());
    }

    #[test]
    fn custom_header_names_validated() {
        let ok = vec![CustomHeader {
            name: "X-Custom-Token".to_string(),
            value: "abc123".to_string(),
        }];
        assert!(validate_custom_headers(&ok).is_ok());

        let bad_name = vec![CustomHeader {
            name: "bad header".to_string(),
            value: "v".to_string(),
        }];
        assert!(validate_custom_headers(&bad_name).is_err());

        let bad_value = vec![CustomHeader {
            name: "X-Ok".to_string(),
            value: "a\r\nInjected: yes".to_string(),
        }];
        assert!(validate_custom_headers(&bad_value).is_err());
    }
}
