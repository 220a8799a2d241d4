use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and security policy violations
/// designed to prevent SSRF (Server-Side Request Forgery) attacks.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a stored feed URL before it is fetched.
///
/// Always rejects non-HTTP(S) schemes (e.g. `file://`, `ftp://`). Unless
/// `allow_private_hosts` is set, also rejects:
/// - Localhost addresses (`localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6)
///
/// Hostnames are not resolved; a public name that resolves to a private
/// address is not caught here.
///
/// # Examples
///
/// ```
/// use newshub_rss::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml", false).unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("http://localhost/feed", false).is_err());
/// assert!(validate_feed_url("http://localhost/feed", true).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_feed_url(url_str: &str, allow_private_hosts: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if allow_private_hosts {
        return Ok(url);
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_feed_url("https://example.com/feed.xml", false).is_ok());
        assert!(validate_feed_url("http://news.example.org/rss?cat=2", false).is_ok());
    }

    #[test]
    fn test_invalid_schemes_rejected_even_when_private_allowed() {
        for allow in [false, true] {
            assert!(matches!(
                validate_feed_url("file:///etc/passwd", allow),
                Err(UrlValidationError::UnsupportedScheme(_))
            ));
            assert!(validate_feed_url("ftp://example.com", allow).is_err());
        }
    }

    #[test]
    fn test_unparsable_url() {
        assert!(matches!(
            validate_feed_url("not a url", false),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_rejected() {
        assert!(matches!(
            validate_feed_url("http://localhost/feed", false),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_feed_url("http://127.0.0.1/feed", false).is_err());
        assert!(validate_feed_url("http://[::1]/feed", false).is_err());
    }

    #[test]
    fn test_private_ips_rejected() {
        assert!(validate_feed_url("http://192.168.1.1/feed", false).is_err());
        assert!(validate_feed_url("http://10.0.0.1:3000/feed", false).is_err());
        assert!(validate_feed_url("http://172.16.0.1/feed", false).is_err());
        assert!(validate_feed_url("http://169.254.1.1/feed", false).is_err());
        assert!(validate_feed_url("http://[fe80::1]/feed", false).is_err());
        assert!(validate_feed_url("http://0.0.0.0/feed", false).is_err());
    }

    #[test]
    fn test_private_hosts_allowed_when_configured() {
        assert!(validate_feed_url("http://127.0.0.1:8080/feed", true).is_ok());
        assert!(validate_feed_url("http://192.168.1.1/feed", true).is_ok());
    }
}
