use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Why a source URL was refused.
#[derive(Error, Debug)]
pub enum SourceUrlError {
    #[error("Invalid URL: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("URL must not embed credentials")]
    EmbeddedCredentials,
    #[error("Localhost not allowed")]
    Localhost,
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(IpAddr),
}

/// Checks that a configured source URL is safe to poll unattended.
///
/// Only public http(s) hosts are accepted: loopback, private, link-local and
/// unspecified addresses are refused so a config file cannot point the
/// service at internal endpoints. URLs carrying a username or password are
/// refused as well, since they would end up in logs.
///
/// ```
/// use feedkeeper::util::validate_source_url;
///
/// assert!(validate_source_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_source_url("http://localhost/feed").is_err());
/// assert!(validate_source_url("http://10.1.2.3/feed").is_err());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_source_url(raw: &str) -> Result<Url, SourceUrlError> {
    let url = Url::parse(raw.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SourceUrlError::UnsupportedScheme(url.scheme().to_owned()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(SourceUrlError::EmbeddedCredentials);
    }

    let ip = match url.host() {
        None => return Err(SourceUrlError::MissingHost),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            if domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
            {
                return Err(SourceUrlError::Localhost);
            }
            return Ok(url);
        }
        Some(Host::Ipv4(v4)) => IpAddr::V4(v4),
        Some(Host::Ipv6(v6)) => IpAddr::V6(v6),
    };

    if ip.is_loopback() {
        return Err(SourceUrlError::Localhost);
    }
    if is_internal(ip) {
        return Err(SourceUrlError::PrivateIp(ip));
    }
    Ok(url)
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_loopback() || is_internal_v4(v4),
            None => is_internal_v6(v6),
        },
    }
}

fn is_internal_v4(v4: Ipv4Addr) -> bool {
    v4.is_private() || v4.is_link_local() || v4.is_unspecified()
}

fn is_internal_v6(v6: Ipv6Addr) -> bool {
    let first = v6.segments()[0];
    // fc00::/7 unique local, fe80::/10 link-local
    v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}
