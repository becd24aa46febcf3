// ---------------------------------------------------------------------------
// Client IP resolution + allow/deny policy
// ---------------------------------------------------------------------------
// X-Forwarded-For is only honoured when the security settings trust it, and
// optionally only when the direct peer is a listed proxy.

use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::models::SecuritySettingsDoc;

/// Resolve the client IP from the connection and forwarding headers.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_xff: bool,
    trusted_proxies: &[String],
) -> String {
    if trust_xff {
        let proxy_trusted = trusted_proxies.is_empty()
            || peer.is_some_and(|p| ip_in_list(&p.to_string(), trusted_proxies));
        if proxy_trusted {
            if let Some(forwarded) = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
            {
                return forwarded;
            }
            if let Some(real_ip) = headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
            {
                return real_ip;
            }
        }
    }
    peer.map(|p| p.to_string()).unwrap_or_else(|| "local".into())
}

pub fn is_loopback(ip: &str) -> bool {
    if ip == "local" {
        return true;
    }
    ip.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

/// Exact or IPv4-CIDR membership test against a list of entries.
pub fn ip_in_list(ip: &str, list: &[String]) -> bool {
    let parsed: Option<IpAddr> = ip.parse().ok();
    list.iter().any(|entry| {
        let entry = entry.trim();
        if entry == ip {
            return true;
        }
        match (parsed, parse_ipv4_cidr(entry)) {
            (Some(IpAddr::V4(addr)), Some((network, prefix))) => {
                let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                (u32::from(addr) & mask) == (u32::from(network) & mask)
            }
            _ => false,
        }
    })
}

fn parse_ipv4_cidr(entry: &str) -> Option<(std::net::Ipv4Addr, u32)> {
    let (addr, prefix) = entry.split_once('/')?;
    let network = addr.trim().parse().ok()?;
    let prefix: u32 = prefix.trim().parse().ok()?;
    (prefix <= 32).then_some((network, prefix))
}

/// Allow/deny verdict for a resolved client IP under the current security
/// settings. Whitelist (when non-empty) wins over blacklist.
pub fn ip_allowed(ip: &str, settings: &SecuritySettingsDoc) -> bool {
    if settings.allow_localhost_bypass && is_loopback(ip) {
        return true;
    }
    if !settings.ip_whitelist.is_empty() {
        return ip_in_list(ip, &settings.ip_whitelist);
    }
    !ip_in_list(ip, &settings.ip_blacklist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn settings() -> SecuritySettingsDoc {
        SecuritySettingsDoc::default()
    }

    #[test]
    fn xff_only_honoured_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 10.0.0.1"));
        let peer = Some("10.0.0.1".parse().unwrap());

        assert_eq!(client_ip(&headers, peer, false, &[]), "10.0.0.1");
        assert_eq!(client_ip(&headers, peer, true, &[]), "9.9.9.9");
        assert_eq!(
            client_ip(&headers, peer, true, &["10.0.0.1".into()]),
            "9.9.9.9"
        );
        assert_eq!(
            client_ip(&headers, peer, true, &["172.16.0.1".into()]),
            "10.0.0.1"
        );
    }

    #[test]
    fn cidr_and_exact_matching() {
        let list = vec!["10.0.0.0/8".to_string(), "192.168.1.5".to_string()];
        assert!(ip_in_list("10.1.2.3", &list));
        assert!(ip_in_list("192.168.1.5", &list));
        assert!(!ip_in_list("192.168.1.6", &list));
        assert!(!ip_in_list("11.0.0.1", &list));
    }

    #[test]
    fn whitelist_wins_over_blacklist() {
        let mut s = settings();
        s.allow_localhost_bypass = false;
        s.ip_whitelist = vec!["10.0.0.0/8".into()];
        s.ip_blacklist = vec!["10.1.0.0/16".into()];
        assert!(ip_allowed("10.1.2.3", &s));
        assert!(!ip_allowed("9.9.9.9", &s));
    }

    #[test]
    fn blacklist_blocks_without_whitelist() {
        let mut s = settings();
        s.allow_localhost_bypass = false;
        s.ip_blacklist = vec!["9.9.9.9".into()];
        assert!(!ip_allowed("9.9.9.9", &s));
        assert!(ip_allowed("8.8.8.8", &s));
    }

    #[test]
    fn localhost_bypass() {
        let mut s = settings();
        s.ip_whitelist = vec!["10.0.0.1".into()];
        assert!(ip_allowed("127.0.0.1", &s));
        assert!(ip_allowed("local", &s));
        s.allow_localhost_bypass = false;
        assert!(!ip_allowed("127.0.0.1", &s));
    }
}
