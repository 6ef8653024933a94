//! Client IP extraction from HTTP headers with trust validation
//!
//! This module implements client IP extraction that:
//! - Honours X-Forwarded-For and Forwarded only behind trusted proxies
//! - Supports vendor-specific headers (e.g., CF-Connecting-IP)
//! - Falls back to socket remote address when headers are untrusted
//! - Handles both IPv4 and IPv6

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address from HTTP headers
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `socket_addr` - The socket remote address (fallback)
/// * `config` - Analytics configuration with trust settings
///
/// # Returns
/// The client IP address, extracted according to the trust configuration
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

/// Extract IP from Cloudflare-specific header
fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Extract IP from standard headers (Forwarded, X-Forwarded-For) with trust validation
fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    // Prefer RFC 7239 Forwarded header
    let chain = forwarded_chain(headers);
    let chain = if chain.is_empty() {
        x_forwarded_for_chain(headers)
    } else {
        chain
    };

    select_from_chain(&chain, config)
}

/// `for=` addresses of an RFC 7239 Forwarded header, left (client) to right
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    let Some(forwarded) = headers.get("forwarded").and_then(|h| h.to_str().ok()) else {
        return vec![];
    };

    // Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for="[2001:db8::1]:4711"
    forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("for") {
                return None;
            }
            parse_forwarded_node(value.trim().trim_matches('"'))
        })
        .collect()
}

fn parse_forwarded_node(node: &str) -> Option<IpAddr> {
    if let Some(rest) = node.strip_prefix('[') {
        // Bracketed IPv6, optionally followed by a port
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    node.rsplit_once(':')
        .and_then(|(host, _port)| host.parse().ok())
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .map(|xff| {
            xff.split(',')
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Pick the client address from a proxy chain using right-to-left trust validation
fn select_from_chain(ips: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if ips.is_empty() {
        return None;
    }

    // If num_trusted_proxies is specified, skip that many from the right
    if let Some(num_trusted) = config.num_trusted_proxies {
        if ips.len() > num_trusted {
            return Some(ips[ips.len() - num_trusted - 1]);
        }
        // Not enough IPs in chain, return the leftmost (least trusted)
        return ips.first().copied();
    }

    // Walk from the right, skipping addresses inside trusted proxy networks
    if !config.trusted_proxies.is_empty() {
        return ips
            .iter()
            .rev()
            .find(|ip| !config.trusted_proxies.iter().any(|net| net.contains(*ip)))
            .or_else(|| ips.first())
            .copied();
    }

    // No trust configuration, return the rightmost IP
    ips.last().copied()
}
