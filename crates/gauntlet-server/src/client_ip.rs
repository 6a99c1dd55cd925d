//! Client-ip resolution and hashing.
//!
//! The socket peer is authoritative unless it is one of the configured
//! trusted proxies, in which case the forwarded-for chain is consulted --
//! walking from the right, the first hop outside the trusted set is the
//! client. Header-supplied addresses from untrusted peers are ignored
//! outright, so spoofed headers cannot influence rate-limit keying.
//!
//! The pipeline only ever sees `hash(ip || salt)`, truncated to 16 hex
//! chars.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use gauntlet_types::config::ServerConfig;

/// Resolve the effective client ip from the socket peer and the forwarded
/// header chain.
pub fn resolve_client_ip(
    peer: IpAddr,
    forwarded_for: Option<&str>,
    server: &ServerConfig,
) -> IpAddr {
    if !server.is_trusted_proxy(peer) {
        return peer;
    }

    let Some(header) = forwarded_for else {
        return peer;
    };

    // Walk the chain right to left; the first hop that is not a trusted
    // proxy is the real client. Unparseable entries end the walk.
    let mut candidate = peer;
    for entry in header.rsplit(',') {
        let Ok(addr) = entry.trim().parse::<IpAddr>() else {
            break;
        };
        candidate = addr;
        if !server.is_trusted_proxy(addr) {
            break;
        }
    }
    candidate
}

/// Salted, truncated hash of the client ip -- the only persistent
/// identifier of a source.
pub fn hash_ip(ip: IpAddr, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.to_string().as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}
