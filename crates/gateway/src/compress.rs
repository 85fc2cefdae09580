// permessage-deflate negotiation and per-message compression policy.
//
// The gateway only decides: byte-level deflate stays with the transport
// layer. At handshake time the `Sec-WebSocket-Extensions` offer is inspected
// and a per-connection config recorded; at message time the only question is
// whether a serialized payload is large enough to be worth a compressed
// send.

use axum::http::HeaderMap;
use crewline_common::protocol::ws::COMPRESSION_THRESHOLD_BYTES;
use serde::Serialize;

pub const SEC_WEBSOCKET_EXTENSIONS: &str = "sec-websocket-extensions";

/// Negotiated per-connection compression parameters. Immutable once set at
/// handshake. `no_context_takeover` on both sides resets the dictionary
/// after every message, trading ratio for predictable memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
        }
    }
}

impl CompressionConfig {
    fn negotiated() -> Self {
        Self {
            enabled: true,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
            server_no_context_takeover: true,
            client_no_context_takeover: true,
        }
    }

    /// Whether a payload of `serialized_len` bytes should attempt a
    /// compressed send on this connection.
    pub fn should_compress(&self, serialized_len: usize) -> bool {
        self.enabled && serialized_len > COMPRESSION_THRESHOLD_BYTES
    }
}

/// Inspect the handshake headers for a `permessage-deflate` offer.
pub fn negotiate(headers: &HeaderMap) -> CompressionConfig {
    let offer = headers
        .get(SEC_WEBSOCKET_EXTENSIONS)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    negotiate_offer(offer)
}

/// Negotiate from the raw extension offer string. Absent or foreign
/// extensions leave compression disabled; everything else is unaffected.
pub fn negotiate_offer(offer: &str) -> CompressionConfig {
    let advertises_deflate = offer
        .split(',')
        .map(|extension| extension.split(';').next().unwrap_or("").trim())
        .any(|name| name.eq_ignore_ascii_case("permessage-deflate"));

    if advertises_deflate {
        CompressionConfig::negotiated()
    } else {
        CompressionConfig::default()
    }
}

/// Read-only view for monitoring and tests.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CompressionStats {
    pub enabled: bool,
    pub server_window_bits: u8,
    pub client_window_bits: u8,
    pub server_context_takeover: bool,
    pub client_context_takeover: bool,
}

pub fn compression_stats(config: &CompressionConfig) -> CompressionStats {
    CompressionStats {
        enabled: config.enabled,
        server_window_bits: config.server_max_window_bits,
        client_window_bits: config.client_max_window_bits,
        server_context_takeover: !config.server_no_context_takeover,
        client_context_takeover: !config.client_no_context_takeover,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn deflate_offer_enables_compression_with_reset_dictionaries() {
        let config = negotiate_offer("permessage-deflate; client_max_window_bits");
        assert!(config.enabled);
        assert_eq!(config.server_max_window_bits, 15);
        assert_eq!(config.client_max_window_bits, 15);
        assert!(config.server_no_context_takeover);
        assert!(config.client_no_context_takeover);
    }

    #[test]
    fn absent_or_foreign_offers_leave_compression_disabled() {
        assert!(!negotiate_offer("").enabled);
        assert!(!negotiate_offer("x-webkit-deflate-frame").enabled);
    }

    #[test]
    fn deflate_found_among_multiple_offers() {
        let config = negotiate_offer("x-custom-ext, permessage-deflate; server_no_context_takeover");
        assert!(config.enabled);
    }

    #[test]
    fn negotiate_reads_the_extensions_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::from_static("permessage-deflate"),
        );
        assert!(negotiate(&headers).enabled);
        assert!(!negotiate(&HeaderMap::new()).enabled);
    }

    #[test]
    fn only_large_payloads_compress_on_enabled_connections() {
        let enabled = CompressionConfig::negotiated();
        assert!(!enabled.should_compress(COMPRESSION_THRESHOLD_BYTES));
        assert!(enabled.should_compress(COMPRESSION_THRESHOLD_BYTES + 1));

        let disabled = CompressionConfig::default();
        assert!(!disabled.should_compress(COMPRESSION_THRESHOLD_BYTES + 1));
    }

    #[test]
    fn stats_reflect_takeover_as_context_retention() {
        let stats = compression_stats(&CompressionConfig::negotiated());
        assert!(stats.enabled);
        assert_eq!(stats.server_window_bits, 15);
        assert!(!stats.server_context_takeover);
        assert!(!stats.client_context_takeover);
    }
}
