//! Shared User-Agent string for catalog and download HTTP clients.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/harvester-rs/harvester";

/// Default User-Agent for every outgoing request.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (+{PROJECT_UA_URL})")
}
