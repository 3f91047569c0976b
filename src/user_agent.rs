//! Shared User-Agent string for scraper and download HTTP clients.

/// Project URL for User-Agent identification (RFC 9308 good citizenship).
const PROJECT_UA_URL: &str = "https://github.com/fierce/docsync";

/// Default User-Agent when configuration does not override it.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("docsync/{version} (document-sync-tool; +{PROJECT_UA_URL})")
}
