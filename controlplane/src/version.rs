//! Build identity of the running control plane

use serde::Serialize;

pub const SERVICE_NAME: &str = "berth";

/// What was built, and from which commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub built_at: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("BERTH_COMMIT").unwrap_or("unknown"),
        built_at: option_env!("BERTH_BUILT_AT").unwrap_or("unknown"),
    }
}

/// Sent on every backend request
pub fn user_agent() -> String {
    let info = build_info();
    format!("{}/{} ({})", info.service, info.version, info.commit)
}
