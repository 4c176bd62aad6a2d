//! Per-kind step time limits.

use std::time::Duration;

use cf_core::config::WorkflowConfig;
use cf_core::OperationKind;

const MINUTE: u64 = 60;

/// Limit for kinds without a dedicated entry.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10 * MINUTE);

/// Built-in limit for a kind.
pub fn default_timeout(kind: OperationKind) -> Duration {
    let minutes = match kind {
        OperationKind::Thumbnail | OperationKind::Probe => 2,
        OperationKind::Convert | OperationKind::Concatenate | OperationKind::ExtractFrames => 20,
        OperationKind::Compress => 15,
        OperationKind::ExtractAudio | OperationKind::ToGif => 5,
        _ => return DEFAULT_STEP_TIMEOUT,
    };
    Duration::from_secs(minutes * MINUTE)
}

/// Limit for a kind, honoring overrides from the workflow config.
pub fn step_timeout(kind: OperationKind, config: &WorkflowConfig) -> Duration {
    config
        .timeouts
        .get(&kind)
        .map(|secs| Duration::from_secs(*secs))
        .unwrap_or_else(|| default_timeout(kind))
}
