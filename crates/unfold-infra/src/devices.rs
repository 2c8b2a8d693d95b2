//! Annealing device ARNs targeted by the unfolding jobs.

// ──────────────────────────────────────────────────────────────────────
// Known device ARNs
// ──────────────────────────────────────────────────────────────────────

/// D-Wave 2000Q (lower-noise).
pub const DWAVE_2000Q_6: &str = "arn:aws:braket:::device/qpu/d-wave/DW_2000Q_6";

/// D-Wave Advantage system 1.
pub const DWAVE_ADVANTAGE_1: &str = "arn:aws:braket:::device/qpu/d-wave/Advantage_system1";

/// D-Wave Advantage system 4.
pub const DWAVE_ADVANTAGE_4: &str = "arn:aws:braket:::device/qpu/d-wave/Advantage_system4";

/// Devices swept by the default workflow.
pub fn default_devices() -> Vec<String> {
    [DWAVE_2000Q_6, DWAVE_ADVANTAGE_1, DWAVE_ADVANTAGE_4]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// Short device name: the last path segment of the ARN.
pub fn device_name(device_arn: &str) -> &str {
    device_arn.rsplit('/').next().unwrap_or(device_arn)
}

/// Check whether a string looks like a device ARN.
pub fn is_device_arn(s: &str) -> bool {
    s.starts_with("arn:") && s.contains(":device/")
}
