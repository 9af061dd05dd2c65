//! ---
//! skylink_section: "04-telemetry-bridge"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Telemetry bridge core."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Canonical vehicle telemetry. Every field is optional until a message that owns it
/// has been seen; unknown fields are omitted from the JSON form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Radians.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,
    /// Radians.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    /// Radians.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
    /// Degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    /// Meters above home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Ground speed, m/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Volts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    /// Amps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<f64>,
}

/// Applies `$op` to every field pair of two snapshots.
macro_rules! each_field {
    ($op:ident, $lhs:expr, $rhs:expr) => {
        $op!($lhs, $rhs, roll);
        $op!($lhs, $rhs, pitch);
        $op!($lhs, $rhs, yaw);
        $op!($lhs, $rhs, lat);
        $op!($lhs, $rhs, lon);
        $op!($lhs, $rhs, altitude);
        $op!($lhs, $rhs, heading);
        $op!($lhs, $rhs, speed);
        $op!($lhs, $rhs, voltage);
        $op!($lhs, $rhs, current);
        $op!($lhs, $rhs, battery_percent);
    };
}

macro_rules! overwrite_known {
    ($target:expr, $newer:expr, $field:ident) => {
        if $newer.$field.is_some() {
            $target.$field = $newer.$field;
        }
    };
}

macro_rules! keep_changed {
    ($delta:expr, $previous:expr, $field:ident) => {
        if $delta.$field == $previous.$field {
            $delta.$field = None;
        }
    };
}

impl TelemetrySnapshot {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite every field `newer` knows; fields it omits keep their value.
    pub fn merge(&mut self, newer: &TelemetrySnapshot) {
        each_field!(overwrite_known, self, newer);
    }

    /// Fields of `self` whose value differs from `previous`; unchanged ones become `None`.
    pub fn changes_since(&self, previous: &TelemetrySnapshot) -> TelemetrySnapshot {
        let mut delta = *self;
        each_field!(keep_changed, delta, previous);
        delta
    }
}
