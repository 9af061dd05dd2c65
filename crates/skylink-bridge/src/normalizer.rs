//! ---
//! skylink_section: "04-telemetry-bridge"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Telemetry bridge core."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Folds decoded messages into the last-known-good [`TelemetrySnapshot`].

use skylink_proto::{
    Attitude, GlobalPosition, MessageKind, RawMessage, SystemStatus, BATTERY_REMAINING_UNKNOWN,
    CURRENT_UNKNOWN, HEADING_UNKNOWN, VOLTAGE_UNKNOWN,
};
use tracing::warn;

use crate::error::NormalizeError;
use crate::snapshot::TelemetrySnapshot;

#[derive(Debug, Default)]
pub struct Normalizer {
    snapshot: TelemetrySnapshot,
    rejected: u64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current merged state.
    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// Messages discarded by [`Normalizer::apply`] because of a [`NormalizeError`].
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Merge `message` and return the fields it changed, or `None` when nothing changed.
    ///
    /// The merged state stays available through [`Normalizer::snapshot`]. Messages that fail normalisation are logged and dropped; the snapshot is left
    /// untouched.
    pub fn apply(&mut self, message: &RawMessage) -> Option<TelemetrySnapshot> {
        match self.try_apply(message) {
            Ok(changed) => changed,
            Err(err) => {
                warn!(error = %err, "dropping telemetry message");
                None
            }
        }
    }

    /// Like [`Normalizer::apply`] but hands the error back to the caller.
    pub fn try_apply(
        &mut self,
        message: &RawMessage,
    ) -> Result<Option<TelemetrySnapshot>, NormalizeError> {
        let mut next = self.snapshot;
        let outcome = match message {
            RawMessage::Heartbeat(_) => return Ok(None),
            RawMessage::Attitude(attitude) => merge_attitude(&mut next, attitude),
            RawMessage::GlobalPosition(position) => {
                merge_position(&mut next, position);
                Ok(())
            }
            RawMessage::SystemStatus(status) => {
                merge_status(&mut next, status);
                Ok(())
            }
        };
        if let Err(err) = outcome {
            self.rejected += 1;
            return Err(err);
        }

        let delta = next.changes_since(&self.snapshot);
        if delta.is_empty() {
            return Ok(None);
        }
        self.snapshot = next;
        Ok(Some(delta))
    }
}

fn finite(field: &'static str, value: f32) -> Result<f64, NormalizeError> {
    let value = f64::from(value);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(NormalizeError::NonFinite {
            kind: MessageKind::Attitude,
            field,
            value,
        })
    }
}

fn merge_attitude(
    snapshot: &mut TelemetrySnapshot,
    attitude: &Attitude,
) -> Result<(), NormalizeError> {
    // Validate all three before touching the snapshot.
    let roll = finite("roll", attitude.roll)?;
    let pitch = finite("pitch", attitude.pitch)?;
    let yaw = finite("yaw", attitude.yaw)?;
    snapshot.roll = Some(roll);
    snapshot.pitch = Some(pitch);
    snapshot.yaw = Some(yaw);
    Ok(())
}

fn merge_position(snapshot: &mut TelemetrySnapshot, position: &GlobalPosition) {
    snapshot.lat = Some(f64::from(position.lat) / 1e7);
    snapshot.lon = Some(f64::from(position.lon) / 1e7);
    snapshot.altitude = Some(f64::from(position.relative_alt) / 1000.0);
    if position.hdg != HEADING_UNKNOWN {
        snapshot.heading = Some(f64::from(position.hdg) / 100.0);
    }
    let vx = f64::from(position.vx);
    let vy = f64::from(position.vy);
    snapshot.speed = Some(vx.hypot(vy) / 100.0);
}

fn merge_status(snapshot: &mut TelemetrySnapshot, status: &SystemStatus) {
    if status.voltage_battery != VOLTAGE_UNKNOWN {
        snapshot.voltage = Some(f64::from(status.voltage_battery) / 1000.0);
    }
    if status.current_battery != CURRENT_UNKNOWN {
        snapshot.current = Some(f64::from(status.current_battery) / 100.0);
    }
    if status.battery_remaining != BATTERY_REMAINING_UNKNOWN {
        snapshot.battery_percent = Some(f64::from(status.battery_remaining));
    }
}
