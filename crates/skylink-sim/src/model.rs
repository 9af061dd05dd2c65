//! ---
//! skylink_section: "11-simulation"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Simulation runtime helpers and flight models."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::f64::consts::{PI, TAU};

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Normal;
use skylink_common::SimulationConfig;
use skylink_proto::{Attitude, GlobalPosition, Heartbeat, RawMessage, SystemStatus};

/// Meters per degree of latitude (spherical approximation).
const METERS_PER_DEGREE: f64 = 111_320.0;

const MAV_TYPE_QUADROTOR: u8 = 2;
const MAV_AUTOPILOT_ARDUPILOTMEGA: u8 = 3;
const MAV_MODE_GUIDED_ARMED: u8 = 216;
const MAV_STATE_ACTIVE: u8 = 4;
const MAVLINK_VERSION: u8 = 3;

const PACK_VOLTAGE_MV: u16 = 12_000;
const PACK_CURRENT_CA: i16 = 1_000;

/// One tick of simulated flight in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightSample {
    pub time_boot_ms: u32,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    /// North velocity, m/s.
    pub velocity_north: f64,
    /// East velocity, m/s.
    pub velocity_east: f64,
    pub heading_deg: f64,
    pub battery_percent: f64,
}

/// Circular orbit around a fixed origin with a gentle altitude wave.
#[derive(Debug)]
pub struct FlightModel {
    config: SimulationConfig,
    angle: f64,
    tick: u64,
    rng: StdRng,
    noise: Option<Normal<f64>>,
}

impl FlightModel {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let noise = if config.noise_sigma > 0.0 {
            Some(
                Normal::new(0.0, config.noise_sigma)
                    .context("noise_sigma must be a finite, non-negative number")?,
            )
        } else {
            None
        };
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            angle: 0.0,
            tick: 0,
            noise,
        })
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Advance one tick and return the new state.
    pub fn step(&mut self) -> FlightSample {
        self.tick += 1;
        self.angle += self.config.angular_step_rad;

        let elapsed_s = self.tick as f64 / self.config.rate_hz;
        let angle = self.angle;
        let radius = self.config.radius_deg;

        let altitude_noise = self.noise_sample();
        let lat = self.config.origin_lat
            + angle.sin() * radius
            + self.noise_sample() / METERS_PER_DEGREE;
        let lon = self.config.origin_lon
            + angle.cos() * radius
            + self.noise_sample() / METERS_PER_DEGREE;
        let altitude_m = self.config.base_altitude_m
            + angle.sin() * self.config.altitude_swing_m
            + altitude_noise;

        // Derivative of the orbit, in m/s.
        let omega = self.config.angular_step_rad * self.config.rate_hz;
        let velocity_north = angle.cos() * radius * omega * METERS_PER_DEGREE;
        let velocity_east =
            -angle.sin() * radius * omega * METERS_PER_DEGREE * lat.to_radians().cos();

        let heading_rad = velocity_east.atan2(velocity_north).rem_euclid(TAU);
        let yaw = if heading_rad > PI {
            heading_rad - TAU
        } else {
            heading_rad
        };

        let battery_percent = 100.0 - ((elapsed_s as u64) % 1000) as f64 / 10.0;

        FlightSample {
            time_boot_ms: (elapsed_s * 1000.0) as u32,
            lat,
            lon,
            altitude_m,
            roll: angle.sin() * 0.1,
            pitch: 0.0,
            yaw,
            velocity_north,
            velocity_east,
            heading_deg: heading_rad.to_degrees(),
            battery_percent,
        }
    }

    fn noise_sample(&mut self) -> f64 {
        match &self.noise {
            Some(noise) => noise.sample(&mut self.rng),
            None => 0.0,
        }
    }
}

pub fn heartbeat() -> RawMessage {
    RawMessage::Heartbeat(Heartbeat {
        custom_mode: 0,
        mav_type: MAV_TYPE_QUADROTOR,
        autopilot: MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode: MAV_MODE_GUIDED_ARMED,
        system_status: MAV_STATE_ACTIVE,
        mavlink_version: MAVLINK_VERSION,
    })
}

impl FlightSample {
    /// Telemetry messages describing this sample, in send order.
    pub fn messages(&self) -> [RawMessage; 3] {
        let altitude_mm = (self.altitude_m * 1000.0).round() as i32;
        let position = GlobalPosition {
            time_boot_ms: self.time_boot_ms,
            lat: (self.lat * 1e7).round() as i32,
            lon: (self.lon * 1e7).round() as i32,
            alt: altitude_mm,
            relative_alt: altitude_mm,
            vx: centimeters(self.velocity_north),
            vy: centimeters(self.velocity_east),
            vz: 0,
            // 36000 would wrap to north; keep it in 0..36000.
            hdg: ((self.heading_deg * 100.0).round() as u16) % 36_000,
        };
        let attitude = Attitude {
            time_boot_ms: self.time_boot_ms,
            roll: self.roll as f32,
            pitch: self.pitch as f32,
            yaw: self.yaw as f32,
            rollspeed: 0.0,
            pitchspeed: 0.0,
            yawspeed: 0.0,
        };
        let status = SystemStatus {
            voltage_battery: PACK_VOLTAGE_MV,
            current_battery: PACK_CURRENT_CA,
            battery_remaining: self.battery_percent as i8,
            ..SystemStatus::default()
        };
        [
            RawMessage::GlobalPosition(position),
            RawMessage::Attitude(attitude),
            RawMessage::SystemStatus(status),
        ]
    }
}

fn centimeters(meters_per_second: f64) -> i16 {
    (meters_per_second * 100.0)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}
