/**
 * HAPTIC ZONES - Named control loops from avatar parameters to motors
 *
 * ROLE: A zone owns its trackers and device endpoints, recomputes one motor
 * intensity whenever a tracked input changes, and zeroes its motors when
 * input goes stale.
 *
 * STATES:
 * - Active: `last_update != last_timed_out`, the watchdog is armed
 * - Idle-triggered: `last_update == last_timed_out`, the zero burst already
 *   fired for this idle span; the next proximity change re-arms the watchdog
 *
 * CONCURRENCY: one mutex per zone guards timestamps, trackers and algorithm
 * state. Inbound updates arrive on the listener task, timeout checks on the
 * shared watchdog task, and each zero burst runs as its own detached task.
 * Motor sends happen after the lock is released.
 */

use crate::algorithms::{self, SpeedShape, VelocityBand, VelocityInputs};
use crate::config::{ZoneCommon, ZoneConfig};
use crate::models::{ParameterValue, ValueType};
use crate::parameter::{BoolParameter, FloatParameter};
use crate::router::{Router, RouterError};
use crate::telemetry::SharedTelemetry;
use crate::transport::{DeviceEndpoint, MotorSender, TX_ADDR_LEGACY, TX_ADDR_PARAMETER};
use parking_lot::Mutex;
use rosc::OscType;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Watchdog poll period.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Zero commands per burst; repeated so one lost datagram cannot leave a motor running.
pub const BURST_COUNT: usize = 5;
pub const BURST_SPACING: Duration = Duration::from_millis(10);
/// Floor applied to live max-speed updates.
pub const MAX_SPEED_LOW_LIMIT: f32 = 0.05;

/// Outputs shared by every zone.
#[derive(Clone)]
pub struct ZoneDeps {
    pub sender: Arc<dyn MotorSender>,
    pub telemetry: SharedTelemetry,
}

/// Which tracked input an inbound value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneInput {
    Proximity,
    MaxSpeed,
    Cutoff,
    LateralX,
}

impl ZoneInput {
    fn value_type(self) -> ValueType {
        match self {
            ZoneInput::Cutoff => bool::VALUE_TYPE,
            _ => f32::VALUE_TYPE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Float(f32),
    Bool(bool),
}

enum Algorithm {
    SimpleProximity,
    Velocity {
        band: VelocityBand,
        // absent trackers stay at their defaults (false / zero velocity)
        cutoff: Option<BoolParameter>,
        lateral_x: Option<FloatParameter>,
        last_calculated: Option<Instant>,
    },
}

struct ZoneState {
    last_update: Instant,
    last_timed_out: Instant,
    proximity: FloatParameter,
    max_speed: FloatParameter,
    algorithm: Algorithm,
}

impl ZoneState {
    fn compute(&mut self, shape: SpeedShape, now: Instant) -> i32 {
        match &mut self.algorithm {
            Algorithm::SimpleProximity => {
                algorithms::simple_proximity(self.proximity.value(), self.max_speed.value(), shape)
            }
            Algorithm::Velocity { band, cutoff, lateral_x, last_calculated } => {
                let inputs = VelocityInputs {
                    cutoff: cutoff.as_ref().map(|c| c.value()).unwrap_or(false),
                    proximity: self.proximity.value(),
                    proximity_velocity: self.proximity.velocity(),
                    lateral_velocity: lateral_x.as_ref().map(|l| l.velocity()).unwrap_or(0.0),
                    max_speed: self.max_speed.value(),
                };
                if inputs.cutoff || !algorithms::in_band(inputs.proximity, band) {
                    *last_calculated = Some(now);
                }
                algorithms::velocity(inputs, shape, *band)
            }
        }
    }
}

pub struct HapticZone {
    name: String,
    channel: String,
    timeout: Duration,
    shape: SpeedShape,
    devices: Vec<DeviceEndpoint>,
    state: Mutex<ZoneState>,
    sender: Arc<dyn MotorSender>,
    telemetry: SharedTelemetry,
}

impl HapticZone {
    /// Builds the zone; `last_update` and `last_timed_out` both start at now
    /// so nothing fires before the first proximity update.
    pub fn new(config: &ZoneConfig, deps: &ZoneDeps) -> Arc<Self> {
        let common: &ZoneCommon = config.common();
        let telemetry = deps.telemetry.clone();

        let proximity = FloatParameter::new(common.proximity_address.clone(), telemetry.clone());
        let mut max_speed =
            FloatParameter::new(common.max_speed_address.clone(), telemetry.clone());
        max_speed.set_value(common.max_speed);

        let algorithm = match config {
            ZoneConfig::SimpleProximity(_) => Algorithm::SimpleProximity,
            ZoneConfig::Velocity(v) => Algorithm::Velocity {
                band: v.band,
                cutoff: v.cutoff_address.clone().map(|a| BoolParameter::new(a, telemetry.clone())),
                lateral_x: v
                    .lateral_x_address
                    .clone()
                    .map(|a| FloatParameter::new(a, telemetry.clone())),
                last_calculated: None,
            },
        };

        let channel = format!("Zone: {}", common.name);
        telemetry.register_channel(&channel, 255.0);

        let now = Instant::now();
        let devices: Vec<DeviceEndpoint> = common
            .device_ips
            .iter()
            .map(|ip| DeviceEndpoint::new(SocketAddr::new(*ip, common.device_port)))
            .collect();
        info!(
            zone = %common.name,
            devices = devices.len(),
            timeout = ?common.timeout,
            "zone created"
        );

        Arc::new(Self {
            name: common.name.clone(),
            channel,
            timeout: common.timeout,
            shape: common.shape,
            devices,
            state: Mutex::new(ZoneState {
                last_update: now,
                last_timed_out: now,
                proximity,
                max_speed,
                algorithm,
            }),
            sender: deps.sender.clone(),
            telemetry,
        })
    }

    /// Creates the zone and attaches its trackers to the router.
    pub fn build(
        config: &ZoneConfig,
        deps: &ZoneDeps,
        router: &mut Router,
    ) -> Result<Arc<Self>, RouterError> {
        let zone = Self::new(config, deps);
        zone.bind(router)?;
        Ok(zone)
    }

    fn inputs(&self) -> Vec<(String, ZoneInput)> {
        let state = self.state.lock();
        let mut inputs = vec![
            (state.proximity.address().to_string(), ZoneInput::Proximity),
            (state.max_speed.address().to_string(), ZoneInput::MaxSpeed),
        ];
        if let Algorithm::Velocity { cutoff, lateral_x, .. } = &state.algorithm {
            if let Some(c) = cutoff {
                inputs.push((c.address().to_string(), ZoneInput::Cutoff));
            }
            if let Some(l) = lateral_x {
                inputs.push((l.address().to_string(), ZoneInput::LateralX));
            }
        }
        inputs
    }

    /// Registers every tracker address; the router only keeps weak references.
    pub fn bind(self: &Arc<Self>, router: &mut Router) -> Result<(), RouterError> {
        for (address, input) in self.inputs() {
            let zone = Arc::downgrade(self);
            router.add_endpoint(
                &address,
                input.value_type(),
                Arc::new(move |value: &OscType| {
                    if let Some(zone) = zone.upgrade() {
                        zone.on_osc(input, value);
                    }
                }),
            )?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn devices(&self) -> &[DeviceEndpoint] {
        &self.devices
    }

    #[cfg(test)]
    pub fn proximity(&self) -> f32 {
        self.state.lock().proximity.value()
    }

    #[cfg(test)]
    pub fn max_speed(&self) -> f32 {
        self.state.lock().max_speed.value()
    }

    #[cfg(test)]
    pub fn last_calculated(&self) -> Option<Instant> {
        match &self.state.lock().algorithm {
            Algorithm::Velocity { last_calculated, .. } => *last_calculated,
            Algorithm::SimpleProximity => None,
        }
    }

    pub fn on_osc(&self, input: ZoneInput, value: &OscType) {
        let parsed = match input.value_type() {
            ValueType::Bool => bool::from_osc(value).map(InputValue::Bool),
            _ => f32::from_osc(value).map(InputValue::Float),
        };
        match parsed {
            Some(v) => {
                if self.apply_input(input, v, Instant::now()) {
                    self.transmit();
                }
            }
            None => debug!(zone = %self.name, ?input, ?value, "unusable argument, dropped"),
        }
    }

    /// Same as an inbound message at an explicit instant.
    #[cfg(test)]
    pub fn on_input_at(&self, input: ZoneInput, value: InputValue, now: Instant) {
        if self.apply_input(input, value, now) {
            self.transmit_at(now);
        }
    }

    /// Updates the matching tracker. Returns whether its value changed.
    fn apply_input(&self, input: ZoneInput, value: InputValue, now: Instant) -> bool {
        let mut state = self.state.lock();
        match (input, value) {
            (ZoneInput::Proximity, InputValue::Float(v)) => {
                let changed = state.proximity.on_message_at(v, now).is_some();
                if changed {
                    state.last_update = now;
                }
                changed
            }
            (ZoneInput::MaxSpeed, InputValue::Float(v)) => {
                let changed = state.max_speed.on_message_at(v, now).is_some();
                if changed && v < MAX_SPEED_LOW_LIMIT {
                    state.max_speed.set_value(MAX_SPEED_LOW_LIMIT);
                }
                changed
            }
            (ZoneInput::LateralX, InputValue::Float(v)) => match &mut state.algorithm {
                Algorithm::Velocity { lateral_x: Some(l), .. } => {
                    l.on_message_at(v, now).is_some()
                }
                _ => false,
            },
            (ZoneInput::Cutoff, InputValue::Bool(v)) => match &mut state.algorithm {
                Algorithm::Velocity { cutoff: Some(c), .. } => c.on_message_at(v, now).is_some(),
                _ => false,
            },
            _ => false,
        }
    }

    /// Recomputes the intensity from the current tracked state and sends it.
    pub fn transmit(&self) {
        self.transmit_at(Instant::now());
    }

    fn transmit_at(&self, now: Instant) {
        // lock released before any send
        let command = self.state.lock().compute(self.shape, now);
        self.transmit_value(command);
    }

    pub fn broadcast_zero(&self) {
        self.transmit_value(0);
    }

    /// Sends `value` to every device on both motor addresses. A failing
    /// device is logged and skipped.
    pub fn transmit_value(&self, value: i32) {
        self.telemetry.update_channel(&self.channel, value as f32);
        for device in &self.devices {
            for address in [TX_ADDR_PARAMETER, TX_ADDR_LEGACY] {
                if let Err(e) = self.sender.send(*device, address, value) {
                    warn!(zone = %self.name, %device, address, "motor send failed: {e}");
                }
            }
        }
    }

    /// True exactly once per idle span: marks the span as handled.
    pub fn check_timeout(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.last_timed_out != state.last_update
            && now.saturating_duration_since(state.last_update) > self.timeout
        {
            state.last_timed_out = state.last_update;
            return true;
        }
        false
    }

    /// Detached burst of zero commands. Not cancellable: it runs all
    /// `BURST_COUNT` sends even if the zone reactivates meanwhile.
    pub fn spawn_zero_burst(self: &Arc<Self>) -> JoinHandle<()> {
        let zone = Arc::clone(self);
        task::spawn(async move {
            for i in 0..BURST_COUNT {
                if i > 0 {
                    tokio::time::sleep(BURST_SPACING).await;
                }
                zone.broadcast_zero();
            }
        })
    }
}

/// One task polling every zone, instead of one thread per zone.
pub fn spawn_timeout_watchdog(zones: Vec<Arc<HapticZone>>, poll: Duration) -> JoinHandle<()> {
    task::spawn(async move {
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = Instant::now();
            for zone in &zones {
                if zone.check_timeout(now) {
                    warn!(
                        zone = %zone.name,
                        "no update for {:?}, zeroing out motors",
                        zone.timeout
                    );
                    zone.spawn_zero_burst();
                }
            }
        }
    })
}
