//! Typed trackers holding the last known value of one avatar parameter.
//!
//! A tracker only reports a change back to its owner; the owner decides what
//! a change means (recompute, re-arm the watchdog...). Every change is also
//! mirrored to the telemetry sink under the tracker's address.

use crate::models::ParameterValue;
use crate::telemetry::SharedTelemetry;
use tokio::time::Instant;

pub struct Parameter<T: ParameterValue> {
    address: String,
    value: T,
    last_updated: Option<Instant>,
    telemetry: SharedTelemetry,
}

impl<T: ParameterValue> Parameter<T> {
    pub fn new(address: impl Into<String>, telemetry: SharedTelemetry) -> Self {
        let address = address.into();
        telemetry.register_channel(&address, T::TELEMETRY_SCALE);
        Self { address, value: T::default(), last_updated: None, telemetry }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }

    /// Overwrites the stored value without counting as an inbound update.
    pub fn set_value(&mut self, value: T) {
        self.value = value;
    }

    #[cfg(test)]
    pub fn on_message(&mut self, value: T) -> Option<T> {
        self.on_message_at(value, Instant::now())
    }

    /// Returns the new value when it differs from the stored one, `None` otherwise.
    pub fn on_message_at(&mut self, value: T, now: Instant) -> Option<T> {
        if value == self.value {
            return None;
        }
        self.value = value;
        self.last_updated = Some(now);
        self.telemetry.update_channel(&self.address, value.normalize());
        Some(value)
    }
}

pub type BoolParameter = Parameter<bool>;
// No zone reads an int parameter yet; kept for int-typed inputs.
#[allow(dead_code)]
pub type IntParameter = Parameter<i32>;

/// Float tracker that also derives velocity between consecutive changes.
pub struct FloatParameter {
    inner: Parameter<f32>,
    velocity: f32,
}

impl FloatParameter {
    pub fn new(address: impl Into<String>, telemetry: SharedTelemetry) -> Self {
        Self { inner: Parameter::new(address, telemetry), velocity: 0.0 }
    }

    pub fn address(&self) -> &str {
        self.inner.address()
    }

    pub fn value(&self) -> f32 {
        self.inner.value()
    }

    pub fn set_value(&mut self, value: f32) {
        self.inner.set_value(value);
    }

    /// Units per second over the last change. Zero until a second change
    /// gives an elapsed interval.
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    #[cfg(test)]
    pub fn on_message(&mut self, value: f32) -> Option<f32> {
        self.on_message_at(value, Instant::now())
    }

    pub fn on_message_at(&mut self, value: f32, now: Instant) -> Option<f32> {
        if value == self.inner.value() {
            return None;
        }
        let old = self.inner.value();
        self.velocity = match self.inner.last_updated() {
            Some(prev) => {
                let dt = now.saturating_duration_since(prev).as_secs_f32();
                if dt > 0.0 { (value - old) / dt } else { 0.0 }
            }
            None => 0.0,
        };
        self.inner.on_message_at(value, now)
    }
}
