//! Intensity laws turning tracked parameters into a 0..=255 motor command.

/// Hardware headroom de-rate applied to every motor command.
pub const MOTOR_SPEED_SCALE: f32 = 0.66;

/// Static per-zone speed shaping, already normalized to 0..1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedShape {
    pub min_speed: f32,
    pub max_speed_scale: f32,
}

/// Proximity band and velocity gain of a velocity zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityBand {
    pub limit_proximity_outer: f32,
    pub limit_proximity_inner: f32,
    pub velocity_scale: f32,
}

impl Default for VelocityBand {
    fn default() -> Self {
        Self { limit_proximity_outer: 0.0, limit_proximity_inner: 1.0, velocity_scale: 20.0 }
    }
}

/// Live inputs of a velocity zone at the moment of computation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityInputs {
    pub cutoff: bool,
    pub proximity: f32,
    pub proximity_velocity: f32,
    pub lateral_velocity: f32,
    pub max_speed: f32,
}

// Midpoints round to even.
fn quantize(x: f32) -> i32 {
    x.round_ties_even().clamp(0.0, 255.0) as i32
}

/// Linear interpolation between idle and full speed driven by proximity.
pub fn simple_proximity(proximity: f32, max_speed: f32, shape: SpeedShape) -> i32 {
    let signal = (((max_speed - shape.min_speed) * proximity + shape.min_speed)
        * MOTOR_SPEED_SCALE
        * shape.max_speed_scale)
        .clamp(0.0, 1.0);
    quantize(signal * 255.0)
}

pub fn in_band(proximity: f32, band: &VelocityBand) -> bool {
    proximity >= band.limit_proximity_outer && proximity <= band.limit_proximity_inner
}

/// Intensity driven by combined approach and lateral speed. Only closing
/// motion counts on the proximity axis.
///
/// The result is saturated to the byte range; an unbounded speed produces 255.
pub fn velocity(inputs: VelocityInputs, shape: SpeedShape, band: VelocityBand) -> i32 {
    if inputs.cutoff || !in_band(inputs.proximity, &band) {
        return 0;
    }
    let prox_v = inputs.proximity_velocity.max(0.0);
    let v = (inputs.lateral_velocity.powi(2) + prox_v.powi(2)).sqrt() * band.velocity_scale;
    quantize(
        ((inputs.max_speed - shape.min_speed) * v + shape.min_speed)
            * MOTOR_SPEED_SCALE
            * shape.max_speed_scale
            * 255.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: SpeedShape = SpeedShape { min_speed: 0.1, max_speed_scale: 1.0 };

    #[test]
    fn test_simple_proximity_scenario() {
        assert_eq!(simple_proximity(0.5, 0.5, SHAPE), 50);
    }

    #[test]
    fn test_simple_proximity_bounds() {
        let raw = SpeedShape { min_speed: 0.0, max_speed_scale: 1.0 };
        assert_eq!(simple_proximity(0.0, 0.5, raw), 0);
        // 1.0 * 0.66 * 255 = 168.3
        assert_eq!(simple_proximity(1.0, 1.0, raw), 168);
    }

    #[test]
    fn test_simple_proximity_always_in_byte_range() {
        let steps = [0.0f32, 0.05, 0.25, 0.5, 0.75, 1.0];
        for &prox in &steps {
            for &max in &steps {
                for &min in steps.iter().filter(|m| **m <= max) {
                    for &scale in &steps {
                        let shape = SpeedShape { min_speed: min, max_speed_scale: scale };
                        let out = simple_proximity(prox, max, shape);
                        assert!((0..=255).contains(&out), "{prox} {max} {min} {scale} -> {out}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_velocity_zero_outside_band() {
        let band = VelocityBand {
            limit_proximity_outer: 0.1,
            limit_proximity_inner: 0.9,
            velocity_scale: 20.0,
        };
        let mut inputs = VelocityInputs {
            proximity: 0.05,
            proximity_velocity: 5.0,
            lateral_velocity: 5.0,
            max_speed: 1.0,
            ..Default::default()
        };
        assert_eq!(velocity(inputs, SHAPE, band), 0);
        inputs.proximity = 0.95;
        assert_eq!(velocity(inputs, SHAPE, band), 0);
        inputs.proximity = 0.5;
        inputs.cutoff = true;
        assert_eq!(velocity(inputs, SHAPE, band), 0);
    }

    #[test]
    fn test_velocity_at_rest_is_idle_speed() {
        let inputs = VelocityInputs { proximity: 0.5, max_speed: 0.5, ..Default::default() };
        // 0.1 * 0.66 * 255 = 16.83
        assert_eq!(velocity(inputs, SHAPE, VelocityBand::default()), 17);
    }

    #[test]
    fn test_velocity_ignores_receding_motion() {
        let receding = VelocityInputs {
            proximity: 0.5,
            proximity_velocity: -3.0,
            max_speed: 0.5,
            ..Default::default()
        };
        let still = VelocityInputs { proximity_velocity: 0.0, ..receding };
        let band = VelocityBand::default();
        assert_eq!(velocity(receding, SHAPE, band), velocity(still, SHAPE, band));
    }

    #[test]
    fn test_velocity_combines_axes() {
        let band = VelocityBand { velocity_scale: 1.0, ..VelocityBand::default() };
        let shape = SpeedShape { min_speed: 0.0, max_speed_scale: 1.0 };
        let inputs = VelocityInputs {
            proximity: 0.5,
            proximity_velocity: 0.3,
            lateral_velocity: 0.4,
            max_speed: 1.0,
            ..Default::default()
        };
        // |v| = 0.5 -> 0.5 * 0.66 * 255 = 84.15
        assert_eq!(velocity(inputs, shape, band), 84);
    }

    #[test]
    fn test_velocity_saturates() {
        let inputs = VelocityInputs {
            proximity: 0.5,
            proximity_velocity: 50.0,
            max_speed: 1.0,
            ..Default::default()
        };
        assert_eq!(velocity(inputs, SHAPE, VelocityBand::default()), 255);
    }

    #[test]
    fn test_midpoint_rounds_to_even() {
        assert_eq!(quantize(50.5), 50);
        assert_eq!(quantize(51.5), 52);
    }
}
