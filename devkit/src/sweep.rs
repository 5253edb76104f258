/*!
Parameter sweeps

Produces the list of values a simulator walks through to exercise one avatar
parameter, e.g. `sweep(0.1, &[0.0, 1.0, 0.0])` goes up to 1 and back down.
*/

/// Values from `targets[0]` through every following target, moving by `step`.
/// Intermediate values are snapped to one decimal so repeated additions
/// land exactly on the targets.
pub fn sweep(step: f32, targets: &[f32]) -> Vec<f32> {
    let Some(&first) = targets.first() else {
        return Vec::new();
    };
    let mut values = vec![first];
    if step <= 0.0 {
        return values;
    }

    for pair in targets.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if from == to {
            continue;
        }
        let sign = (to - from).signum();
        let mut x = from + sign * step;
        while x * sign <= to * sign {
            values.push(x);
            x = ((x + sign * step) * 10.0).round() / 10.0;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn up_and_down() {
        let values = sweep(0.1, &[0.0, 1.0, 0.0]);
        assert_eq!(values.len(), 21);
        assert_eq!(values[0], 0.0);
        assert_eq!(values[10], 1.0);
        assert_eq!(*values.last().unwrap(), 0.0);
    }

    #[test]
    fn downward_ramp_stops_on_target() {
        let values = sweep(0.1, &[1.0, 0.2]);
        assert!(close(&values, &[1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2]), "{values:?}");
    }

    #[test]
    fn degenerate_inputs() {
        assert!(sweep(0.1, &[]).is_empty());
        assert_eq!(sweep(0.1, &[0.5]), vec![0.5]);
        assert_eq!(sweep(0.1, &[0.5, 0.5]), vec![0.5]);
        assert_eq!(sweep(0.0, &[0.0, 1.0]), vec![0.0]);
    }
}
