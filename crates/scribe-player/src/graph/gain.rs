//! Gain (volume) stage and shared factor cells.
//!
//! Volume and tempo factors are written by the control thread and read
//! by the chain worker; they are stored as `f64` bit patterns in an
//! atomic so neither side takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free `f64` cell for stage factors (gain, tempo rate).
#[derive(Debug)]
pub struct AtomicFactor(AtomicU64);

impl AtomicFactor {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Apply a gain factor in place.
///
/// No clamping: values above unity are allowed, matching the engine's
/// pass-through volume contract.
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in samples {
        *s *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_round_trips() {
        let cell = AtomicFactor::new(1.0);
        cell.set(0.5);
        assert_eq!(cell.get(), 0.5);
        cell.set(-2.25);
        assert_eq!(cell.get(), -2.25);
    }

    #[test]
    fn unity_gain_leaves_samples_untouched() {
        let mut samples = [0.1, -0.5, 1.0];
        apply_gain(&mut samples, 1.0);
        assert_eq!(samples, [0.1, -0.5, 1.0]);
    }

    #[test]
    fn gain_scales_samples() {
        let mut samples = [0.2, -0.4];
        apply_gain(&mut samples, 0.5);
        assert_eq!(samples, [0.1, -0.2]);
    }
}
