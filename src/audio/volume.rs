use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

/// Clamp a user-supplied percentage into 0..=100. Out-of-range input is
/// never an error.
pub fn clamp_percent(percent: i32) -> u8 {
    percent.clamp(0, 100) as u8
}

/// Shared linear gain (0.0 – 1.0) attached to a playable resource.
///
/// Cloning shares the value, so the session can change the volume of a
/// resource the transport is already consuming.
#[derive(Clone, Debug)]
pub struct VolumeControl {
    gain: Arc<AtomicU32>, // f32 bits
}

impl VolumeControl {
    pub fn from_percent(percent: u8) -> Self {
        let control = Self {
            gain: Arc::new(AtomicU32::new(0.0f32.to_bits())),
        };
        control.set_percent(percent);
        control
    }

    pub fn set_linear(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 0.0 };
        self.gain.store(gain.to_bits(), Ordering::Release);
    }

    pub fn set_percent(&self, percent: u8) {
        self.set_linear(f32::from(percent.min(100)) / 100.0);
    }

    pub fn linear(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Acquire))
    }

    pub fn percent(&self) -> u8 {
        (self.linear() * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped() {
        assert_eq!(clamp_percent(-10), 0);
        assert_eq!(clamp_percent(150), 100);
        assert_eq!(clamp_percent(42), 42);
    }

    #[test]
    fn clones_share_gain() {
        let control = VolumeControl::from_percent(10);
        let shared = control.clone();
        assert!((shared.linear() - 0.1).abs() < 1e-6);

        control.set_percent(80);
        assert_eq!(shared.percent(), 80);
    }

    #[test]
    fn linear_gain_is_bounded() {
        let control = VolumeControl::from_percent(50);
        control.set_linear(3.0);
        assert_eq!(control.linear(), 1.0);
        control.set_linear(-1.0);
        assert_eq!(control.linear(), 0.0);
        control.set_linear(f32::NAN);
        assert_eq!(control.linear(), 0.0);
    }
}
