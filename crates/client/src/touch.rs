//! Randomized physical touch parameters: pressure, contact size and the
//! ellipse axes reported for each contact.

use phonecast_protocol::TouchCoord;
use rand::Rng;

/// Per-gesture contact parameters. Tool axes mirror the touch axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchSample {
    pub pressure: f64,
    pub size: f64,
    pub touch_major: f64,
    pub touch_minor: f64,
    pub tool_major: f64,
    pub tool_minor: f64,
    pub orientation: f64,
}

impl TouchSample {
    /// Roll a fresh sample. Called once per touch-down.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let pressure = 0.5 + 0.3 * rng.r#gen::<f64>();
        let size = 0.05 + 0.03 * rng.r#gen::<f64>();
        let major = 80.0 + (130.0 * rng.r#gen::<f64>()).floor();
        let ratio = 0.7 + 0.2 * rng.r#gen::<f64>();
        let minor = (major * ratio).floor();
        Self {
            pressure,
            size,
            touch_major: major,
            touch_minor: minor,
            tool_major: major,
            tool_minor: minor,
            orientation: orientation(rng),
        }
    }

    /// Place this sample at `(x, y)`, re-rolling orientation.
    pub fn at<R: Rng + ?Sized>(&self, rng: &mut R, x: f64, y: f64) -> TouchCoord {
        TouchCoord {
            pressure: self.pressure,
            size: self.size,
            touch_major: self.touch_major,
            touch_minor: self.touch_minor,
            tool_major: self.tool_major,
            tool_minor: self.tool_minor,
            orientation: orientation(rng),
            x,
            y,
        }
    }
}

pub fn orientation<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    0.01 * rng.r#gen::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn samples_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(0x7011c4);
        for _ in 0..10_000 {
            let s = TouchSample::generate(&mut rng);
            assert!((0.5..0.8).contains(&s.pressure), "pressure {}", s.pressure);
            assert!((0.05..0.08).contains(&s.size), "size {}", s.size);
            assert!((80.0..=209.0).contains(&s.touch_major));
            assert_eq!(s.touch_major.fract(), 0.0);
            assert_eq!(s.touch_minor.fract(), 0.0);
            assert!(s.touch_minor < s.touch_major);
            assert!(s.touch_minor >= (s.touch_major * 0.7).floor());
            assert!(s.touch_minor <= (s.touch_major * 0.9).floor());
            assert_eq!(s.tool_major, s.touch_major);
            assert_eq!(s.tool_minor, s.touch_minor);
            assert!((0.0..0.01).contains(&s.orientation));
        }
    }

    #[test]
    fn at_keeps_axes_and_rerolls_orientation() {
        let mut rng = StdRng::seed_from_u64(3);
        let sample = TouchSample::generate(&mut rng);
        let a = sample.at(&mut rng, 10.0, 20.0);
        let b = sample.at(&mut rng, 11.0, 21.0);
        assert_eq!(a.touch_major, b.touch_major);
        assert_eq!(a.pressure, sample.pressure);
        assert_eq!((b.x, b.y), (11.0, 21.0));
        assert_ne!(a.orientation, b.orientation);
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let a = TouchSample::generate(&mut StdRng::seed_from_u64(11));
        let b = TouchSample::generate(&mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }
}
