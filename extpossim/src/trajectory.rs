//! Synthetic detections for extpossim

use std::f64::consts::TAU;
use std::time::Duration;

use extposlib::{DetectionMessage, PositionSample};
use rand::Rng;

/// Circle flown by the simulated object
#[derive(Debug, Clone)]
pub struct CircleTrajectory {
    /// Circle radius in metres
    pub radius: f64,
    /// Height of the circle in the detector frame
    pub height: f64,
    /// Time for one lap
    pub period: Duration,
    /// Amplitude of the uniform noise added per axis
    pub noise: f64,
    /// Probability of a frame without a detection
    pub miss_rate: f64,
}

impl Default for CircleTrajectory {
    fn default() -> Self {
        Self {
            radius: 0.5,
            height: -1.0,
            period: Duration::from_secs(8),
            noise: 0.01,
            miss_rate: 0.05,
        }
    }
}

impl CircleTrajectory {
    /// Noise-free position at time `t`
    pub fn position_at(&self, t: Duration) -> PositionSample {
        let phase = TAU * t.as_secs_f64() / self.period.as_secs_f64();
        PositionSample::new(self.radius * phase.cos(), self.radius * phase.sin(), self.height)
    }

    /// Detection message for time `t`, with noise and random misses
    pub fn detection_at<R: Rng>(&self, t: Duration, rng: &mut R) -> DetectionMessage {
        if rng.gen_bool(self.miss_rate.clamp(0.0, 1.0)) {
            return DetectionMessage::not_found();
        }

        let p = self.position_at(t);
        let mut jitter = || {
            if self.noise > 0.0 {
                rng.gen_range(-self.noise..self.noise)
            } else {
                0.0
            }
        };
        DetectionMessage::found(PositionSample::new(p.x + jitter(), p.y + jitter(), p.z + jitter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extposlib::Detection;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_circle_positions() {
        let trajectory = CircleTrajectory::default();
        let start = trajectory.position_at(Duration::ZERO);
        assert!((start.x - 0.5).abs() < 1e-9);
        assert!(start.y.abs() < 1e-9);

        let quarter = trajectory.position_at(Duration::from_secs(2));
        assert!(quarter.x.abs() < 1e-9);
        assert!((quarter.y - 0.5).abs() < 1e-9);
        assert_eq!(quarter.z, -1.0);
    }

    #[test]
    fn test_detections_follow_miss_rate() {
        let mut rng = StdRng::seed_from_u64(7);

        let always = CircleTrajectory { miss_rate: 0.0, noise: 0.0, ..Default::default() };
        let msg = always.detection_at(Duration::ZERO, &mut rng);
        assert_eq!(
            msg.detection().unwrap(),
            Detection::Found(always.position_at(Duration::ZERO))
        );

        let never = CircleTrajectory { miss_rate: 1.0, ..Default::default() };
        assert_eq!(
            never.detection_at(Duration::ZERO, &mut rng).detection().unwrap(),
            Detection::NotFound
        );
    }
}
