//! Seven-dimensional constant-velocity Kalman filter over a bounding box's
//! center, area, and aspect ratio.
//!
//! State vector: `[cx, cy, area, aspect, vx, vy, v_area]`. Measurement
//! vector: `[cx, cy, area, aspect]`. `aspect` itself is treated as
//! constant (no velocity term), matching the SORT family of trackers this
//! is grounded on.

use nalgebra::{SMatrix, SVector};

use crate::geometry::BoundingBox;

pub type State = SVector<f64, 7>;
pub type Covariance = SMatrix<f64, 7, 7>;
pub type Measurement = SVector<f64, 4>;

/// Per-track Kalman filter state and covariance, plus the config it was
/// built from (dt and noise scales are fixed at construction).
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    pub state: State,
    pub covariance: Covariance,
    process_noise_scale: f64,
    measurement_noise_center: f64,
    measurement_noise_shape: f64,
}

impl KalmanFilter {
    /// Initialize from a first observed bounding box. Velocity components
    /// start at zero; covariance reflects high uncertainty on the
    /// unobserved velocity terms.
    pub fn new(bbox: &BoundingBox) -> Self {
        let (cx, cy) = bbox.center();
        let mut state = State::zeros();
        state[0] = cx as f64;
        state[1] = cy as f64;
        state[2] = bbox.area() as f64;
        state[3] = bbox.aspect_ratio() as f64;

        let mut covariance = Covariance::identity() * 10.0;
        // velocity terms start maximally uncertain
        covariance[(4, 4)] = 1000.0;
        covariance[(5, 5)] = 1000.0;
        covariance[(6, 6)] = 1000.0;

        Self {
            state,
            covariance,
            process_noise_scale: 0.01,
            measurement_noise_center: 1.0,
            measurement_noise_shape: 10.0,
        }
    }

    fn transition_matrix(dt: f64) -> SMatrix<f64, 7, 7> {
        let mut f = SMatrix::<f64, 7, 7>::identity();
        f[(0, 4)] = dt; // cx += vx*dt
        f[(1, 5)] = dt; // cy += vy*dt
        f[(2, 6)] = dt; // area += v_area*dt
        f
    }

    fn process_noise(&self, dt: f64) -> SMatrix<f64, 7, 7> {
        let mut q = SMatrix::<f64, 7, 7>::identity() * self.process_noise_scale;
        // velocity channels accumulate more uncertainty per unit time
        q[(4, 4)] *= dt.max(1e-6);
        q[(5, 5)] *= dt.max(1e-6);
        q[(6, 6)] *= dt.max(1e-6);
        q
    }

    fn measurement_matrix() -> SMatrix<f64, 4, 7> {
        let mut h = SMatrix::<f64, 4, 7>::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h[(2, 2)] = 1.0;
        h[(3, 3)] = 1.0;
        h
    }

    fn measurement_noise(&self) -> SMatrix<f64, 4, 4> {
        let mut r = SMatrix::<f64, 4, 4>::identity();
        r[(0, 0)] = self.measurement_noise_center;
        r[(1, 1)] = self.measurement_noise_center;
        r[(2, 2)] = self.measurement_noise_shape;
        r[(3, 3)] = self.measurement_noise_shape;
        r
    }

    /// Advance the state by `dt` seconds without a new measurement.
    pub fn predict(&mut self, dt: f64) {
        let f = Self::transition_matrix(dt);
        let q = self.process_noise(dt);
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + q;
        self.reset_if_non_finite();
    }

    /// Incorporate a new measurement, correcting the predicted state.
    pub fn update(&mut self, measurement: Measurement) {
        let h = Self::measurement_matrix();
        let r = self.measurement_noise();

        let y = measurement - h * self.state;
        let s = h * self.covariance * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            self.reset_covariance();
            return;
        };
        let k = self.covariance * h.transpose() * s_inv;

        self.state += k * y;
        let i = SMatrix::<f64, 7, 7>::identity();
        // Joseph form for numerical stability under repeated updates.
        let ikh = i - k * h;
        self.covariance = ikh * self.covariance * ikh.transpose() + k * r * k.transpose();
        self.reset_if_non_finite();
    }

    fn reset_if_non_finite(&mut self) {
        if !self.state.iter().all(|v| v.is_finite())
            || !self.covariance.iter().all(|v| v.is_finite())
        {
            let bbox = self.current_bbox();
            self.state = State::zeros();
            self.state[0] = bbox.0;
            self.state[1] = bbox.1;
            self.state[2] = bbox.2.max(1e-4);
            self.state[3] = bbox.3.max(1e-4);
            self.reset_covariance();
        }
    }

    fn reset_covariance(&mut self) {
        self.covariance = Covariance::identity() * 10.0;
        self.covariance[(4, 4)] = 1000.0;
        self.covariance[(5, 5)] = 1000.0;
        self.covariance[(6, 6)] = 1000.0;
    }

    fn current_bbox(&self) -> (f64, f64, f64, f64) {
        (self.state[0], self.state[1], self.state[2], self.state[3])
    }

    /// Reconstruct the bounding box implied by the current state:
    /// `(cx - sqrt(s/r)/2, cy - sqrt(s*r)/2, sqrt(s/r), sqrt(s*r))`.
    pub fn bbox(&self) -> BoundingBox {
        let (cx, cy, area, aspect) = self.current_bbox();
        BoundingBox::from_center_area_aspect(cx as f32, cy as f32, area as f32, aspect as f32)
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[4], self.state[5])
    }

    pub fn measurement_from_bbox(bbox: &BoundingBox) -> Measurement {
        let (cx, cy) = bbox.center();
        Measurement::new(cx as f64, cy as f64, bbox.area() as f64, bbox.aspect_ratio() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_box_converges_to_zero_velocity() {
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.3);
        let mut kf = KalmanFilter::new(&bbox);
        for _ in 0..10 {
            kf.predict(0.1);
            kf.update(KalmanFilter::measurement_from_bbox(&bbox));
        }
        let (vx, vy) = kf.velocity();
        assert!(vx.abs() < 1e-2, "vx={vx}");
        assert!(vy.abs() < 1e-2, "vy={vy}");
    }

    #[test]
    fn non_finite_state_is_reset() {
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.3);
        let mut kf = KalmanFilter::new(&bbox);
        kf.state[4] = f64::NAN;
        kf.reset_if_non_finite();
        assert!(kf.state.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn bbox_round_trips_through_state() {
        let bbox = BoundingBox::new(0.2, 0.3, 0.15, 0.25);
        let kf = KalmanFilter::new(&bbox);
        let recovered = kf.bbox();
        assert!((recovered.x - bbox.x).abs() < 1e-4);
        assert!((recovered.width - bbox.width).abs() < 1e-4);
    }

    #[test]
    fn moving_box_picks_up_velocity() {
        let mut bbox = BoundingBox::new(0.1, 0.1, 0.1, 0.1);
        let mut kf = KalmanFilter::new(&bbox);
        for _ in 0..20 {
            kf.predict(0.1);
            bbox.x += 0.01;
            kf.update(KalmanFilter::measurement_from_bbox(&bbox));
        }
        let (vx, _) = kf.velocity();
        assert!(vx > 0.05, "expected positive vx, got {vx}");
    }
}
