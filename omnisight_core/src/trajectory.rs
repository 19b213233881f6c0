//! Future position extrapolation per track, under a selectable motion
//! model, with branching into alternative futures.

use crate::tracker::{BehaviorFlags, Track};

/// Motion model capability selected at predictor construction (§4.3
/// Supplemented, §9 "Polymorphic motion model"). The hot loop dispatches
/// on this tag rather than through a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionModel {
    ConstantVelocity,
    ConstantAcceleration,
    KalmanFilter,
    SocialForce,
}

#[derive(Debug, Clone, Copy)]
pub struct PredictedState {
    pub t_ms: u64,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub confidence: f32,
    pub behaviors: BehaviorFlags,
    pub threat: f32,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    pub track_id: u32,
    pub states: Vec<PredictedState>,
    pub overall_confidence: f32,
}

#[derive(Debug, Clone)]
pub struct TrajectoryConfig {
    pub model: MotionModel,
    pub horizon_ms: u64,
    pub step_ms: u64,
    pub uncertainty_growth: f32,
    pub consider_interactions: bool,
    pub consider_boundaries: bool,
    pub social_force_strength: f32,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            model: MotionModel::KalmanFilter,
            horizon_ms: 300_000,
            step_ms: 1000,
            uncertainty_growth: 0.01,
            consider_interactions: false,
            consider_boundaries: true,
            social_force_strength: 0.05,
        }
    }
}

pub struct TrajectoryPredictor {
    pub config: TrajectoryConfig,
}

impl TrajectoryPredictor {
    pub fn new(config: TrajectoryConfig) -> Self {
        Self { config }
    }

    fn num_steps(&self) -> usize {
        ((self.config.horizon_ms as f64) / (self.config.step_ms as f64)).ceil() as usize
    }

    /// Produce a single forward-extrapolated trajectory for one track
    /// under the configured model.
    pub fn predict(&self, track: &Track, now_ms: u64) -> Trajectory {
        self.predict_with_velocity(track, now_ms, track.velocity())
    }

    fn predict_with_velocity(&self, track: &Track, now_ms: u64, initial_velocity: (f64, f64)) -> Trajectory {
        let (cx, cy) = track.predicted_bbox().center();
        let dt_s = self.config.step_ms as f32 / 1000.0;
        let steps = self.num_steps();

        let mut x = cx;
        let mut y = cy;
        let (mut vx, mut vy) = (initial_velocity.0 as f32, initial_velocity.1 as f32);
        let ax = 0.0f32;
        let ay = 0.0f32;
        let mut confidence = track.confidence.clamp(0.0, 1.0);
        let mut states = Vec::with_capacity(steps);

        // `states[0]` is the present state (§3 `states[0].t_ms == now`):
        // unperturbed position, initial confidence, no motion or decay
        // applied yet. Steps 1.. advance the model by one `dt_s` each.
        for i in 0..steps {
            let t_ms = now_ms + (i as u64) * self.config.step_ms;

            if i > 0 {
                match self.config.model {
                    MotionModel::ConstantVelocity => {
                        x += vx * dt_s;
                        y += vy * dt_s;
                    }
                    MotionModel::ConstantAcceleration => {
                        vx += ax * dt_s;
                        vy += ay * dt_s;
                        x += vx * dt_s;
                        y += vy * dt_s;
                    }
                    MotionModel::KalmanFilter => {
                        x += vx * dt_s;
                        y += vy * dt_s;
                    }
                    MotionModel::SocialForce => {
                        x += vx * dt_s;
                        y += vy * dt_s;
                        // repulsion term applied externally via `apply_social_force`
                    }
                }

                confidence = (confidence * (1.0 - self.config.uncertainty_growth * dt_s)).max(0.0);

                if self.config.consider_boundaries && (!(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y)) {
                    x = x.clamp(0.0, 1.0);
                    y = y.clamp(0.0, 1.0);
                    confidence *= 0.5;
                }
            }

            states.push(PredictedState {
                t_ms,
                x,
                y,
                vx,
                vy,
                confidence,
                behaviors: track.behaviors,
                threat: track.threat,
            });
        }

        let overall_confidence = states.last().map(|s| s.confidence).unwrap_or(1.0);
        Trajectory { track_id: track.track_id, states, overall_confidence }
    }

    /// Apply a simple inverse-square repulsion between the current
    /// trajectory and a set of peer trajectories, in place, when
    /// `consider_interactions` is enabled and the model is `SocialForce`.
    pub fn apply_social_force(&self, trajectory: &mut Trajectory, peers: &[&Trajectory]) {
        if !self.config.consider_interactions || self.config.model != MotionModel::SocialForce {
            return;
        }
        for state in &mut trajectory.states {
            let mut fx = 0.0f32;
            let mut fy = 0.0f32;
            for peer in peers {
                if let Some(p) = peer.states.iter().find(|s| s.t_ms == state.t_ms) {
                    let dx = state.x - p.x;
                    let dy = state.y - p.y;
                    let dist_sq = (dx * dx + dy * dy).max(1e-4);
                    let scale = self.config.social_force_strength / dist_sq;
                    fx += dx * scale;
                    fy += dy * scale;
                }
            }
            state.x = (state.x + fx).clamp(0.0, 1.0);
            state.y = (state.y + fy).clamp(0.0, 1.0);
        }
    }

    /// Emit `k` alternative trajectories by perturbing the initial
    /// velocity vector's rotation ({-θ, 0, +θ}) and magnitude
    /// ({0.5v, v, 1.5v}), keeping the unperturbed center and selecting the
    /// remaining `k - 1` symmetrically around it, with probabilities
    /// proportional to softmax of negative perturbation norm (§4.3).
    ///
    /// Candidates are ranked by how "canonical" a perturbation they are
    /// before being ranked by perturbation norm: the center (rank 0) first,
    /// then the pure-rotation pair at full magnitude (rank 1) — a genuine
    /// change of heading, which is what makes branches "leftmost"/
    /// "rightmost" — then the pure-magnitude pair at zero rotation
    /// (rank 2), then the combined corners (rank 3). This keeps small `k`
    /// symmetric around the center instead of collapsing onto same-heading
    /// speed variants, which a pure norm sort would prefer whenever the
    /// track's speed is small relative to `theta`.
    pub fn predict_branches(&self, track: &Track, now_ms: u64, k: usize, theta_degrees: f32) -> Vec<(Trajectory, f32)> {
        let (vx0, vy0) = track.velocity();
        let (vx0, vy0) = (vx0 as f32, vy0 as f32);
        let theta = theta_degrees.to_radians();

        let rotations = [-theta, 0.0, theta];
        let magnitudes = [0.5f32, 1.0, 1.5];

        // (vx, vy, perturb_norm, distinctness_rank)
        let mut candidates: Vec<(f32, f32, f32, u8)> = Vec::new();
        for &rot in &rotations {
            for &mag in &magnitudes {
                let cos_r = rot.cos();
                let sin_r = rot.sin();
                let vx = mag * (vx0 * cos_r - vy0 * sin_r);
                let vy = mag * (vx0 * sin_r + vy0 * cos_r);
                let perturb = ((vx - vx0).powi(2) + (vy - vy0).powi(2)).sqrt();
                let rank = match (rot == 0.0, mag == 1.0) {
                    (true, true) => 0,
                    (false, true) => 1,
                    (true, false) => 2,
                    (false, false) => 3,
                };
                candidates.push((vx, vy, perturb, rank));
            }
        }

        candidates.sort_by(|a, b| a.3.cmp(&b.3).then(a.2.partial_cmp(&b.2).unwrap()));
        candidates.dedup_by(|a, b| (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6);
        candidates.truncate(k.max(1));

        let weights: Vec<f32> = candidates.iter().map(|c| (-c.2).exp()).collect();
        let sum: f32 = weights.iter().sum();

        candidates
            .iter()
            .zip(weights.iter())
            .map(|(c, w)| {
                let trajectory = self.predict_with_velocity(track, now_ms, (c.0 as f64, c.1 as f64));
                (trajectory, if sum > 0.0 { w / sum } else { 1.0 / candidates.len() as f32 })
            })
            .collect()
    }
}

/// Scan aligned time indices of two trajectories and return the earliest
/// index where the states come within `d_thr`, with probability equal to
/// the minimum of the two states' confidence.
pub fn detect_collision(a: &Trajectory, b: &Trajectory, d_thr: f32) -> Option<(usize, f32)> {
    let len = a.states.len().min(b.states.len());
    for i in 0..len {
        let sa = a.states[i];
        let sb = b.states[i];
        let dist = ((sa.x - sb.x).powi(2) + (sa.y - sb.y).powi(2)).sqrt();
        if dist < d_thr {
            return Some((i, sa.confidence.min(sb.confidence)));
        }
    }
    None
}

/// Analogous to `detect_collision` but against a static disc zone.
pub fn detect_zone_entry(trajectory: &Trajectory, cx: f32, cy: f32, radius: f32) -> Option<(usize, f32)> {
    for (i, state) in trajectory.states.iter().enumerate() {
        let dist = ((state.x - cx).powi(2) + (state.y - cy).powi(2)).sqrt();
        if dist < radius {
            return Some((i, state.confidence));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::kalman::KalmanFilter;
    use crate::tracker::ObjectClass;

    fn track_with_velocity(vx: f64, vy: f64) -> Track {
        let bbox = BoundingBox::new(0.4, 0.4, 0.1, 0.1);
        let mut kalman = KalmanFilter::new(&bbox);
        kalman.state[4] = vx;
        kalman.state[5] = vy;
        Track {
            track_id: 1,
            class: ObjectClass::Person,
            kalman,
            hits: 3,
            age: 3,
            since_update: 0,
            first_seen_ms: 0,
            last_seen_ms: 0,
            features: [0.0; 128],
            behaviors: BehaviorFlags::NORMAL,
            threat: 0.0,
            confidence: 0.9,
        }
    }

    #[test]
    fn first_state_is_the_present_unperturbed_state() {
        let predictor = TrajectoryPredictor::new(TrajectoryConfig::default());
        let track = track_with_velocity(0.01, 0.0);
        let trajectory = predictor.predict(&track, 5_000);
        assert_eq!(trajectory.states[0].t_ms, 5_000);
        assert!((trajectory.states[0].confidence - track.confidence).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_non_increasing() {
        let predictor = TrajectoryPredictor::new(TrajectoryConfig::default());
        let track = track_with_velocity(0.001, 0.0);
        let trajectory = predictor.predict(&track, 0);
        let mut last = f32::INFINITY;
        for s in &trajectory.states {
            assert!(s.confidence <= last + 1e-6);
            last = s.confidence;
        }
    }

    #[test]
    fn branch_probabilities_sum_to_one() {
        let mut config = TrajectoryConfig::default();
        config.horizon_ms = 10_000;
        config.step_ms = 1000;
        let predictor = TrajectoryPredictor::new(config);
        let track = track_with_velocity(0.02, 0.0);
        let branches = predictor.predict_branches(&track, 0, 3, 30.0);
        let sum: f32 = branches.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum={sum}");
    }

    #[test]
    fn branches_are_symmetric_around_a_higher_probability_center() {
        let mut config = TrajectoryConfig::default();
        config.horizon_ms = 10_000;
        config.step_ms = 1000;
        let predictor = TrajectoryPredictor::new(config);
        let track = track_with_velocity(0.02, 0.0);
        let branches = predictor.predict_branches(&track, 0, 3, 30.0);
        assert_eq!(branches.len(), 3);

        // Center (rot=0, mag=1) reproduces the unperturbed velocity and
        // carries the highest probability; the +/-theta pair is symmetric.
        let center = branches
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
        let center_state = &center.0.states[0];
        assert!((center_state.vx - 0.02).abs() < 1e-4);
        assert!(center_state.vy.abs() < 1e-4);

        let others: Vec<f32> = branches
            .iter()
            .filter(|b| (b.1 - center.1).abs() > 1e-6)
            .map(|b| b.1)
            .collect();
        assert_eq!(others.len(), 2);
        assert!((others[0] - others[1]).abs() < 1e-4, "others={others:?}");
        assert!(center.1 > others[0]);
    }

    #[test]
    fn boundary_clamp_halves_confidence() {
        let mut config = TrajectoryConfig::default();
        config.horizon_ms = 2000;
        config.step_ms = 1000;
        let predictor = TrajectoryPredictor::new(config);
        let track = track_with_velocity(10.0, 0.0); // absurdly fast, exits frame immediately
        let trajectory = predictor.predict(&track, 0);
        assert!(trajectory.states[1].x <= 1.0 && trajectory.states[1].x >= 0.0);
        assert!(trajectory.overall_confidence < 1.0);
    }

    #[test]
    fn detect_collision_finds_earliest_crossing() {
        let a = track_with_velocity(0.05, 0.0);
        let mut config = TrajectoryConfig::default();
        config.horizon_ms = 5000;
        config.step_ms = 1000;
        let predictor = TrajectoryPredictor::new(config);
        let traj_a = predictor.predict(&a, 0);

        let mut b = track_with_velocity(-0.05, 0.0);
        b.kalman = KalmanFilter::new(&BoundingBox::new(0.42, 0.4, 0.1, 0.1));
        b.kalman.state[4] = -0.05;
        let traj_b = predictor.predict(&b, 0);

        let collision = detect_collision(&traj_a, &traj_b, 0.1);
        assert!(collision.is_some());
    }
}
