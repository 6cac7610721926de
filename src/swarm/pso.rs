//! Particle swarm update rule
//!
//! Pure functions only; the coordinator supplies the random coefficients so the
//! math can be checked with fixed values.

use super::geometry::{Bounds, Position, Velocity};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Classic PSO weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PsoWeights {
    /// Inertia (w): how much of the previous velocity is kept
    pub inertia: f64,

    /// Cognitive (c1): pull toward the agent's personal best
    pub cognitive: f64,

    /// Social (c2): pull toward the global best
    pub social: f64,
}

impl Default for PsoWeights {
    fn default() -> Self {
        Self {
            inertia: 0.5,
            cognitive: 1.5,
            social: 1.5,
        }
    }
}

/// Per-axis random coefficients in [0, 1)
pub type Coefficients = (f64, f64);

/// Draw an independent coefficient pair
pub fn draw_coefficients<R: Rng>(rng: &mut R) -> Coefficients {
    (rng.random::<f64>(), rng.random::<f64>())
}

/// Draw an initial velocity uniformly in [-spread, spread] on each axis
pub fn initial_velocity<R: Rng>(rng: &mut R, spread: f64) -> Velocity {
    if spread <= 0.0 {
        return Velocity::ZERO;
    }
    Velocity::new(
        rng.random_range(-spread..=spread),
        rng.random_range(-spread..=spread),
    )
}

/// `w*v + c1*r1*(pbest - x) + c2*r2*(gbest - x)`
pub fn next_velocity(
    weights: &PsoWeights,
    velocity: Velocity,
    position: Position,
    personal_best: Position,
    global_best: Position,
    r1: Coefficients,
    r2: Coefficients,
) -> Velocity {
    velocity * weights.inertia
        + (personal_best - position).scale(r1) * weights.cognitive
        + (global_best - position).scale(r2) * weights.social
}

/// Result of moving one particle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub velocity: Velocity,
    pub target: Position,
}

/// New velocity plus the clamped target position
#[allow(clippy::too_many_arguments)]
pub fn step(
    weights: &PsoWeights,
    bounds: &Bounds,
    velocity: Velocity,
    position: Position,
    personal_best: Position,
    global_best: Position,
    r1: Coefficients,
    r2: Coefficients,
) -> Step {
    let velocity = next_velocity(
        weights,
        velocity,
        position,
        personal_best,
        global_best,
        r1,
        r2,
    );
    Step {
        velocity,
        target: bounds.clamp(position + velocity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_velocity_with_fixed_coefficients() {
        let weights = PsoWeights::default();
        let v = next_velocity(
            &weights,
            Velocity::new(2.0, -2.0),
            Position::new(0.0, 0.0),
            Position::new(1.0, 0.0),
            Position::new(0.0, 4.0),
            (1.0, 1.0),
            (0.5, 0.5),
        );
        // 0.5*2 + 1.5*1*1 + 1.5*0.5*0 = 2.5
        // 0.5*-2 + 1.5*1*0 + 1.5*0.5*4 = 2.0
        assert_eq!(v, Velocity::new(2.5, 2.0));
    }

    #[test]
    fn test_zero_coefficients_keep_momentum() {
        let weights = PsoWeights::default();
        let v = next_velocity(
            &weights,
            Velocity::new(4.0, 6.0),
            Position::new(1.0, 1.0),
            Position::new(9.0, 9.0),
            Position::new(-9.0, -9.0),
            (0.0, 0.0),
            (0.0, 0.0),
        );
        assert_eq!(v, Velocity::new(2.0, 3.0));
    }

    #[test]
    fn test_step_clamps_target() {
        let weights = PsoWeights {
            inertia: 1.0,
            cognitive: 0.0,
            social: 0.0,
        };
        let bounds = Bounds::default();
        let s = step(
            &weights,
            &bounds,
            Velocity::new(50.0, 0.5),
            Position::new(5.0, 5.0),
            Position::new(5.0, 5.0),
            Position::new(5.0, 5.0),
            (0.3, 0.3),
            (0.3, 0.3),
        );
        assert_eq!(s.velocity, Velocity::new(50.0, 0.5));
        assert_eq!(s.target, Position::new(10.0, 5.5));
    }

    #[test]
    fn test_particle_at_both_bests_only_drifts() {
        let weights = PsoWeights::default();
        let here = Position::new(2.0, 3.0);
        let s = step(
            &weights,
            &Bounds::default(),
            Velocity::ZERO,
            here,
            here,
            here,
            (0.9, 0.1),
            (0.4, 0.7),
        );
        assert_eq!(s.velocity, Velocity::ZERO);
        assert_eq!(s.target, here);
    }

    #[test]
    fn test_random_draws_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let (a, b) = draw_coefficients(&mut rng);
            assert!((0.0..1.0).contains(&a));
            assert!((0.0..1.0).contains(&b));

            let v = initial_velocity(&mut rng, 1.0);
            assert!((-1.0..=1.0).contains(&v.x));
            assert!((-1.0..=1.0).contains(&v.y));
        }
        assert_eq!(initial_velocity(&mut rng, 0.0), Velocity::ZERO);
    }
}
