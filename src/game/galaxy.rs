//! Spiral Galaxy Generation
//!
//! One large neutral star sits at the origin. The rest are scattered along
//! a two-armed logarithmic spiral `r = a * e^(b * t)`, the second arm being
//! the first mirrored through the origin, with jitter that grows towards
//! the rim. A relaxation pass then pushes apart stars that sit too close.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{DeterministicRng, Vec2};
use crate::game::fleet::{CombatRules, Fleet};
use crate::game::player::PlayerId;
use crate::game::star::{Star, StarId};
use crate::game::starmap::StarMap;

/// Galaxy shape parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalaxyConfig {
    /// Total stars including the centre.
    pub star_count: usize,
    /// Generation seed.
    pub seed: u64,
    /// Outer radius the spiral is scaled to.
    pub max_radius: f32,
    /// Id of the centre star; the others count up from it.
    pub first_id: i32,
    /// Radius of the centre star.
    pub central_radius: f32,
    /// Smallest radius of an ordinary star.
    pub min_star_radius: f32,
    /// Largest radius of an ordinary star.
    pub max_star_radius: f32,
    /// Spiral scale `a`.
    pub spiral_a: f64,
    /// Spiral growth `b`.
    pub spiral_b: f64,
    /// Turns per arm.
    pub windings: f64,
    /// Jitter away from the arm centre line.
    pub drift: f64,
    /// Garrison every star starts with, per type.
    pub neutral_garrison: [u16; 3],
    /// Give up relaxing after this many passes.
    pub max_relax_passes: usize,
}

impl Default for GalaxyConfig {
    fn default() -> Self {
        Self {
            star_count: 30,
            seed: 0x5747_4152,
            max_radius: 2.5,
            first_id: 1337,
            central_radius: 0.15,
            min_star_radius: 0.03,
            max_star_radius: 0.05,
            spiral_a: 1.0,
            spiral_b: 0.2,
            windings: 4.0,
            drift: 0.004,
            neutral_garrison: [5, 5, 5],
            max_relax_passes: 1000,
        }
    }
}

/// Generate a galaxy. The same config always yields the same map.
pub fn generate(config: &GalaxyConfig, rules: CombatRules, neutral: PlayerId) -> StarMap {
    let mut rng = DeterministicRng::new(config.seed);
    let mut bodies = scatter(config, &mut rng);
    relax(&mut bodies, config.max_relax_passes);

    let [a, b, c] = config.neutral_garrison;
    let mut map = StarMap::new(rules);
    for (i, body) in bodies.iter().enumerate() {
        let id = StarId(config.first_id + i as i32);
        let star = Star::new(id, body.center, body.size, Fleet::new(neutral, a, b, c));
        if let Err(e) = map.insert(star) {
            warn!(error = %e, "Dropping generated star");
        }
    }
    map.set_central(StarId(config.first_id));

    info!(stars = map.len(), seed = config.seed, "Galaxy generated");
    map
}

/// A star before it becomes a [`Star`]: centre and side length.
#[derive(Debug, Clone, Copy)]
struct Body {
    center: Vec2,
    size: f32,
}

fn scatter(config: &GalaxyConfig, rng: &mut DeterministicRng) -> Vec<Body> {
    let mut bodies = Vec::with_capacity(config.star_count.max(1));
    bodies.push(Body { center: Vec2::ZERO, size: config.central_radius * 2.0 });

    let (a, b) = (config.spiral_a, config.spiral_b);
    let t_max = std::f64::consts::TAU * config.windings;
    let scale = config.max_radius as f64 / (a * (b * t_max).exp());

    for i in 1..config.star_count {
        // Biased towards large t so the outer arms are denser.
        let t = 0.5 + t_max * rng.next_f64().powf(0.15);
        let r = a * (b * t).exp();
        let mut x = r * t.cos();
        let mut y = r * t.sin();
        x += config.drift * t * x * rng.next_jitter();
        y += config.drift * t * y * rng.next_jitter();
        x *= scale;
        y *= scale;

        if i % 2 == 0 {
            x = -x;
            y = -y;
        }

        let radius = rng.next_range(config.min_star_radius as f64, config.max_star_radius as f64);
        bodies.push(Body {
            center: Vec2::new(x as f32, y as f32),
            size: radius as f32 * 2.0,
        });
    }
    bodies
}

/// Push apart pairs whose centres are closer than the sum of their sizes.
/// Body 0 (the centre) never moves.
fn relax(bodies: &mut [Body], max_passes: usize) {
    for pass in 0..max_passes {
        let mut moved = false;
        for i in 0..bodies.len() {
            for j in (i + 1)..bodies.len() {
                let (fixed, mover) = (bodies[i], bodies[j]);
                let required = fixed.size + mover.size;
                let dist = fixed.center.distance(mover.center);
                if dist >= required {
                    continue;
                }
                let mut away = (mover.center - fixed.center).normalize();
                if away == Vec2::ZERO {
                    away = Vec2::new(1.0, 0.0);
                }
                let push = (required - dist).max(fixed.size);
                bodies[j].center = mover.center + away * push;
                moved = true;
            }
        }
        if !moved {
            debug!(passes = pass, "Star spacing settled");
            return;
        }
    }
    warn!(max_passes, "Star spacing did not settle");
}
