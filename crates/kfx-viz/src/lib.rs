//! Bijective `[0,1] -> [0,1]` projections (spec §4.8, C8). Grounded in
//! `StationApp/Maths/NormalizedBijectiveProjection.h`. Allocation-free on
//! the hot path once a projection is built, and safe to call from any
//! thread since every variant is immutable after construction.

/// A nearly-bijective map from `[0,1]` to `[0,1]`; tiny artefacts at the
/// extremes are tolerated.
pub trait Projection: Send + Sync {
    fn project_in(&self, x: f32) -> f32;
    fn project_out(&self, x: f32) -> f32;
}

fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Identity, clamped to `[0,1]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Linear;

impl Projection for Linear {
    fn project_in(&self, x: f32) -> f32 {
        clamp01(x)
    }

    fn project_out(&self, x: f32) -> f32 {
        clamp01(x)
    }
}

/// `f(x) = a * log10(x + shift) + b`, coefficients chosen so `f(0) = 0`
/// and `f(1) = 1`.
#[derive(Debug, Clone, Copy)]
pub struct Log10 {
    shift: f32,
    a_coef: f32,
    b_coef: f32,
    precomputed: f32,
}

impl Log10 {
    /// `shift` must be strictly positive; it keeps `log10` away from zero.
    pub fn new(shift: f32) -> Self {
        assert!(shift > f32::EPSILON, "Log10 shift must be strictly positive");
        let a_coef = 1.0 / ((shift + 1.0) / shift).log10();
        let b_coef = 1.0 / shift;
        let precomputed = a_coef * b_coef.log10();
        Self { shift, a_coef, b_coef, precomputed }
    }
}

impl Default for Log10 {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl Projection for Log10 {
    fn project_in(&self, x: f32) -> f32 {
        let shifted = clamp01(x) + self.shift;
        self.precomputed + self.a_coef * shifted.log10()
    }

    fn project_out(&self, x: f32) -> f32 {
        let clamped = clamp01(x);
        (10f32.powf(clamped / self.a_coef) / self.b_coef) - self.shift
    }
}

/// `f(x) = a + b / (1 + exp(-c*(2x-1)))`, mapped through `[-range, range]`
/// before the sigmoid so `c` controls steepness around the midpoint.
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid {
    max_source_range: f32,
    a: f32,
    b: f32,
}

impl Sigmoid {
    pub fn new(max_source_range: f32) -> Self {
        let expc = max_source_range.exp();
        let a = -1.0 / (expc - 1.0);
        let b = (expc + 1.0) / (expc - 1.0);
        Self { max_source_range, a, b }
    }
}

impl Default for Sigmoid {
    fn default() -> Self {
        Self::new(6.0)
    }
}

impl Projection for Sigmoid {
    fn project_in(&self, x: f32) -> f32 {
        let mapped = clamp01(x) * 2.0 - 1.0;
        self.a + self.b / (1.0 + (-mapped * self.max_source_range).exp())
    }

    fn project_out(&self, x: f32) -> f32 {
        let clamped = clamp01(x);
        let unsigmoided = -(1.0 / self.max_source_range) * ((self.b / (clamped - self.a)) - 1.0).ln();
        (unsigmoided + 1.0) / 2.0
    }
}

/// Chains projections in forward order; `project_out` unwinds them in
/// reverse. An empty stack behaves like [`Linear`].
#[derive(Default)]
pub struct Stacked {
    projections: Vec<Box<dyn Projection>>,
}

impl Stacked {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }
}

impl Projection for Stacked {
    fn project_in(&self, x: f32) -> f32 {
        if self.projections.is_empty() {
            return Linear.project_in(x);
        }
        self.projections.iter().fold(x, |acc, p| p.project_in(acc))
    }

    fn project_out(&self, x: f32) -> f32 {
        if self.projections.is_empty() {
            return Linear.project_out(x);
        }
        self.projections.iter().rev().fold(x, |acc, p| p.project_out(acc))
    }
}

/// Swaps `project_in` and `project_out` of the wrapped projection.
pub struct Inverted<P: Projection>(pub P);

impl<P: Projection> Projection for Inverted<P> {
    fn project_in(&self, x: f32) -> f32 {
        self.0.project_out(x)
    }

    fn project_out(&self, x: f32) -> f32 {
        self.0.project_in(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_round_trips(p: &dyn Projection) {
        for i in 0..=20 {
            let x = i as f32 / 20.0;
            let round_tripped = p.project_out(p.project_in(x));
            assert!(
                (round_tripped - x).abs() < 1e-4,
                "x={x} round_tripped={round_tripped}"
            );
        }
    }

    /// Property 8 — projection round-trip, every variant.
    #[test]
    fn property8_linear_round_trips() {
        assert_round_trips(&Linear);
    }

    #[test]
    fn property8_log10_round_trips() {
        assert_round_trips(&Log10::default());
    }

    #[test]
    fn property8_sigmoid_round_trips() {
        assert_round_trips(&Sigmoid::default());
    }

    #[test]
    fn property8_stacked_round_trips() {
        let mut stacked = Stacked::new();
        stacked.push(Box::new(Log10::default()));
        stacked.push(Box::new(Sigmoid::default()));
        assert_round_trips(&stacked);
    }

    #[test]
    fn property8_inverted_round_trips() {
        assert_round_trips(&Inverted(Log10::default()));
    }

    /// Scenario S5.
    #[test]
    fn s5_log10_endpoints_and_midpoint() {
        let log10 = Log10::new(0.1);
        assert_relative_eq!(log10.project_in(0.0), 0.0, epsilon = 1e-5);
        assert_relative_eq!(log10.project_in(1.0), 1.0, epsilon = 1e-5);
        assert_relative_eq!(log10.project_in(0.5), 0.747, epsilon = 1e-3);
    }

    #[test]
    fn inverted_swaps_directions() {
        let log10 = Log10::default();
        let inverted = Inverted(log10);
        assert_relative_eq!(inverted.project_in(0.3), log10.project_out(0.3), epsilon = 1e-6);
        assert_relative_eq!(inverted.project_out(0.3), log10.project_in(0.3), epsilon = 1e-6);
    }

    #[test]
    fn linear_clamps_out_of_range_input() {
        assert_eq!(Linear.project_in(-1.0), 0.0);
        assert_eq!(Linear.project_in(2.0), 1.0);
    }
}
