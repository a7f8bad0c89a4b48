use chrono::{Days, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::toolkit;

pub const DEFAULT_TRIALS: usize = 10_000;
pub const DEFAULT_SPRINT_LENGTH_DAYS: u32 = 14;
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 85.0;
/// Safety cap on sprints per trial; a trial that reaches it is degenerate.
pub const MAX_SPRINTS_PER_TRIAL: u32 = 1000;
/// Coefficient of variation (stddev / mean) above which velocity is noisy.
pub const HIGH_VARIABILITY_RATIO: f64 = 0.5;
pub const MIN_HISTORY_SPRINTS: usize = 3;

const MIN_CONFIDENCE: f64 = 50.0;
const MAX_CONFIDENCE: f64 = 99.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastSettings {
    pub trials: usize,
    pub sprint_length_days: u32,
    pub confidence_level: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            sprint_length_days: DEFAULT_SPRINT_LENGTH_DAYS,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryInput {
    pub remaining_work: f64,
    pub mean_velocity: f64,
    pub std_dev_velocity: f64,
    pub confidence_level: f64,
    /// Overrides the engine's trial count.
    #[serde(default)]
    pub trials: Option<usize>,
    /// Number of sprints the velocity figures were derived from, if known.
    #[serde(default)]
    pub history_len: Option<usize>,
}

impl DeliveryInput {
    pub fn from_history(velocities: &[f64], remaining_work: f64, confidence_level: f64) -> Self {
        Self {
            remaining_work,
            mean_velocity: toolkit::average(velocities),
            std_dev_velocity: toolkit::standard_deviation(velocities),
            confidence_level,
            trials: None,
            history_len: Some(velocities.len()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastBand {
    pub sprints: u32,
    pub date: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryForecast {
    pub confidence_level: f64,
    pub trials: usize,
    pub degenerate_trials: usize,
    pub optimistic: ForecastBand,
    pub likely: ForecastBand,
    pub pessimistic: ForecastBand,
    pub mean_sprints: f64,
    pub risks: Vec<String>,
    pub assumptions: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ForecastEngine {
    settings: ForecastSettings,
}

impl ForecastEngine {
    pub fn new(settings: ForecastSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn simulate_delivery(&self, input: &DeliveryInput, start: NaiveDate) -> DeliveryForecast {
        self.simulate_delivery_with_rng(input, start, &mut rand::rng())
    }

    /// Runs the burn-down simulation with a caller-supplied generator.
    pub fn simulate_delivery_with_rng<R: Rng + ?Sized>(
        &self,
        input: &DeliveryInput,
        start: NaiveDate,
        rng: &mut R,
    ) -> DeliveryForecast {
        let trials = input.trials.unwrap_or(self.settings.trials).max(1);
        let confidence = clamp_confidence(input.confidence_level);

        let mut degenerate = 0usize;
        let counts: Vec<f64> = (0..trials)
            .map(|_| {
                let (sprints, capped) = run_trial(input, rng);
                if capped {
                    degenerate += 1;
                }
                f64::from(sprints)
            })
            .collect();

        let band = |p: f64| {
            let sprints = toolkit::percentile(&counts, p) as u32;
            ForecastBand {
                sprints,
                date: self.sprint_end(start, sprints),
            }
        };
        let optimistic = band(100.0 - confidence);
        let likely = band(50.0);
        let pessimistic = band(confidence);

        DeliveryForecast {
            confidence_level: confidence,
            trials,
            degenerate_trials: degenerate,
            optimistic,
            likely,
            pessimistic,
            mean_sprints: toolkit::average(&counts),
            risks: self.risks(input, trials, degenerate),
            assumptions: self.assumptions(input),
        }
    }

    /// Derives mean and standard deviation from completed sprint velocities.
    pub fn from_history(
        &self,
        velocities: &[f64],
        remaining_work: f64,
        confidence_level: f64,
        start: NaiveDate,
    ) -> DeliveryForecast {
        let input = DeliveryInput::from_history(velocities, remaining_work, confidence_level);
        self.simulate_delivery(&input, start)
    }

    fn sprint_end(&self, start: NaiveDate, sprints: u32) -> NaiveDate {
        let days = u64::from(sprints) * u64::from(self.settings.sprint_length_days);
        start.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
    }

    fn risks(&self, input: &DeliveryInput, trials: usize, degenerate: usize) -> Vec<String> {
        let mut risks = Vec::new();
        if input.mean_velocity <= 0.0 {
            risks.push(format!(
                "mean velocity {:.2} is not positive; work never burns down on average",
                input.mean_velocity
            ));
        } else if input.std_dev_velocity / input.mean_velocity > HIGH_VARIABILITY_RATIO {
            risks.push(format!(
                "high velocity variability (stddev/mean = {:.2}); forecast range is wide",
                input.std_dev_velocity / input.mean_velocity
            ));
        }
        if degenerate > 0 {
            risks.push(format!(
                "{degenerate} of {trials} trials reached the {MAX_SPRINTS_PER_TRIAL}-sprint cap"
            ));
        }
        match input.history_len {
            Some(n) if n < MIN_HISTORY_SPRINTS => risks.push(format!(
                "only {n} sprint(s) of history; at least {MIN_HISTORY_SPRINTS} recommended"
            )),
            _ => {}
        }
        risks
    }

    fn assumptions(&self, input: &DeliveryInput) -> Vec<String> {
        vec![
            format!(
                "sprint velocity is normally distributed (mean {:.2}, stddev {:.2})",
                input.mean_velocity, input.std_dev_velocity
            ),
            format!("sprints are {} days long", self.settings.sprint_length_days),
            format!("remaining work of {:.2} stays fixed", input.remaining_work),
        ]
    }
}

fn clamp_confidence(level: f64) -> f64 {
    if level.is_nan() {
        return DEFAULT_CONFIDENCE_LEVEL;
    }
    level.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Returns the sprint count and whether the cap ended the trial.
fn run_trial<R: Rng + ?Sized>(input: &DeliveryInput, rng: &mut R) -> (u32, bool) {
    let mut remaining = input.remaining_work;
    let mut sprints = 0u32;
    while remaining > 0.0 {
        if sprints >= MAX_SPRINTS_PER_TRIAL {
            return (sprints, true);
        }
        remaining -= sample_normal(rng, input.mean_velocity, input.std_dev_velocity);
        sprints += 1;
    }
    (sprints, false)
}

/// Box–Muller transform.
fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev.max(0.0) * z
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn input(remaining: f64, mean: f64, sd: f64) -> DeliveryInput {
        DeliveryInput {
            remaining_work: remaining,
            mean_velocity: mean,
            std_dev_velocity: sd,
            confidence_level: 85.0,
            trials: Some(2_000),
            history_len: None,
        }
    }

    #[test]
    fn zero_variance_is_exact() {
        let engine = ForecastEngine::default();
        let mut rng = StdRng::seed_from_u64(7);
        let f = engine.simulate_delivery_with_rng(&input(100.0, 20.0, 0.0), start(), &mut rng);
        assert_eq!(f.optimistic.sprints, 5);
        assert_eq!(f.likely.sprints, 5);
        assert_eq!(f.pessimistic.sprints, 5);
        assert_eq!(f.likely.date, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(f.degenerate_trials, 0);
        assert!(f.risks.is_empty());
    }

    #[test]
    fn bands_are_ordered_with_noise() {
        let engine = ForecastEngine::default();
        let mut rng = StdRng::seed_from_u64(42);
        let f = engine.simulate_delivery_with_rng(&input(200.0, 20.0, 8.0), start(), &mut rng);
        assert!(f.optimistic.sprints <= f.likely.sprints);
        assert!(f.likely.sprints <= f.pessimistic.sprints);
        assert!(f.optimistic.date <= f.pessimistic.date);
        assert!(f.mean_sprints > 5.0);
    }

    #[test]
    fn non_positive_mean_is_capped_and_reported() {
        let engine = ForecastEngine::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut inp = input(50.0, 0.0, 0.0);
        inp.trials = Some(10);
        let f = engine.simulate_delivery_with_rng(&inp, start(), &mut rng);
        assert_eq!(f.degenerate_trials, 10);
        assert_eq!(f.likely.sprints, MAX_SPRINTS_PER_TRIAL);
        assert!(f.risks.iter().any(|r| r.contains("not positive")));
        assert!(f.risks.iter().any(|r| r.contains("cap")));
    }

    #[test]
    fn noisy_and_sparse_history_surface_as_risks() {
        let inp = DeliveryInput::from_history(&[5.0, 25.0], 60.0, 90.0);
        assert_eq!(inp.mean_velocity, 15.0);
        assert_eq!(inp.std_dev_velocity, 10.0);
        let engine = ForecastEngine::new(ForecastSettings {
            trials: 500,
            ..ForecastSettings::default()
        });
        let mut rng = StdRng::seed_from_u64(3);
        let f = engine.simulate_delivery_with_rng(&inp, start(), &mut rng);
        assert_eq!(f.trials, 500);
        assert!(f.risks.iter().any(|r| r.contains("variability")));
        assert!(f.risks.iter().any(|r| r.contains("history")));
    }

    #[test]
    fn confidence_and_trials_are_clamped() {
        let engine = ForecastEngine::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut inp = input(10.0, 5.0, 1.0);
        inp.confidence_level = 20.0;
        inp.trials = Some(0);
        let f = engine.simulate_delivery_with_rng(&inp, start(), &mut rng);
        assert_eq!(f.confidence_level, 50.0);
        assert_eq!(f.trials, 1);
    }

    #[test]
    fn nothing_remaining_means_zero_sprints() {
        let engine = ForecastEngine::default();
        let f = engine.simulate_delivery(&input(0.0, 10.0, 2.0), start());
        assert_eq!(f.pessimistic.sprints, 0);
        assert_eq!(f.pessimistic.date, start());
    }
}
