//! Parameter search strategies.
//!
//! Every strategy explores the neighbourhood of a baseline parameter set and
//! reports candidates through a [`SearchContext`], which owns scoring, best
//! tracking, the trial log and the stop/timeout checks.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pf_types::{
    OptimizationError, OptimizationMethod, ParamValue, Parameters, PerformanceMetrics, PfResult,
    Timeseries,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::debug;

use crate::evaluator::PerformanceEvaluator;
use crate::trial::{OptimizationConfig, Trial};

/// Progress callback, called with the completed fraction in [0, 1].
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// Numeric parameters are kept inside this range by the gradient strategy.
pub const GRADIENT_BOUNDS: (f64, f64) = (0.01, 10.0);

/// Random cold-start samples before the bayesian strategy starts exploiting.
pub const BAYESIAN_WARMUP: usize = 5;

/// Generations the genetic strategy always runs before it may stop early.
pub const GENETIC_MIN_GENERATIONS: usize = 10;

/// Shared state of one search run.
pub struct SearchContext<'a> {
    evaluator: &'a PerformanceEvaluator,
    algorithm_key: &'a str,
    datasets: &'a [Timeseries],
    config: &'a OptimizationConfig,
    baseline: Parameters,
    baseline_score: f64,
    best_parameters: Parameters,
    best_score: f64,
    best_metrics: Option<PerformanceMetrics>,
    rng: ChaCha8Rng,
    started: Instant,
    deadline: Duration,
    stop: Option<Arc<AtomicBool>>,
    progress: Option<Arc<ProgressFn>>,
    log: Vec<Trial>,
    iterations: usize,
    evaluations: usize,
    generation_best: Vec<f64>,
    stopped_early: bool,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        evaluator: &'a PerformanceEvaluator,
        algorithm_key: &'a str,
        datasets: &'a [Timeseries],
        config: &'a OptimizationConfig,
        baseline: Parameters,
        baseline_score: f64,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            evaluator,
            algorithm_key,
            datasets,
            config,
            best_parameters: baseline.clone(),
            baseline,
            baseline_score,
            best_score: baseline_score,
            best_metrics: None,
            rng,
            started: Instant::now(),
            deadline: Duration::from_secs(config.timeout_minutes.saturating_mul(60)),
            stop: None,
            progress: None,
            log: Vec::new(),
            iterations: 0,
            evaluations: 0,
            generation_best: Vec::new(),
            stopped_early: false,
        }
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &OptimizationConfig {
        self.config
    }

    pub fn baseline(&self) -> &Parameters {
        &self.baseline
    }

    pub fn baseline_score(&self) -> f64 {
        self.baseline_score
    }

    pub fn best_parameters(&self) -> &Parameters {
        &self.best_parameters
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best_metrics(&self) -> Option<&PerformanceMetrics> {
        self.best_metrics.as_ref()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn generation_best(&self) -> &[f64] {
        &self.generation_best
    }

    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    pub fn log(&self) -> &[Trial] {
        &self.log
    }

    pub fn into_log(self) -> Vec<Trial> {
        self.log
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// True once the stop flag is raised or the timeout has elapsed.
    ///
    /// Strategies call this between iterations and return with their
    /// best-so-far when it fires.
    pub fn should_stop(&mut self) -> bool {
        let requested = self
            .stop
            .as_ref()
            .map(|s| s.load(AtomicOrdering::Relaxed))
            .unwrap_or(false);
        let timed_out = self.started.elapsed() >= self.deadline;
        if requested || timed_out {
            if !self.stopped_early {
                debug!(
                    algorithm = self.algorithm_key,
                    requested,
                    timed_out,
                    iterations = self.iterations,
                    "search stopping early"
                );
            }
            self.stopped_early = true;
        }
        self.stopped_early
    }

    /// Score a candidate without recording it.
    pub fn evaluate(&self, parameters: &Parameters) -> (f64, PerformanceMetrics) {
        let metrics = self
            .evaluator
            .evaluate(self.algorithm_key, parameters, self.datasets);
        let score = metrics
            .metric(&self.config.target_metric)
            .filter(|s| s.is_finite())
            .unwrap_or(0.0);
        (score, metrics)
    }

    /// Record an already scored candidate.
    pub fn record(&mut self, parameters: &Parameters, score: f64, metrics: PerformanceMetrics) {
        self.evaluations += 1;
        if score > self.best_score {
            self.best_score = score;
            self.best_parameters = parameters.clone();
            self.best_metrics = Some(metrics);
        }
        self.log.push(Trial {
            iteration: self.iterations,
            parameters: parameters.clone(),
            score,
            best_so_far: self.best_score,
        });
    }

    /// Score and record a candidate.
    pub fn score(&mut self, parameters: &Parameters) -> f64 {
        let (score, metrics) = self.evaluate(parameters);
        self.record(parameters, score, metrics);
        score
    }

    /// Close an iteration and report progress against `total`.
    pub fn finish_iteration(&mut self, total: usize) {
        self.iterations += 1;
        if let Some(progress) = &self.progress {
            progress((self.iterations as f64 / total.max(1) as f64).min(1.0));
        }
    }

    fn push_generation_best(&mut self, score: f64) {
        self.generation_best.push(score);
    }
}

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Explore candidates until the budget is spent or the context says stop.
    fn run(&mut self, ctx: &mut SearchContext<'_>) -> PfResult<()>;

    fn method(&self) -> OptimizationMethod;

    /// Human-readable strategy name.
    fn name(&self) -> &str {
        self.method().as_str()
    }
}

/// Build the strategy selected by `config.method`.
pub fn strategy_for(config: &OptimizationConfig) -> PfResult<Box<dyn SearchStrategy>> {
    config.validate()?;
    Ok(match config.method {
        OptimizationMethod::Random => Box::new(RandomSearch),
        OptimizationMethod::Bayesian => Box::new(BayesianSearch::default()),
        OptimizationMethod::Gradient => Box::new(GradientSearch),
        OptimizationMethod::Genetic => Box::new(GeneticSearch),
        other => {
            return Err(OptimizationError::UnknownMethod {
                method: other.to_string(),
            }
            .into())
        }
    })
}

// ---------------------------------------------------------------------------
// Sampling helpers
// ---------------------------------------------------------------------------

/// Sampling range around a baseline value: `[0.5v, 2v]`, or `[0, 1]` at zero.
fn neighbourhood(v: f64) -> (f64, f64) {
    if v == 0.0 {
        (0.0, 1.0)
    } else {
        let (a, b) = (0.5 * v, 2.0 * v);
        (a.min(b), a.max(b))
    }
}

/// Draw a candidate uniformly from the neighbourhood of `baseline`.
pub fn sample_around<R: Rng>(baseline: &Parameters, rng: &mut R) -> Parameters {
    baseline
        .iter()
        .map(|(name, value)| {
            let sampled = match value {
                ParamValue::Bool(_) => ParamValue::Bool(rng.gen_bool(0.5)),
                numeric => {
                    let v = numeric.as_f64().unwrap_or(0.0);
                    let (lo, hi) = neighbourhood(v);
                    if lo.is_finite() && hi.is_finite() {
                        numeric.with_numeric(rng.gen_range(lo..=hi))
                    } else {
                        *numeric
                    }
                }
            };
            (name.clone(), sampled)
        })
        .collect()
}

fn gaussian<R: Rng>(rng: &mut R, sigma: f64) -> f64 {
    match Normal::new(0.0, sigma) {
        Ok(normal) if sigma > 0.0 => normal.sample(rng),
        _ => 0.0,
    }
}

// ---- Random search ----

/// Independent uniform sampling around the baseline.
#[derive(Debug, Clone, Default)]
pub struct RandomSearch;

impl SearchStrategy for RandomSearch {
    fn run(&mut self, ctx: &mut SearchContext<'_>) -> PfResult<()> {
        let total = ctx.config().max_iterations;
        for _ in 0..total {
            if ctx.should_stop() {
                break;
            }
            let baseline = ctx.baseline().clone();
            let candidate = sample_around(&baseline, ctx.rng());
            ctx.score(&candidate);
            ctx.finish_iteration(total);
        }
        Ok(())
    }

    fn method(&self) -> OptimizationMethod {
        OptimizationMethod::Random
    }
}

// ---- Bayesian search (random then hill-climb) ----

/// Simplified "bayesian" search.
///
/// A few random samples, then Gaussian perturbation of the best point seen
/// so far. There is no surrogate model.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    warmup: usize,
    /// Noise as a fraction of each parameter's range.
    sigma_fraction: f64,
    /// Chance of flipping a boolean during exploitation.
    flip_probability: f64,
}

impl Default for BayesianSearch {
    fn default() -> Self {
        Self {
            warmup: BAYESIAN_WARMUP,
            sigma_fraction: 0.1,
            flip_probability: 0.1,
        }
    }
}

impl BayesianSearch {
    fn exploit<R: Rng>(&self, baseline: &Parameters, best: &Parameters, rng: &mut R) -> Parameters {
        baseline
            .iter()
            .map(|(name, base)| {
                let current = best.get(name).copied().unwrap_or(*base);
                let value = match current {
                    ParamValue::Bool(b) => ParamValue::Bool(if rng.gen_bool(self.flip_probability) { !b } else { b }),
                    numeric => {
                        let (lo, hi) = neighbourhood(base.as_f64().unwrap_or(0.0));
                        let v = numeric.as_f64().unwrap_or(lo);
                        let noisy = v + gaussian(rng, self.sigma_fraction * (hi - lo));
                        numeric.with_numeric(noisy.clamp(lo, hi))
                    }
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl SearchStrategy for BayesianSearch {
    fn run(&mut self, ctx: &mut SearchContext<'_>) -> PfResult<()> {
        let total = ctx.config().max_iterations;
        for i in 0..total {
            if ctx.should_stop() {
                break;
            }
            let baseline = ctx.baseline().clone();
            let candidate = if i < self.warmup {
                sample_around(&baseline, ctx.rng())
            } else {
                let best = ctx.best_parameters().clone();
                self.exploit(&baseline, &best, ctx.rng())
            };
            ctx.score(&candidate);
            ctx.finish_iteration(total);
        }
        Ok(())
    }

    fn method(&self) -> OptimizationMethod {
        OptimizationMethod::Bayesian
    }
}

// ---- Gradient search ----

/// Numerical gradient ascent with symmetric finite differences.
#[derive(Debug, Clone, Default)]
pub struct GradientSearch;

impl GradientSearch {
    fn step(ctx: &mut SearchContext<'_>, current: &Parameters) -> Parameters {
        let learning_rate = ctx.config().learning_rate;
        let (lower, upper) = GRADIENT_BOUNDS;
        let mut next = current.clone();

        for (name, value) in current {
            let Some(v) = value.as_f64() else {
                continue;
            };
            let mut epsilon = 0.01 * v.abs() + 1e-6;
            if matches!(value, ParamValue::Int(_)) {
                epsilon = epsilon.max(1.0);
            }

            let mut plus = current.clone();
            plus.insert(name.clone(), value.with_numeric(v + epsilon));
            let mut minus = current.clone();
            minus.insert(name.clone(), value.with_numeric(v - epsilon));

            let gradient = (ctx.score(&plus) - ctx.score(&minus)) / (2.0 * epsilon);
            let updated = (v + learning_rate * gradient).clamp(lower, upper);
            next.insert(name.clone(), value.with_numeric(updated));
        }
        next
    }
}

impl SearchStrategy for GradientSearch {
    fn run(&mut self, ctx: &mut SearchContext<'_>) -> PfResult<()> {
        let total = ctx.config().max_iterations;
        let mut current = ctx.baseline().clone();
        for _ in 0..total {
            if ctx.should_stop() {
                break;
            }
            current = Self::step(ctx, &current);
            ctx.score(&current);
            ctx.finish_iteration(total);
        }
        Ok(())
    }

    fn method(&self) -> OptimizationMethod {
        OptimizationMethod::Gradient
    }
}

// ---- Genetic search ----

#[derive(Debug, Clone)]
struct Individual {
    parameters: Parameters,
    fitness: Option<f64>,
}

/// Generational genetic algorithm with elitism and tournament selection.
#[derive(Debug, Clone, Default)]
pub struct GeneticSearch;

impl GeneticSearch {
    const TOURNAMENT_SIZE: usize = 3;
    const ELITE_FRACTION: f64 = 0.1;
    const MUTATION_SIGMA: f64 = 0.1;
    const MIN_GENE: f64 = 0.01;

    fn seed_population(ctx: &mut SearchContext<'_>) -> Vec<Individual> {
        let size = ctx.config().population_size;
        let baseline = ctx.baseline().clone();
        let mut population = vec![Individual {
            parameters: baseline.clone(),
            fitness: Some(ctx.baseline_score()),
        }];
        while population.len() < size {
            population.push(Individual {
                parameters: sample_around(&baseline, ctx.rng()),
                fitness: None,
            });
        }
        population
    }

    fn score_unscored(ctx: &mut SearchContext<'_>, population: &mut [Individual]) {
        let pending: Vec<usize> = population
            .iter()
            .enumerate()
            .filter(|(_, ind)| ind.fitness.is_none())
            .map(|(i, _)| i)
            .collect();

        let shared: &SearchContext<'_> = ctx;
        let view: &[Individual] = population;
        let scored: Vec<(usize, f64, PerformanceMetrics)> = pending
            .par_iter()
            .map(|&i| {
                let (score, metrics) = shared.evaluate(&view[i].parameters);
                (i, score, metrics)
            })
            .collect();

        for (i, score, metrics) in scored {
            ctx.record(&population[i].parameters, score, metrics);
            population[i].fitness = Some(score);
        }
    }

    fn tournament<'p, R: Rng>(population: &'p [Individual], rng: &mut R) -> &'p Individual {
        let mut winner = &population[rng.gen_range(0..population.len())];
        for _ in 1..Self::TOURNAMENT_SIZE {
            let challenger = &population[rng.gen_range(0..population.len())];
            if fitness(challenger) > fitness(winner) {
                winner = challenger;
            }
        }
        winner
    }

    fn crossover<R: Rng>(a: &Parameters, b: &Parameters, rng: &mut R) -> Parameters {
        a.iter()
            .map(|(name, value)| {
                let gene = if rng.gen_bool(0.5) {
                    b.get(name).copied().unwrap_or(*value)
                } else {
                    *value
                };
                (name.clone(), gene)
            })
            .collect()
    }

    fn mutate<R: Rng>(parameters: &mut Parameters, rate: f64, rng: &mut R) {
        for value in parameters.values_mut() {
            if !rng.gen_bool(rate) {
                continue;
            }
            *value = match *value {
                ParamValue::Bool(b) => ParamValue::Bool(!b),
                numeric => {
                    let v = numeric.as_f64().unwrap_or(0.0);
                    let mutated = v + gaussian(rng, Self::MUTATION_SIGMA * v.abs());
                    numeric.with_numeric(mutated.max(Self::MIN_GENE))
                }
            };
        }
    }

    fn breed(ctx: &mut SearchContext<'_>, population: &[Individual]) -> Vec<Individual> {
        let size = ctx.config().population_size;
        let crossover_rate = ctx.config().crossover_rate;
        let mutation_rate = ctx.config().mutation_rate;
        let elites = ((size as f64 * Self::ELITE_FRACTION) as usize).max(1);

        let mut next: Vec<Individual> = population.iter().take(elites).cloned().collect();
        while next.len() < size {
            let rng = ctx.rng();
            let first = Self::tournament(population, rng);
            let second = Self::tournament(population, rng);
            let mut child = if rng.gen_bool(crossover_rate) {
                Self::crossover(&first.parameters, &second.parameters, rng)
            } else {
                first.parameters.clone()
            };
            Self::mutate(&mut child, mutation_rate, rng);
            next.push(Individual {
                parameters: child,
                fitness: None,
            });
        }
        next
    }
}

fn fitness(individual: &Individual) -> f64 {
    individual.fitness.unwrap_or(f64::NEG_INFINITY)
}

impl SearchStrategy for GeneticSearch {
    fn run(&mut self, ctx: &mut SearchContext<'_>) -> PfResult<()> {
        let generations = ctx.config().max_iterations;
        let target = ctx.baseline_score() + ctx.config().min_improvement;
        let mut population = Self::seed_population(ctx);

        for generation in 0..generations {
            if ctx.should_stop() {
                break;
            }

            Self::score_unscored(ctx, &mut population);
            population.sort_by(|a, b| fitness(b).partial_cmp(&fitness(a)).unwrap_or(Ordering::Equal));

            let best = fitness(&population[0]);
            ctx.push_generation_best(best);
            ctx.finish_iteration(generations);

            debug!(generation, best, "generation complete");

            if generation + 1 >= GENETIC_MIN_GENERATIONS && best <= target {
                debug!(generation, best, target, "no progress over baseline, stopping");
                break;
            }
            if generation + 1 < generations {
                population = Self::breed(ctx, &population);
            }
        }
        Ok(())
    }

    fn method(&self) -> OptimizationMethod {
        OptimizationMethod::Genetic
    }
}
