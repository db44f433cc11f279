//! Three-tier critique pipeline.
//!
//! A pass walks the tiers strictly in escalating order: refiner (optional),
//! replanner, adversarial verifier. The first tier that produces work ends the
//! pass; a tier only runs when every cheaper tier was silent. Each tier keeps
//! its own round counter, which advances only on calls that actually
//! completed. A failed or timed-out call is inconclusive: it ends the pass
//! without escalating, and after `max_inconclusive_attempts` consecutive
//! inconclusive calls the tier is treated as silent for that pass.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::CritiqueError;
use crate::domain::models::{Config, CritiqueContext, CritiqueReport, CritiqueStage, TaskDraft};
use crate::domain::ports::{ChallengeGenerator, Critic};
use crate::services::output_parser::normalize_challenge;

/// Collaborators behind each tier.
#[derive(Clone)]
pub struct CritiqueBackends {
    pub refiner: Option<Arc<dyn Critic>>,
    pub replanner: Arc<dyn Critic>,
    pub verifier: Option<Arc<dyn ChallengeGenerator>>,
}

/// Round caps and call timeouts for the pipeline.
#[derive(Debug, Clone)]
pub struct CritiqueLimits {
    pub refiner_enabled: bool,
    pub max_refine_rounds: u32,
    pub max_replan_rounds: u32,
    pub max_inconclusive_attempts: u32,
    pub refine_timeout: Duration,
    pub replan_timeout: Duration,
    pub verifier_enabled: bool,
    pub verifier_rounds: u32,
    pub attempts_per_round: u32,
    pub candidates: usize,
    pub sample: usize,
    pub verifier_timeout: Duration,
}

impl CritiqueLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refiner_enabled: config.critique.refiner_enabled,
            max_refine_rounds: config.critique.max_refine_rounds,
            max_replan_rounds: config.critique.max_replan_rounds,
            max_inconclusive_attempts: config.critique.max_inconclusive_attempts.max(1),
            refine_timeout: Duration::from_secs(config.critique.refine_timeout_secs),
            replan_timeout: Duration::from_secs(config.critique.replan_timeout_secs),
            verifier_enabled: config.adversarial.enabled,
            verifier_rounds: config.adversarial.rounds,
            attempts_per_round: config.adversarial.attempts_per_round.max(1),
            candidates: config.adversarial.candidates,
            sample: config.adversarial.sample,
            verifier_timeout: Duration::from_secs(config.adversarial.timeout_secs),
        }
    }
}

impl Default for CritiqueLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of one critique pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// A tier produced work; the run goes back to accumulating
    NewTasks {
        stage: CritiqueStage,
        drafts: Vec<TaskDraft>,
    },
    /// A tier call failed or timed out; try again next cycle
    Inconclusive { stage: CritiqueStage },
    /// Every tier was silent or out of rounds; the run is done
    Exhausted,
}

/// What one tier call amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    Found(usize),
    Silent,
    Inconclusive,
}

/// One entry of the pipeline's call history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCall {
    pub pass: u32,
    pub stage: CritiqueStage,
    pub result: CallResult,
}

/// Whether a tier yielded work, stayed silent, or ended the pass inconclusively.
enum TierStep {
    Produced(PassOutcome),
    Escalate,
}

pub struct CritiquePipeline {
    backends: CritiqueBackends,
    limits: CritiqueLimits,
    refine_rounds: u32,
    replan_rounds: u32,
    verifier_rounds: u32,
    replanner_silent_once: bool,
    inconclusive: HashMap<CritiqueStage, u32>,
    issued: Vec<String>,
    issued_normalized: HashSet<String>,
    passes: u32,
    history: Vec<StageCall>,
    rng: StdRng,
}

impl CritiquePipeline {
    pub fn new(backends: CritiqueBackends, limits: CritiqueLimits) -> Self {
        Self {
            backends,
            limits,
            refine_rounds: 0,
            replan_rounds: 0,
            verifier_rounds: 0,
            replanner_silent_once: false,
            inconclusive: HashMap::new(),
            issued: Vec::new(),
            issued_normalized: HashSet::new(),
            passes: 0,
            history: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for challenge sampling.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn history(&self) -> &[StageCall] {
        &self.history
    }

    /// Challenge text issued so far, in issue order.
    pub fn issued_challenges(&self) -> &[String] {
        &self.issued
    }

    /// Run one escalating pass over the tiers.
    #[instrument(skip_all, fields(pass = self.passes + 1))]
    pub async fn run_pass(&mut self, context: &CritiqueContext) -> PassOutcome {
        self.passes += 1;

        if let TierStep::Produced(outcome) = self.refiner_step(context).await {
            return outcome;
        }
        if let TierStep::Produced(outcome) = self.replanner_step(context).await {
            return outcome;
        }
        if let TierStep::Produced(outcome) = self.verifier_step(context).await {
            return outcome;
        }

        info!(
            refine_rounds = self.refine_rounds,
            replan_rounds = self.replan_rounds,
            verifier_rounds = self.verifier_rounds,
            "critique exhausted, nothing further to add"
        );
        PassOutcome::Exhausted
    }

    async fn refiner_step(&mut self, context: &CritiqueContext) -> TierStep {
        let stage = CritiqueStage::Refiner;
        let Some(refiner) = self.backends.refiner.clone() else {
            return TierStep::Escalate;
        };
        if !self.limits.refiner_enabled || self.refine_rounds >= self.limits.max_refine_rounds {
            return TierStep::Escalate;
        }

        let timeout = self.limits.refine_timeout;
        match with_timeout(timeout, refiner.critique(context)).await {
            Ok(report) => {
                self.refine_rounds += 1;
                self.report_step(stage, report)
            }
            Err(err) => self.inconclusive_step(stage, &err),
        }
    }

    async fn replanner_step(&mut self, context: &CritiqueContext) -> TierStep {
        let stage = CritiqueStage::Replanner;
        if self.replan_rounds >= self.limits.max_replan_rounds {
            return TierStep::Escalate;
        }

        let replanner = Arc::clone(&self.backends.replanner);
        let timeout = self.limits.replan_timeout;
        match with_timeout(timeout, replanner.critique(context)).await {
            Ok(report) => {
                self.replan_rounds += 1;
                if let Some(percent) = report.satisfied_percent {
                    info!(percent, "replanner goal estimate");
                }
                if report.is_silent() {
                    self.replanner_silent_once = true;
                }
                self.report_step(stage, report)
            }
            Err(err) => self.inconclusive_step(stage, &err),
        }
    }

    async fn verifier_step(&mut self, context: &CritiqueContext) -> TierStep {
        let stage = CritiqueStage::Verifier;
        let Some(verifier) = self.backends.verifier.clone() else {
            return TierStep::Escalate;
        };
        if !self.limits.verifier_enabled || self.verifier_rounds >= self.limits.verifier_rounds {
            return TierStep::Escalate;
        }
        if !self.replanner_silent_once {
            debug!("replanner never came back empty, skipping adversarial verifier");
            return TierStep::Escalate;
        }

        let mut challenge_context = context.clone();
        challenge_context.issued_challenges.clone_from(&self.issued);

        while self.verifier_rounds < self.limits.verifier_rounds {
            for attempt in 1..=self.limits.attempts_per_round {
                let generated = with_timeout(
                    self.limits.verifier_timeout,
                    verifier.generate(&challenge_context, self.limits.candidates),
                )
                .await;

                let candidates = match generated {
                    Ok(candidates) => {
                        self.inconclusive.remove(&stage);
                        candidates
                    }
                    Err(err) => return self.inconclusive_step(stage, &err),
                };

                let fresh = self.fresh_challenges(candidates);
                if fresh.is_empty() {
                    debug!(attempt, "verifier proposed nothing new");
                    self.record(stage, CallResult::Silent);
                    continue;
                }

                let chosen: Vec<String> = fresh
                    .choose_multiple(&mut self.rng, self.limits.sample.max(1))
                    .cloned()
                    .collect();
                for challenge in &chosen {
                    self.issued_normalized.insert(normalize_challenge(challenge));
                    self.issued.push(challenge.clone());
                }
                self.verifier_rounds += 1;
                self.record(stage, CallResult::Found(chosen.len()));
                info!(
                    round = self.verifier_rounds,
                    challenges = chosen.len(),
                    "adversarial round issued"
                );

                let drafts = chosen
                    .into_iter()
                    .map(|challenge| TaskDraft::new(challenge_task(&challenge)))
                    .collect();
                return TierStep::Produced(PassOutcome::NewTasks { stage, drafts });
            }

            // every attempt of this round came back empty
            self.verifier_rounds += 1;
            debug!(round = self.verifier_rounds, "adversarial round found nothing");
        }
        TierStep::Escalate
    }

    /// Distinct challenges never issued before, in proposal order.
    fn fresh_challenges(&self, candidates: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .filter(|c| {
                let key = normalize_challenge(c);
                !self.issued_normalized.contains(&key) && seen.insert(key)
            })
            .collect()
    }

    fn report_step(&mut self, stage: CritiqueStage, report: CritiqueReport) -> TierStep {
        self.inconclusive.remove(&stage);
        let drafts: Vec<TaskDraft> = report
            .tasks
            .into_iter()
            .filter(|d| !d.description.trim().is_empty())
            .collect();
        if drafts.is_empty() {
            self.record(stage, CallResult::Silent);
            debug!(stage = %stage, "stage silent, escalating");
            return TierStep::Escalate;
        }
        self.record(stage, CallResult::Found(drafts.len()));
        info!(stage = %stage, tasks = drafts.len(), "critique produced new tasks");
        TierStep::Produced(PassOutcome::NewTasks { stage, drafts })
    }

    fn inconclusive_step(&mut self, stage: CritiqueStage, err: &CritiqueError) -> TierStep {
        self.record(stage, CallResult::Inconclusive);
        let count = self.inconclusive.entry(stage).or_insert(0);
        *count += 1;
        if *count >= self.limits.max_inconclusive_attempts {
            warn!(
                stage = %stage,
                attempts = *count,
                error = %err,
                "stage inconclusive too many times, treating as silent"
            );
            self.inconclusive.remove(&stage);
            return TierStep::Escalate;
        }
        warn!(stage = %stage, attempts = *count, error = %err, "critique call inconclusive");
        TierStep::Produced(PassOutcome::Inconclusive { stage })
    }

    fn record(&mut self, stage: CritiqueStage, result: CallResult) {
        self.history.push(StageCall {
            pass: self.passes,
            stage,
            result,
        });
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, CritiqueError>
where
    F: Future<Output = Result<T, CritiqueError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CritiqueError::Timeout(limit.as_secs())),
    }
}

fn challenge_task(challenge: &str) -> String {
    format!(
        "Adversarial check: {challenge}\n\
         Exercise the existing implementation for this case. If it misbehaves, fix it \
         and add a regression test; if it holds, add a test that proves it."
    )
}
