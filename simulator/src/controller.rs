//! Simulation controller.

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{info, warn};

use fxbroker_common::{ExchangeError, SettlementRecordId};

use crate::cluster::SimulatedCluster;
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep, Topology};

/// Outcome of one exchange step.
pub type ExchangeOutcome = Result<SettlementRecordId, ExchangeError>;

/// Controls the simulation.
pub struct SimulationController {
    /// Random number generator.
    rng: StdRng,
    /// Simulation metrics.
    metrics: SimulationMetrics,
    /// Results of the exchange steps run so far, in order.
    outcomes: Vec<ExchangeOutcome>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            rng,
            metrics: SimulationMetrics::new(),
            outcomes: Vec::new(),
        }
    }

    /// Run a scenario on a fresh cluster.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        self.outcomes.clear();
        let cluster = SimulatedCluster::start(&scenario.topology).await?;

        let mut result = Ok(());
        for (index, step) in scenario.steps.iter().enumerate() {
            if let Err(e) = self.execute_step(&cluster, step).await {
                result = Err(e.context(format!("step {} of {}", index, scenario.name)));
                break;
            }
        }

        cluster.shutdown().await;
        result
    }

    /// Run `count` random exchanges between the default participants, in
    /// batches of `concurrency`.
    pub async fn run_random(&mut self, count: usize, concurrency: usize) -> anyhow::Result<()> {
        let topology = Topology::default();
        let cluster = SimulatedCluster::start(&topology).await?;
        let broker = topology.broker.name.as_str();

        let names = cluster.participant_names();
        if names.len() < 2 {
            bail!("random mode needs at least two participants");
        }

        for name in &names {
            cluster.issue(broker, name, 1_000_000, "USD").await?;
        }
        for currency in ["GBP", "JPY", "EUR"] {
            cluster.issue(broker, broker, 1_000_000, currency).await?;
        }
        cluster.set_rate("USD", "GBP", Decimal::new(21, 2))?;
        cluster.set_rate("USD", "JPY", Decimal::new(5, 1))?;

        let mut remaining = count;
        while remaining > 0 {
            let batch = remaining.min(concurrency.max(1));
            remaining -= batch;

            let plans: Vec<(String, String, u64)> = (0..batch)
                .map(|_| {
                    let from = self.rng.gen_range(0..names.len());
                    let mut to = self.rng.gen_range(0..names.len());
                    while to == from {
                        to = self.rng.gen_range(0..names.len());
                    }
                    let quantity = self.rng.gen_range(1..=1_000);
                    (names[from].clone(), names[to].clone(), quantity)
                })
                .collect();

            let runs = plans.iter().map(|(from, to, quantity)| {
                let cluster = &cluster;
                async move {
                    info!("Generating exchange: {} -> {} for {} USD", from, to, quantity);
                    let started = Instant::now();
                    let outcome = cluster.exchange(from, to, *quantity, "USD", broker).await;
                    (outcome, started.elapsed())
                }
            });

            for (outcome, elapsed) in join_all(runs).await {
                self.record(outcome?, elapsed);
            }
        }

        cluster.shutdown().await;
        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(
        &mut self,
        cluster: &SimulatedCluster,
        step: &ScenarioStep,
    ) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Issue {
                issuer,
                to,
                quantity,
                currency,
            } => {
                let record_id = cluster.issue(issuer, to, *quantity, currency).await?;
                info!("Issued {} {} from {} to {} ({})", quantity, currency, issuer, to, record_id);
            }
            ScenarioStep::Exit {
                owner,
                quantity,
                currency,
                issuer,
            } => {
                let record_id = cluster.exit(owner, *quantity, currency, issuer).await?;
                info!("{} redeemed {} {} to {} ({})", owner, quantity, currency, issuer, record_id);
            }
            ScenarioStep::SetRate { from, to, rate } => {
                cluster.set_rate(from, to, *rate)?;
                info!("Rate {}/{} set to {}", from, to, rate);
            }
            ScenarioStep::Exchange {
                initiator,
                receiver,
                quantity,
                currency,
                issuer,
            } => {
                info!(
                    "Exchange: {} pays {} {} for {}",
                    initiator, quantity, currency, receiver
                );
                let started = Instant::now();
                let outcome = cluster
                    .exchange(initiator, receiver, *quantity, currency, issuer)
                    .await?;
                self.record(outcome, started.elapsed());
            }
            ScenarioStep::InjectFault { fault_type, target } => {
                info!("Injecting fault {:?} on {}", fault_type, target);
                set_fault(cluster, *fault_type, target, true)?;
            }
            ScenarioStep::ClearFault { fault_type, target } => {
                info!("Clearing fault {:?} on {}", fault_type, target);
                set_fault(cluster, *fault_type, target, false)?;
            }
            ScenarioStep::Assert { condition } => {
                self.check(cluster, condition).await?;
                info!("Assertion held: {:?}", condition);
            }
        }

        Ok(())
    }

    fn record(&mut self, outcome: ExchangeOutcome, elapsed: Duration) {
        match &outcome {
            Ok(record_id) => {
                info!("Exchange settled with payout {}", record_id);
                self.metrics.record_success(elapsed.as_millis() as u64);
            }
            Err(e) => {
                warn!("Exchange failed: {} ({})", e, e.error_code());
                self.metrics
                    .record_failure(e.error_code(), elapsed.as_millis() as u64);
            }
        }
        self.outcomes.push(outcome);
    }

    fn outcome(&self, exchange: usize) -> anyhow::Result<&ExchangeOutcome> {
        self.outcomes
            .get(exchange)
            .with_context(|| format!("exchange {} has not run", exchange))
    }

    async fn check(
        &self,
        cluster: &SimulatedCluster,
        condition: &AssertCondition,
    ) -> anyhow::Result<()> {
        match condition {
            AssertCondition::ExchangeSucceeded { exchange } => {
                if let Err(e) = self.outcome(*exchange)? {
                    bail!("exchange {} failed: {}", exchange, e);
                }
            }
            AssertCondition::ExchangeFailed {
                exchange,
                error_code,
            } => match self.outcome(*exchange)? {
                Ok(record_id) => bail!("exchange {} succeeded with {}", exchange, record_id),
                Err(e) if e.error_code() != error_code.as_str() => {
                    bail!("exchange {} failed with {}, not {}", exchange, e.error_code(), error_code)
                }
                Err(_) => {}
            },
            AssertCondition::PayoutEquals {
                exchange,
                receiver,
                quantity,
                currency,
            } => {
                let record_id = match self.outcome(*exchange)? {
                    Ok(record_id) => *record_id,
                    Err(e) => bail!("exchange {} failed: {}", exchange, e),
                };
                let record = cluster
                    .record(&record_id)
                    .with_context(|| format!("payout record {} not found", record_id))?;

                if &record.from != cluster.broker().party() {
                    bail!("payout {} was not made by the broker", record_id);
                }
                if record.to != cluster.party(receiver)?
                    || record.amount.quantity() != *quantity
                    || record.amount.currency().code() != currency.to_ascii_uppercase()
                {
                    bail!(
                        "payout {} is {} to {}, expected {} {} to {}",
                        record_id,
                        record.amount,
                        record.to,
                        quantity,
                        currency,
                        receiver
                    );
                }
            }
            AssertCondition::BalanceEquals {
                party,
                currency,
                quantity,
            } => {
                let actual = cluster.balance(party, currency).await?;
                if actual != *quantity {
                    bail!("{} holds {} {}, expected {}", party, actual, currency, quantity);
                }
            }
        }
        Ok(())
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Results of the exchange steps of the last scenario.
    pub fn outcomes(&self) -> &[ExchangeOutcome] {
        &self.outcomes
    }
}

fn set_fault(
    cluster: &SimulatedCluster,
    fault_type: FaultType,
    target: &str,
    active: bool,
) -> anyhow::Result<()> {
    match fault_type {
        FaultType::NodeOffline => cluster.set_node_offline(target, active),
        FaultType::LedgerOffline => {
            cluster.set_ledger_offline(active);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxbroker_common::Party;

    async fn run(name: &str) -> SimulationController {
        let mut controller = SimulationController::new(Some(7));
        controller
            .run_scenario(&Scenario::load(name).unwrap())
            .await
            .unwrap();
        controller
    }

    #[tokio::test]
    async fn test_discounted_payout_scenario() {
        let controller = run("discounted-payout").await;

        assert_eq!(controller.outcomes().len(), 1);
        assert!(controller.outcomes()[0].is_ok());
        assert_eq!(controller.metrics().successful_exchanges, 1);
    }

    #[tokio::test]
    async fn test_no_currency_scenario() {
        let controller = run("no-currency").await;

        assert_eq!(
            controller.outcomes()[0],
            Err(ExchangeError::NoCurrencySelected(Party::named("NodeE")))
        );
        assert_eq!(controller.metrics().count("NO_CURRENCY_SELECTED"), 1);
    }

    #[tokio::test]
    async fn test_missing_rate_scenario() {
        let controller = run("missing-rate").await;
        assert!(controller.outcomes()[0].is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_unresponsive_scenario() {
        let controller = run("broker-unresponsive").await;

        let err = controller.outcomes()[0].clone().unwrap_err();
        assert_eq!(err.error_code(), "TIMEOUT");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_failed_assertion_is_reported() {
        let mut scenario = Scenario::load("discounted-payout").unwrap();
        scenario.steps.push(ScenarioStep::Assert {
            condition: AssertCondition::BalanceEquals {
                party: "NodeB".to_string(),
                currency: "GBP".to_string(),
                quantity: 100,
            },
        });

        let mut controller = SimulationController::new(Some(7));
        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(format!("{:#}", err).contains("NodeB holds 80 GBP"));
    }

    #[tokio::test]
    async fn test_ledger_outage_fails_fee_payment() {
        let mut scenario = Scenario::load("discounted-payout").unwrap();
        let exchange = scenario
            .steps
            .iter()
            .position(|s| matches!(s, ScenarioStep::Exchange { .. }))
            .unwrap();
        scenario.steps.truncate(exchange + 1);
        scenario.steps.insert(
            exchange,
            ScenarioStep::InjectFault {
                fault_type: FaultType::LedgerOffline,
                target: "ledger".to_string(),
            },
        );

        let mut controller = SimulationController::new(Some(7));
        controller.run_scenario(&scenario).await.unwrap();
        assert_eq!(controller.outcomes()[0].clone().unwrap_err().error_code(), "SETTLEMENT_FAILURE");
    }

    #[tokio::test]
    async fn test_receiver_redeems_payout() {
        let mut scenario = Scenario::load("discounted-payout").unwrap();
        scenario.steps.extend([
            ScenarioStep::Exit {
                owner: "NodeB".to_string(),
                quantity: 80,
                currency: "GBP".to_string(),
                issuer: "NodeC".to_string(),
            },
            ScenarioStep::Assert {
                condition: AssertCondition::BalanceEquals {
                    party: "NodeB".to_string(),
                    currency: "GBP".to_string(),
                    quantity: 0,
                },
            },
        ]);

        let mut controller = SimulationController::new(Some(7));
        controller.run_scenario(&scenario).await.unwrap();
    }

    #[tokio::test]
    async fn test_random_exchanges() {
        let mut controller = SimulationController::new(Some(42));
        controller.run_random(8, 4).await.unwrap();

        let metrics = controller.metrics();
        assert_eq!(metrics.total_exchanges, 8);
        assert_eq!(
            metrics.successful_exchanges + metrics.failed_exchanges,
            metrics.total_exchanges
        );
    }
}
