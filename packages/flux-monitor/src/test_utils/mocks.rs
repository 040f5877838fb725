use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use alloy_primitives::{Address, I256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use flux_types::{PipelineRun, PipelineSpec, PipelineVars, RoundData, RoundId, RoundState};

use crate::apis::{
    ContractError, FlagsContract, FluxAggregator, KeyStore, KeyStoreError, PipelineError,
    PipelineRunner, TransactionQueue, TxQueueError,
};

/// Aggregator that answers every round state query from one configurable state.
/// A non-zero requested round overrides the returned round id.
pub struct MockFluxAggregator {
    address: Address,
    round_state: Mutex<RoundState>,
    latest_round_data: Mutex<RoundData>,
    oracles: Mutex<Vec<Address>>,
    min_submission: I256,
    max_submission: I256,
    failing_round_state: AtomicBool,
    failing_get_oracles: AtomicBool,
    round_state_calls: Mutex<Vec<(Address, RoundId)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockFluxAggregator {
    pub fn new(address: Address, min_submission: i64, max_submission: i64) -> Self {
        Self {
            address,
            round_state: Mutex::new(RoundState::default()),
            latest_round_data: Mutex::new(RoundData::default()),
            oracles: Mutex::new(Vec::new()),
            min_submission: I256::try_from(min_submission).unwrap(),
            max_submission: I256::try_from(max_submission).unwrap(),
            failing_round_state: AtomicBool::new(false),
            failing_get_oracles: AtomicBool::new(false),
            round_state_calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn set_round_state(&self, round_state: RoundState) {
        *self.round_state.lock().unwrap() = round_state;
    }

    pub fn set_latest_round_data(&self, data: RoundData) {
        *self.latest_round_data.lock().unwrap() = data;
    }

    pub fn set_oracles(&self, oracles: Vec<Address>) {
        *self.oracles.lock().unwrap() = oracles;
    }

    pub fn set_failing_round_state(&self, failing: bool) {
        self.failing_round_state.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_get_oracles(&self, failing: bool) {
        self.failing_get_oracles.store(failing, Ordering::SeqCst);
    }

    /// Every call sleeps this long first
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn round_state_calls(&self) -> Vec<(Address, RoundId)> {
        self.round_state_calls.lock().unwrap().clone()
    }

    async fn maybe_delay(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl FluxAggregator for MockFluxAggregator {
    fn address(&self) -> Address {
        self.address
    }

    async fn oracle_round_state(
        &self,
        oracle: Address,
        round_id: RoundId,
    ) -> Result<RoundState, ContractError> {
        self.maybe_delay().await;
        self.round_state_calls
            .lock()
            .unwrap()
            .push((oracle, round_id));

        if self.failing_round_state.load(Ordering::SeqCst) {
            return Err(ContractError::Call(anyhow::anyhow!("mock round state failure")));
        }

        let mut round_state = self.round_state.lock().unwrap().clone();
        if round_id != 0 {
            round_state.round_id = round_id;
        }
        Ok(round_state)
    }

    async fn latest_round_data(&self) -> Result<RoundData, ContractError> {
        self.maybe_delay().await;
        Ok(self.latest_round_data.lock().unwrap().clone())
    }

    async fn get_oracles(&self) -> Result<Vec<Address>, ContractError> {
        if self.failing_get_oracles.load(Ordering::SeqCst) {
            return Err(ContractError::Call(anyhow::anyhow!("mock get oracles failure")));
        }
        Ok(self.oracles.lock().unwrap().clone())
    }

    async fn min_submission_value(&self) -> Result<I256, ContractError> {
        Ok(self.min_submission)
    }

    async fn max_submission_value(&self) -> Result<I256, ContractError> {
        Ok(self.max_submission)
    }
}

pub struct MockFlags {
    address: Address,
    lowered: AtomicBool,
    checks: AtomicUsize,
}

impl MockFlags {
    pub fn new(address: Address, lowered: bool) -> Self {
        Self {
            address,
            lowered: AtomicBool::new(lowered),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_lowered(&self, lowered: bool) {
        self.lowered.store(lowered, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagsContract for MockFlags {
    fn address(&self) -> Address {
        self.address
    }

    async fn is_lowered(&self, _subject: Address) -> Result<bool, ContractError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.lowered.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct MockKeyStore {
    keys: Vec<Address>,
}

impl MockKeyStore {
    pub fn new(keys: Vec<Address>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeyStore for MockKeyStore {
    async fn sending_keys(&self) -> Result<Vec<Address>, KeyStoreError> {
        Ok(self.keys.clone())
    }
}

/// Runner that returns a configurable answer, or an errored run
pub struct MockPipelineRunner {
    answer: Mutex<Result<BigDecimal, String>>,
    runs: Mutex<Vec<PipelineVars>>,
}

impl MockPipelineRunner {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: Mutex::new(Ok(answer.parse().unwrap())),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn set_answer(&self, answer: &str) {
        *self.answer.lock().unwrap() = Ok(answer.parse().unwrap());
    }

    pub fn set_error(&self, error: &str) {
        *self.answer.lock().unwrap() = Err(error.to_string());
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn last_vars(&self) -> Option<PipelineVars> {
        self.runs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PipelineRunner for MockPipelineRunner {
    async fn execute_run(
        &self,
        spec: &PipelineSpec,
        vars: &PipelineVars,
    ) -> Result<PipelineRun, PipelineError> {
        self.runs.lock().unwrap().push(vars.clone());

        let answer = self.answer.lock().unwrap().clone();
        Ok(match answer {
            Ok(value) => PipelineRun::completed(spec.job_id, value),
            Err(err) => PipelineRun::errored(spec.job_id, err),
        })
    }
}

#[derive(Default)]
pub struct MockTransactionQueue {
    submissions: Mutex<Vec<(Address, RoundId, I256)>>,
    failing: AtomicBool,
}

impl MockTransactionQueue {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<(Address, RoundId, I256)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl TransactionQueue for MockTransactionQueue {
    async fn submit(
        &self,
        aggregator: Address,
        round_id: RoundId,
        answer: I256,
    ) -> Result<(), TxQueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TxQueueError::Rejected("mock failure".to_string()));
        }

        self.submissions
            .lock()
            .unwrap()
            .push((aggregator, round_id, answer));
        Ok(())
    }
}
