use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use oem_unlocker::code::{CODE_END, CODE_START, UnlockCode, max_iterations};
use oem_unlocker::device::{DeviceCommand, DeviceError, UnlockOracle};
use oem_unlocker::imei::Imei;
use oem_unlocker::progress::{Checkpoint, ProgressStore, StoreError, UnlockRecord};
use oem_unlocker::search::engine::SearchParams;
use oem_unlocker::search::{SearchEngine, SearchEvent, SearchOutcome, SearchState};
use oem_unlocker::Settings;

const FAIL: &str = "FAILED (remote: 'check password failed')";

/// 按脚本应答，脚本用完后一直返回 `fallback`
struct ScriptedOracle<'c> {
    script: RefCell<VecDeque<Result<String, DeviceError>>>,
    fallback: &'static str,
    tried: RefCell<Vec<UnlockCode>>,
    commands: RefCell<Vec<DeviceCommand>>,
    /// 第 n 次尝试时置位中断标志
    cancel_on: Option<(usize, &'c AtomicBool)>,
}

impl<'c> ScriptedOracle<'c> {
    fn new(fallback: &'static str) -> Self {
        Self {
            script: RefCell::new(VecDeque::new()),
            fallback,
            tried: RefCell::new(Vec::new()),
            commands: RefCell::new(Vec::new()),
            cancel_on: None,
        }
    }

    fn then(self, reply: &str) -> Self {
        self.script.borrow_mut().push_back(Ok(reply.to_string()));
        self
    }

    fn then_err(self, err: DeviceError) -> Self {
        self.script.borrow_mut().push_back(Err(err));
        self
    }

    fn tried(&self) -> Vec<u64> {
        self.tried.borrow().iter().map(|c| c.value()).collect()
    }

    fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.borrow().clone()
    }
}

impl UnlockOracle for ScriptedOracle<'_> {
    fn attempt_unlock(&self, code: UnlockCode) -> Result<String, DeviceError> {
        self.tried.borrow_mut().push(code);
        if let Some((n, flag)) = self.cancel_on
            && self.tried.borrow().len() == n
        {
            flag.store(true, Ordering::Relaxed);
        }
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.to_string()))
    }

    fn run(&self, command: DeviceCommand) -> Result<(), DeviceError> {
        self.commands.borrow_mut().push(command);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingStore {
    checkpoints: Vec<Checkpoint>,
    results: Vec<UnlockRecord>,
}

impl ProgressStore for RecordingStore {
    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.last().cloned())
    }

    fn save_result(&mut self, record: &UnlockRecord) -> Result<(), StoreError> {
        self.results.push(record.clone());
        Ok(())
    }

    fn checkpoint_location(&self) -> String {
        "memory://checkpoint".into()
    }

    fn result_location(&self) -> String {
        "memory://result".into()
    }
}

fn imei() -> Imei {
    "490154203237518".parse().unwrap()
}

fn settings() -> Settings {
    Settings::default().without_pauses()
}

/// 运行到结束，返回结果与引擎的最终计数
fn run(
    settings: &Settings,
    oracle: &ScriptedOracle,
    store: &mut RecordingStore,
    events: &mut Vec<SearchEvent>,
    cancel: &AtomicBool,
    increment: u64,
) -> (SearchOutcome, u64) {
    let imei = imei();
    let mut engine = SearchEngine::new(SearchParams {
        imei: &imei,
        settings,
        oracle,
        store,
        observer: events,
        cancel,
    })
    .unwrap()
    .with_increment(increment)
    .unwrap();
    let outcome = engine.run();
    assert_eq!(engine.state(), outcome.state());
    (outcome, engine.attempts())
}

const BIG_STEP: u64 = 1_000_000_000_000_000;

#[test]
fn always_failing_oracle_exhausts_without_result() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL);
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert!(store.results.is_empty());
    assert_eq!(attempts, 9);
    assert_eq!(attempts, max_iterations(BIG_STEP));

    let tried = oracle.tried();
    assert_eq!(tried.first(), Some(&CODE_START));
    assert!(tried.windows(2).all(|w| w[1] - w[0] == BIG_STEP));
    assert!(tried.iter().all(|c| *c < CODE_END));

    // 耗尽后重启设备
    assert_eq!(oracle.commands(), vec![DeviceCommand::Reboot]);
}

#[test]
fn iterations_bounded_by_ceiling() {
    let settings = settings();
    for step in [4 * BIG_STEP, 3 * BIG_STEP, 7 * BIG_STEP / 2, 10_000_000_000_000] {
        let oracle = ScriptedOracle::new(FAIL);
        let mut store = RecordingStore::default();
        let mut events = Vec::new();
        let cancel = AtomicBool::new(false);

        let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, step);
        assert_eq!(outcome, SearchOutcome::Exhausted);
        assert!(attempts <= max_iterations(step), "step {step}");
        assert_eq!(oracle.tried().len() as u64, attempts);
    }
}

#[test]
fn checkpoint_every_save_interval() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL);
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);
    let step = 10_000_000_000_000;

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, step);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert_eq!(attempts, 900);
    let saved: Vec<u64> = store.checkpoints.iter().map(|c| c.attempts).collect();
    assert_eq!(saved, vec![200, 400, 600, 800]);

    let tried = oracle.tried();
    for checkpoint in &store.checkpoints {
        // 检查点记录的是第 attempts 个测试过的候选码
        let expected = UnlockCode::new(tried[checkpoint.attempts as usize - 1]);
        assert_eq!(checkpoint.last_code, expected.to_string());
        assert_eq!(checkpoint.increment, step);
    }

    let saved_events = events
        .iter()
        .filter(|e| matches!(e, SearchEvent::CheckpointSaved { .. }))
        .count();
    assert_eq!(saved_events, 4);
}

#[test]
fn success_writes_single_padded_result() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL)
        .then(FAIL)
        .then(FAIL)
        .then("OKAY [  0.012s]\nSuccess");
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    let winner = UnlockCode::new(CODE_START + 2 * BIG_STEP);
    match outcome {
        SearchOutcome::Unlocked { code, record } => {
            assert_eq!(code, winner);
            assert_eq!(record.unlock_code, "3000000000000000");
            assert_eq!(record.attempts, 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(attempts, 3);
    assert_eq!(store.results.len(), 1);
    assert_eq!(store.results[0].unlock_code, winner.to_string());
    assert_eq!(store.results[0].imei.as_str(), "490154203237518");
    // 成功后引擎本身不发命令
    assert!(oracle.commands().is_empty());
}

#[test]
fn success_checked_before_reboot() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL).then("reboot ... success");
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, _) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome.state(), SearchState::Success);
    assert!(oracle.commands().is_empty());
    assert!(!events
        .iter()
        .any(|e| matches!(e, SearchEvent::ProtectionDetected { .. })));
}

#[test]
fn protection_retries_same_candidate_and_enables_reboots() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL).then("FAILED (remote: 'please reboot, protection')");
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert_eq!(attempts, 9);

    let tried = oracle.tried();
    assert_eq!(tried.len(), 10);
    assert_eq!(tried[0], CODE_START);
    assert_eq!(tried[1], CODE_START);

    use DeviceCommand::*;
    assert_eq!(
        oracle.commands(),
        vec![
            WaitForDevice,
            RebootToBootloader,
            // 预防性重启: 第 4、8 次尝试后
            RebootBootloader,
            RebootBootloader,
            Reboot,
        ]
    );
}

#[test]
fn protection_single_step_does_not_advance() {
    let settings = settings();
    let imei = imei();
    let oracle = ScriptedOracle::new(FAIL).then("reboot protection");
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);
    let mut engine = SearchEngine::new(SearchParams {
        imei: &imei,
        settings: &settings,
        oracle: &oracle,
        store: &mut store,
        observer: &mut events,
        cancel: &cancel,
    })
    .unwrap();

    assert!(engine.step().is_none());
    assert!(engine.protection_active());
    assert_eq!(engine.candidate().value(), CODE_START);
    assert_eq!(engine.attempts(), 0);
    assert_eq!(
        oracle.commands(),
        vec![DeviceCommand::WaitForDevice, DeviceCommand::RebootToBootloader]
    );

    assert!(engine.step().is_none());
    assert_eq!(engine.attempts(), 1);
    assert_eq!(engine.candidate().value(), CODE_START + imei.increment());
    assert!(engine.protection_active());
}

#[test]
fn unknown_output_aborts_by_default() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL).then(FAIL).then("FAILED (remote: 'Command not allowed')");
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(
        outcome,
        SearchOutcome::UnknownOutput {
            candidate: UnlockCode::new(CODE_START + BIG_STEP),
            output: "FAILED (remote: 'Command not allowed')".into(),
        }
    );
    assert_eq!(outcome.state(), SearchState::AbortedUnknownOutput);
    assert_eq!(attempts, 1);
    assert!(store.results.is_empty());
}

#[test]
fn unknown_output_tolerated_when_enabled() {
    let settings = Settings {
        tolerate_unknown_output: true,
        ..settings()
    };
    let oracle = ScriptedOracle::new("???");
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert_eq!(attempts, 9);
    let tolerated = events
        .iter()
        .filter(|e| matches!(e, SearchEvent::UnknownTolerated { .. }))
        .count();
    assert_eq!(tolerated, 9);
}

#[test]
fn timeout_without_protection_advances() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL).then_err(DeviceError::Timeout(Duration::from_secs(30)));
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert_eq!(attempts, 9);
    assert_eq!(oracle.tried()[1], CODE_START + BIG_STEP);
    assert_eq!(oracle.commands(), vec![DeviceCommand::Reboot]);
}

#[test]
fn timeout_with_protection_recovers_and_retries() {
    let settings = Settings {
        auto_reboot: true,
        reboot_every: 100,
        ..settings()
    };
    let oracle = ScriptedOracle::new(FAIL).then_err(DeviceError::Timeout(Duration::from_secs(30)));
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert_eq!(attempts, 9);
    let tried = oracle.tried();
    assert_eq!(&tried[..2], &[CODE_START, CODE_START]);
    assert_eq!(
        oracle.commands(),
        vec![DeviceCommand::RebootBootloader, DeviceCommand::Reboot]
    );
}

#[test]
fn launch_errors_count_as_failures() {
    let settings = settings();
    let launch = DeviceError::Launch {
        program: "fastboot".into(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
    };
    let oracle = ScriptedOracle::new(FAIL).then_err(launch);
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Exhausted);
    assert_eq!(attempts, 9);
    assert!(events
        .iter()
        .any(|e| matches!(e, SearchEvent::AttemptFailed { .. })));
}

#[test]
fn interrupt_before_start() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL);
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(true);

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Interrupted);
    assert_eq!(attempts, 0);
    assert!(oracle.tried().is_empty());
    assert!(store.checkpoints.is_empty());
}

#[test]
fn interrupt_mid_run_keeps_last_checkpoint() {
    let settings = Settings {
        save_every: 2,
        ..settings()
    };
    let cancel = AtomicBool::new(false);
    let oracle = ScriptedOracle {
        cancel_on: Some((5, &cancel)),
        ..ScriptedOracle::new(FAIL)
    };
    let mut store = RecordingStore::default();
    let mut events = Vec::new();

    let (outcome, attempts) = run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    assert_eq!(outcome, SearchOutcome::Interrupted);
    // 第 5 次尝试的输出被丢弃
    assert_eq!(attempts, 4);
    let saved: Vec<u64> = store.checkpoints.iter().map(|c| c.attempts).collect();
    assert_eq!(saved, vec![2, 4]);
    assert_eq!(
        store.checkpoints.last().map(|c| c.last_code.clone()),
        Some(UnlockCode::new(CODE_START + 3 * BIG_STEP).to_string())
    );
    assert!(oracle.commands().is_empty());
}

#[test]
fn progress_events_are_observational() {
    let settings = settings();
    let oracle = ScriptedOracle::new(FAIL);
    let mut store = RecordingStore::default();
    let mut events = Vec::new();
    let cancel = AtomicBool::new(false);

    run(&settings, &oracle, &mut store, &mut events, &cancel, BIG_STEP);

    let attempts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SearchEvent::Attempt(status) => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(attempts.len(), 9);
    assert_eq!(attempts[0].percent, 0.0);
    for (i, status) in attempts.iter().enumerate() {
        assert_eq!(status.attempts, i as u64);
        assert_eq!(status.candidate.value(), CODE_START + i as u64 * BIG_STEP);
    }
    assert!((attempts[8].percent - 800.0 / 9.0).abs() < 1e-9);
}
