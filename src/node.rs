//! The wake cycle.
//!
//! The node spends almost all of its time in deep sleep. Each wake is one pass through `Node`:
//! work out where the CCS811 stands, take readings, update the display, save the new state and go
//! back to sleep. Nothing but the retained wake-cycle state and the stored baseline survives from
//! one wake to the next.
//!
//! ```text
//!  retained state      phase                        gas values shown
//!  ──────────────────  ───────────────────────────  ─────────────────────────────────
//!  empty               FirstRun                     none (sensor just started)
//!  runs - 1 > 0        Conditioning                 none (sensor still burning in)
//!  runs - 1 == 0,      ConditionedNoBaseline        none if a stored baseline is loaded
//!    not loaded                                     this cycle, live otherwise
//!  runs 0, loaded      ConditionedBaselineLoaded    live
//! ```
//!
//! The run counter is decremented at the start of every wake after the first, and the phase is
//! decided on the decremented value. The wake that brings it to zero is the first conditioned
//! one, so with the default 20 runs the 21st wake after power-on shows gas values.
//!
//! Retained state is only written once the cycle's work (including the display update) is done.
//! A cycle cut short by an error or a brownout leaves the previous state in place, and the next
//! wake simply repeats the step.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c};

use crate::baseline::{BaselineError, BaselineStore};
use crate::ccs811::{self, Ccs811, GasReading};
use crate::config::NodeConfig;
use crate::ports::{
    BatterySampler, DeepSleep, DisplaySink, EnvironmentSensor, Reading, RetainedMemory,
};
use crate::wake_state::{self, DecodeError, WakeCycleState, ENCODED_LEN};

/// Where the wake cycle stands in the sensor's conditioning and calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum Phase {
    /// True power-on: start the sensor and the conditioning count.
    FirstRun,
    /// Conditioning runs remain. Gas readings are not trusted yet.
    Conditioning,
    /// Conditioned, but no stored baseline has been written to the sensor yet.
    ConditionedNoBaseline,
    /// Conditioned and running on a restored baseline. Every later wake lands here.
    ConditionedBaselineLoaded,
}

impl Phase {
    /// The phase of a cycle whose wake has already been counted in `state`.
    pub fn of(state: WakeCycleState) -> Self {
        match (state.is_conditioned(), state.baseline_loaded) {
            (false, _) => Phase::Conditioning,
            (true, false) => Phase::ConditionedNoBaseline,
            (true, true) => Phase::ConditionedBaselineLoaded,
        }
    }

    pub fn is_conditioned(self) -> bool {
        matches!(
            self,
            Phase::ConditionedNoBaseline | Phase::ConditionedBaselineLoaded
        )
    }
}

/// A collaborator whose own error type is opaque to the wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum Collaborator {
    Environment,
    Display,
}

/// Errors that end a wake cycle early. None of them are retried within the cycle; the next wake
/// is the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum CycleError {
    /// The CCS811 didn't answer on its address.
    DeviceNotFound,
    /// Whatever answered isn't a CCS811. Carries the HW_ID read.
    WrongHardware(u8),
    /// The CCS811 has no valid application firmware.
    ApplicationNotValid,
    /// A register access on the sensor bus failed.
    BusIo(ErrorKind),
    /// A collaborator failed for its own reasons.
    Unexpected(Collaborator),
}

impl<E> From<ccs811::Error<E>> for CycleError
where
    E: i2c::Error,
{
    fn from(error: ccs811::Error<E>) -> Self {
        match error {
            ccs811::Error::I2c(e) => CycleError::BusIo(e.kind()),
            ccs811::Error::DeviceNotFound => CycleError::DeviceNotFound,
            ccs811::Error::WrongHardware(id) => CycleError::WrongHardware(id),
            ccs811::Error::ApplicationNotValid => CycleError::ApplicationNotValid,
        }
    }
}

/// What a completed wake cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub phase: Phase,
    /// The state written to retained memory.
    pub state: WakeCycleState,
    /// What was sent to the display.
    pub reading: Reading,
    /// Stored baseline written into the sensor this cycle.
    pub baseline_loaded: Option<u16>,
    /// Sensor baseline captured into the store this cycle.
    pub baseline_captured: Option<u16>,
}

/// Everything the wake cycle talks to. Built by board support code after every wake.
pub struct Board<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY> {
    /// Bus the CCS811 is on. The cycle's sensor session borrows it exclusively.
    pub i2c: I2C,
    pub environment: ENV,
    pub display: DISP,
    pub battery: BAT,
    pub store: STORE,
    pub retained: MEM,
    /// Manual baseline capture button, active low.
    pub trigger: TRIG,
    /// Status LED, active high.
    pub indicator: LED,
    pub delay: DELAY,
}

/// The air quality node for the duration of one wake.
pub struct Node<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY> {
    config: NodeConfig,
    board: Board<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY>,
}

impl<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY>
    Node<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY>
where
    I2C: I2c,
    ENV: EnvironmentSensor,
    DISP: DisplaySink,
    BAT: BatterySampler,
    STORE: BaselineStore,
    MEM: RetainedMemory,
    TRIG: InputPin,
    LED: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(
        config: NodeConfig,
        board: Board<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY>,
    ) -> Self {
        Node { config, board }
    }

    /// Run one wake cycle, signal the outcome on the status LED and put the display to sleep.
    ///
    /// Errors are reported, never propagated as panics: whatever happens, the caller can go to
    /// deep sleep afterwards.
    pub fn wake(&mut self) -> Result<CycleReport, CycleError> {
        let outcome = self.run_cycle();
        let pulses = match &outcome {
            Ok(report) => {
                info!("wake cycle done: {}", report.phase);
                self.config.indicator.success_pulses
            }
            Err(e) => {
                error!("wake cycle failed: {}", e);
                self.config.indicator.failure_pulses
            }
        };
        self.signal(pulses);

        if self.board.display.sleep().is_err() {
            warn!("display did not enter sleep");
        }
        outcome
    }

    /// Run one wake cycle, then release every collaborator and enter deep sleep.
    pub fn wake_and_sleep<S: DeepSleep>(
        mut self,
        sleeper: &mut S,
    ) -> Result<CycleReport, CycleError> {
        let outcome = self.wake();
        drop(self);
        sleeper.deep_sleep();
        outcome
    }

    /// Forget the stored baseline and the retained state. The next wake is a first run.
    pub fn factory_reset(&mut self) -> Result<(), BaselineError<STORE::Error>> {
        self.board.store.delete()?;
        self.board.retained.write(&[]);
        info!("factory reset: baseline and wake state cleared");
        Ok(())
    }

    /// Hand back the collaborators.
    pub fn release(self) -> Board<I2C, ENV, DISP, BAT, STORE, MEM, TRIG, LED, DELAY> {
        self.board
    }

    /// One pass through the state machine, without the status LED.
    pub fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let previous = self.recall_state();
        let battery_volts = self.sample_battery();
        let capture_requested = self.capture_requested();

        let (phase, mut state) = match previous {
            None => (
                Phase::FirstRun,
                WakeCycleState::fresh(self.config.conditioning_runs),
            ),
            Some(previous) => {
                let state = previous.advance();
                (Phase::of(state), state)
            }
        };
        info!(
            "wake: {}, runs remaining {=u8}, baseline loaded {=bool}",
            phase,
            state.runs_remaining,
            state.baseline_loaded
        );

        let config = self.config;
        let Board {
            i2c,
            environment,
            display,
            store,
            retained,
            ..
        } = &mut self.board;

        // Only a first run starts the sensor. Any later wake must leave it running undisturbed.
        let mode = match phase {
            Phase::FirstRun => Some(config.startup_mode),
            _ => None,
        };
        let mut sensor = Ccs811::new(&mut *i2c, config.sensor_address, mode)?;

        let environment = environment
            .measure()
            .map_err(|_| CycleError::Unexpected(Collaborator::Environment))?;
        debug!(
            "environment: {=f32}C {=f32}%RH",
            environment.temperature,
            environment.humidity
        );
        // Compensation goes in before any gas value or baseline is used.
        sensor.put_environment_data(environment.humidity, environment.temperature)?;

        let mut reading = Reading::new(environment, battery_volts);
        let mut baseline_loaded = None;

        match phase {
            Phase::FirstRun => {}
            Phase::Conditioning => {
                if let Some(gas) = sensor.read_if_ready()? {
                    debug!("conditioning: eCO2 {=u16}ppm, TVOC {=u16}ppb", gas.eco2, gas.tvoc);
                }
            }
            Phase::ConditionedNoBaseline => {
                let gas = sensor.read_if_ready()?;
                match load_stored_baseline(store) {
                    Some(baseline) => {
                        sensor.put_baseline(baseline)?;
                        state = state.with_baseline_loaded();
                        // A freshly restored baseline doesn't apply to the sample already taken.
                        reading.baseline_just_loaded = true;
                        baseline_loaded = Some(baseline);
                        info!("stored baseline {=u16} loaded", baseline);
                    }
                    None => show_gas(&mut reading, gas),
                }
            }
            Phase::ConditionedBaselineLoaded => {
                let gas = sensor.read_if_ready()?;
                show_gas(&mut reading, gas);
            }
        }

        let mut baseline_captured = None;
        if capture_requested {
            if phase.is_conditioned() {
                let baseline = sensor.baseline()?;
                match store.store(baseline) {
                    Ok(()) => {
                        info!("baseline {=u16} captured", baseline);
                        baseline_captured = Some(baseline);
                    }
                    Err(e) => warn!("baseline {=u16} not stored, code {=u8}", baseline, e.code()),
                }
            } else {
                info!("baseline capture ignored until conditioning completes");
            }
        }
        sensor.release();

        let full_redraw = phase == Phase::FirstRun || reading.baseline_just_loaded;
        display
            .update(&reading, full_redraw)
            .map_err(|_| CycleError::Unexpected(Collaborator::Display))?;

        retained.write(&state.encode());

        Ok(CycleReport {
            phase,
            state,
            reading,
            baseline_loaded,
            baseline_captured,
        })
    }

    /// The state left by the previous wake, `None` on true power-on.
    ///
    /// Retained memory that can't be decoded is treated like a power-on: conditioning restarts,
    /// which costs some time but can't leave the sensor miscalibrated.
    fn recall_state(&mut self) -> Option<WakeCycleState> {
        let mut buffer = [0u8; ENCODED_LEN + 1];
        let len = self.board.retained.read(&mut buffer);
        let decoded = match buffer.get(..len) {
            Some(bytes) => wake_state::decode(bytes),
            None => Err(DecodeError::UnsupportedLength(len)),
        };

        match decoded {
            Ok(Some(mut state)) => {
                if state.runs_remaining > self.config.conditioning_runs {
                    warn!("retained run count {=u8} out of range", state.runs_remaining);
                    state.runs_remaining = self.config.conditioning_runs;
                }
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("retained state unreadable ({}), starting over", e);
                None
            }
        }
    }

    fn sample_battery(&mut self) -> Option<f32> {
        match self.board.battery.volts() {
            Ok(volts) => Some(volts),
            Err(_) => {
                warn!("battery voltage unavailable");
                None
            }
        }
    }

    /// Poll the capture button once. It's active low.
    fn capture_requested(&mut self) -> bool {
        match self.board.trigger.is_low() {
            Ok(pressed) => pressed,
            Err(_) => {
                warn!("capture button unreadable");
                false
            }
        }
    }

    /// Blink the status LED. A LED that can't be driven is not worth failing over.
    fn signal(&mut self, pulses: u8) {
        let indicator = self.config.indicator;
        for _ in 0..pulses {
            let _ = self.board.indicator.set_high();
            self.board.delay.delay_ms(indicator.on_ms);
            let _ = self.board.indicator.set_low();
            self.board.delay.delay_ms(indicator.off_ms);
        }
    }
}

fn show_gas(reading: &mut Reading, gas: Option<GasReading>) {
    if let Some(gas) = gas {
        reading.eco2 = Some(gas.eco2);
        reading.tvoc = Some(gas.tvoc);
    }
}

/// Fetch the stored baseline, if there is a usable one. Problems are logged and skipped: a
/// missing record (code 1) is normal, a corrupt one (code 2) is worth looking into.
fn load_stored_baseline<S: BaselineStore>(store: &mut S) -> Option<u16> {
    if !store.exists() {
        debug!("no stored baseline");
        return None;
    }
    match store.retrieve() {
        Ok(baseline) => Some(baseline),
        Err(e) => {
            warn!("stored baseline skipped, code {=u8}", e.code());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Board, Collaborator, CycleError, Node, Phase};
    use crate::baseline::{format_record, parse_record, BaselineError, BaselineStore};
    use crate::ccs811::{encode_environment, Register, SENSOR_ADDRESS};
    use crate::config::NodeConfig;
    use crate::ports::{
        BatterySampler, DeepSleep, DisplaySink, Environment, EnvironmentSensor, Reading,
        RetainedMemory,
    };
    use crate::wake_state::WakeCycleState;
    use embedded_hal::digital::InputPin;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
    use embedded_hal_mock::eh1::delay::NoopDelay as MockDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::i2c::Mock as I2cMock;
    use embedded_hal_mock::eh1::i2c::Transaction;

    const HUMIDITY: f32 = 45.0;
    const TEMPERATURE: f32 = 23.5;

    struct FakeEnvironment {
        fail: bool,
    }

    impl EnvironmentSensor for FakeEnvironment {
        type Error = ();

        fn measure(&mut self) -> Result<Environment, ()> {
            if self.fail {
                return Err(());
            }
            Ok(Environment {
                temperature: TEMPERATURE,
                humidity: HUMIDITY,
            })
        }
    }

    #[derive(Default)]
    struct FakeDisplay {
        updates: Vec<(Reading, bool)>,
        fail: bool,
        asleep: bool,
    }

    impl DisplaySink for FakeDisplay {
        type Error = ();

        fn update(&mut self, reading: &Reading, full_redraw: bool) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            self.updates.push((*reading, full_redraw));
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), ()> {
            self.asleep = true;
            Ok(())
        }
    }

    struct FakeBattery(Option<f32>);

    impl BatterySampler for FakeBattery {
        type Error = ();

        fn volts(&mut self) -> Result<f32, ()> {
            self.0.ok_or(())
        }
    }

    /// Baseline store holding the raw record in memory, so corrupt records can be set up.
    #[derive(Default)]
    struct MemoryStore {
        record: Option<Vec<u8>>,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn with_record(record: &[u8]) -> Self {
            MemoryStore {
                record: Some(record.to_vec()),
                fail_writes: false,
            }
        }
    }

    impl BaselineStore for MemoryStore {
        type Error = ();

        fn exists(&mut self) -> bool {
            self.record.is_some()
        }

        fn store(&mut self, value: u16) -> Result<(), BaselineError<()>> {
            if self.fail_writes {
                return Err(BaselineError::Io(()));
            }
            self.record = Some(format_record(value).as_bytes().to_vec());
            Ok(())
        }

        fn retrieve(&mut self) -> Result<u16, BaselineError<()>> {
            match &self.record {
                Some(record) => parse_record(record),
                None => Err(BaselineError::NotFound),
            }
        }

        fn delete(&mut self) -> Result<(), BaselineError<()>> {
            self.record = None;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRetained {
        bytes: Vec<u8>,
        writes: usize,
    }

    impl RetainedMemory for FakeRetained {
        fn read(&mut self, buffer: &mut [u8]) -> usize {
            let len = self.bytes.len().min(buffer.len());
            buffer[..len].copy_from_slice(&self.bytes[..len]);
            self.bytes.len()
        }

        fn write(&mut self, bytes: &[u8]) {
            self.bytes = bytes.to_vec();
            self.writes += 1;
        }
    }

    #[derive(Default)]
    struct FakeSleep {
        slept: bool,
    }

    impl DeepSleep for FakeSleep {
        fn deep_sleep(&mut self) {
            self.slept = true;
        }
    }

    type TestBoard = Board<
        I2cMock,
        FakeEnvironment,
        FakeDisplay,
        FakeBattery,
        MemoryStore,
        FakeRetained,
        PinMock,
        PinMock,
        MockDelay,
    >;

    type TestNode = Node<
        I2cMock,
        FakeEnvironment,
        FakeDisplay,
        FakeBattery,
        MemoryStore,
        FakeRetained,
        PinMock,
        PinMock,
        MockDelay,
    >;

    /// Probe, HW_ID and status all passing.
    fn validation() -> Vec<Transaction> {
        vec![
            Transaction::write(SENSOR_ADDRESS, vec![]),
            Transaction::write_read(SENSOR_ADDRESS, vec![Register::HwId as u8], vec![0x81]),
            Transaction::write_read(
                SENSOR_ADDRESS,
                vec![Register::Status as u8],
                vec![0b1001_0000],
            ),
        ]
    }

    /// APP_START then MEAS_MODE for the 60 second drive mode.
    fn start() -> Vec<Transaction> {
        vec![
            Transaction::write(SENSOR_ADDRESS, vec![Register::AppStart as u8]),
            Transaction::write(SENSOR_ADDRESS, vec![Register::MeasMode as u8, 0b0011_1000]),
        ]
    }

    fn compensation() -> Transaction {
        let mut frame = vec![Register::EnvData as u8];
        frame.extend_from_slice(&encode_environment(HUMIDITY, TEMPERATURE));
        Transaction::write(SENSOR_ADDRESS, frame)
    }

    /// Status with data ready, then the sample.
    fn sample(eco2: u16, tvoc: u16) -> Vec<Transaction> {
        let mut data = eco2.to_be_bytes().to_vec();
        data.extend_from_slice(&tvoc.to_be_bytes());
        vec![
            Transaction::write_read(
                SENSOR_ADDRESS,
                vec![Register::Status as u8],
                vec![0b1001_1000],
            ),
            Transaction::write_read(SENSOR_ADDRESS, vec![Register::AlgResultData as u8], data),
        ]
    }

    fn baseline_read(value: u16) -> Transaction {
        Transaction::write_read(
            SENSOR_ADDRESS,
            vec![Register::Baseline as u8],
            value.to_be_bytes().to_vec(),
        )
    }

    fn baseline_write(value: u16) -> Transaction {
        let bytes = value.to_be_bytes();
        Transaction::write(SENSOR_ADDRESS, vec![Register::Baseline as u8, bytes[0], bytes[1]])
    }

    /// LED transactions for `pulses` blinks.
    fn pulses(pulses: usize) -> Vec<PinTransaction> {
        let mut transactions = Vec::new();
        for _ in 0..pulses {
            transactions.push(PinTransaction::set(PinState::High));
            transactions.push(PinTransaction::set(PinState::Low));
        }
        transactions
    }

    fn board(
        retained: &[u8],
        i2c: Vec<Transaction>,
        store: MemoryStore,
        button_pressed: bool,
        led_pulses: usize,
    ) -> TestBoard {
        let button = if button_pressed {
            PinState::Low
        } else {
            PinState::High
        };
        Board {
            i2c: I2cMock::new(&i2c),
            environment: FakeEnvironment { fail: false },
            display: FakeDisplay::default(),
            battery: FakeBattery(Some(4.1)),
            store,
            retained: FakeRetained {
                bytes: retained.to_vec(),
                writes: 0,
            },
            trigger: PinMock::new(&[PinTransaction::get(button)]),
            indicator: PinMock::new(&pulses(led_pulses)),
            delay: MockDelay::new(),
        }
    }

    /// Check every mock saw exactly what it expected, and hand the board back for inspection.
    fn finish(node: TestNode) -> TestBoard {
        let mut board = node.release();
        board.i2c.done();
        board.trigger.done();
        board.indicator.done();
        board
    }

    fn concat(parts: Vec<Vec<Transaction>>) -> Vec<Transaction> {
        parts.into_iter().flatten().collect()
    }

    #[test]
    fn phase_of_state() {
        assert_eq!(Phase::of(WakeCycleState::fresh(3)), Phase::Conditioning);
        assert_eq!(Phase::of(WakeCycleState::fresh(0)), Phase::ConditionedNoBaseline);
        assert_eq!(
            Phase::of(WakeCycleState::fresh(0).with_baseline_loaded()),
            Phase::ConditionedBaselineLoaded
        );
        assert!(!Phase::FirstRun.is_conditioned());
        assert!(!Phase::Conditioning.is_conditioned());
    }

    /// Power-on: the sensor is started, nothing but temperature and humidity is shown.
    #[test]
    fn first_wake() {
        let i2c = concat(vec![validation(), start(), vec![compensation()]]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[], i2c, MemoryStore::default(), false, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::FirstRun);
        assert_eq!(
            report.state,
            WakeCycleState {
                runs_remaining: 20,
                baseline_loaded: false
            }
        );

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![20, 0]);
        assert_eq!(board.display.updates.len(), 1);
        let (reading, full_redraw) = board.display.updates[0];
        assert_eq!(reading.eco2, None);
        assert_eq!(reading.tvoc, None);
        assert_eq!(reading.temperature, TEMPERATURE);
        assert_eq!(reading.humidity, HUMIDITY);
        assert_eq!(reading.battery_volts, Some(4.1));
        assert!(full_redraw);
        assert!(board.display.asleep);
    }

    /// Mid-conditioning: the sensor is left running, the count goes down, no gas values shown.
    #[test]
    fn conditioning_wake() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(400, 0)]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[20, 0], i2c, MemoryStore::default(), false, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::Conditioning);

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![19, 0]);
        let (reading, full_redraw) = board.display.updates[0];
        assert_eq!(reading.eco2, None);
        assert_eq!(reading.tvoc, None);
        assert!(!full_redraw);
    }

    /// The button does nothing while conditioning: no baseline is read from the sensor.
    #[test]
    fn capture_ignored_while_conditioning() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(400, 0)]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[5, 0], i2c, MemoryStore::default(), true, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.baseline_captured, None);

        let mut board = finish(node);
        assert!(!board.store.exists());
    }

    /// From power-on the count runs down by one per wake, then stays at zero. The load flag stays
    /// clear throughout since nothing is stored.
    #[test]
    fn conditioning_counts_down_to_zero() {
        let mut retained: Vec<u8> = Vec::new();
        for wake in 1..=25u8 {
            let i2c = match wake {
                1 => concat(vec![validation(), start(), vec![compensation()]]),
                _ => concat(vec![validation(), vec![compensation()], sample(450, 12)]),
            };
            let mut node = Node::new(
                NodeConfig::default(),
                board(&retained, i2c, MemoryStore::default(), false, 1),
            );
            let report = node.wake().unwrap();

            let expected_runs = 20u8.saturating_sub(wake - 1);
            assert_eq!(report.state.runs_remaining, expected_runs, "wake {}", wake);
            assert!(!report.state.baseline_loaded);
            match wake {
                1 => assert_eq!(report.phase, Phase::FirstRun),
                2..=20 => assert_eq!(report.phase, Phase::Conditioning),
                _ => {
                    assert_eq!(report.phase, Phase::ConditionedNoBaseline);
                    assert_eq!(report.reading.eco2, Some(450));
                    assert_eq!(report.reading.tvoc, Some(12));
                }
            }

            retained = finish(node).retained.bytes;
        }
    }

    /// Wake 21 with nothing stored and the button held: the sensor's baseline is captured, but
    /// capturing doesn't count as loading.
    #[test]
    fn first_conditioned_wake_captures_baseline() {
        let i2c = concat(vec![
            validation(),
            vec![compensation()],
            sample(612, 80),
            vec![baseline_read(0x847B)],
        ]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[1, 0], i2c, MemoryStore::default(), true, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::ConditionedNoBaseline);
        assert_eq!(report.baseline_captured, Some(0x847B));
        assert_eq!(report.baseline_loaded, None);
        assert!(!report.state.baseline_loaded);

        let mut board = finish(node);
        assert_eq!(board.store.retrieve(), Ok(0x847B));
        assert_eq!(board.retained.bytes, vec![0, 0]);
        let (reading, _) = board.display.updates[0];
        assert_eq!(reading.eco2, Some(612));
        assert_eq!(reading.tvoc, Some(80));
    }

    /// A stored baseline is restored once; that cycle shows no gas values.
    #[test]
    fn stored_baseline_is_loaded() {
        let i2c = concat(vec![
            validation(),
            vec![compensation()],
            sample(612, 80),
            vec![baseline_write(1234)],
        ]);
        let store = MemoryStore::with_record(b"1234\n");
        let mut node = Node::new(NodeConfig::default(), board(&[0, 0], i2c, store, false, 1));

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::ConditionedNoBaseline);
        assert_eq!(report.baseline_loaded, Some(1234));

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![0, 1]);
        let (reading, full_redraw) = board.display.updates[0];
        assert!(reading.baseline_just_loaded);
        assert_eq!(reading.eco2, None);
        assert_eq!(reading.tvoc, None);
        assert!(full_redraw);
    }

    /// Steady state: live values, the store isn't read again.
    #[test]
    fn steady_state_wake() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(700, 150)]);
        let store = MemoryStore::with_record(b"1234\n");
        let mut node = Node::new(NodeConfig::default(), board(&[0, 1], i2c, store, false, 1));

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::ConditionedBaselineLoaded);
        assert_eq!(report.baseline_loaded, None);

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![0, 1]);
        let (reading, full_redraw) = board.display.updates[0];
        assert!(!reading.baseline_just_loaded);
        assert_eq!(reading.eco2, Some(700));
        assert_eq!(reading.tvoc, Some(150));
        assert!(!full_redraw);
    }

    /// Capturing in steady state overwrites the stored baseline.
    #[test]
    fn steady_state_capture_overwrites() {
        let i2c = concat(vec![
            validation(),
            vec![compensation()],
            sample(700, 150),
            vec![baseline_read(4321)],
        ]);
        let store = MemoryStore::with_record(b"1234\n");
        let mut node = Node::new(NodeConfig::default(), board(&[0, 1], i2c, store, true, 1));

        let report = node.wake().unwrap();
        assert_eq!(report.baseline_captured, Some(4321));

        let board = finish(node);
        assert_eq!(board.store.record, Some(b"4321\n".to_vec()));
    }

    /// A corrupt record is skipped: live values, nothing loaded, the cycle still succeeds.
    #[test]
    fn corrupt_baseline_is_skipped() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(500, 20)]);
        let store = MemoryStore::with_record(b"garbage\n");
        let mut node = Node::new(NodeConfig::default(), board(&[0, 0], i2c, store, false, 1));

        let report = node.wake().unwrap();
        assert_eq!(report.baseline_loaded, None);
        assert_eq!(report.reading.eco2, Some(500));

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![0, 0]);
    }

    /// Failing to store a captured baseline doesn't fail the cycle.
    #[test]
    fn capture_store_failure_is_not_fatal() {
        let i2c = concat(vec![
            validation(),
            vec![compensation()],
            sample(700, 150),
            vec![baseline_read(4321)],
        ]);
        let store = MemoryStore {
            record: None,
            fail_writes: true,
        };
        let mut node = Node::new(NodeConfig::default(), board(&[0, 1], i2c, store, true, 1));

        let report = node.wake().unwrap();
        assert_eq!(report.baseline_captured, None);

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![0, 1]);
    }

    /// No sensor on the bus: three blinks, the display still sleeps, retained state untouched.
    #[test]
    fn sensor_missing() {
        let i2c = vec![Transaction::write(SENSOR_ADDRESS, vec![])
            .with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))];
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[7, 0], i2c, MemoryStore::default(), false, 3),
        );

        assert_eq!(node.wake(), Err(CycleError::DeviceNotFound));

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![7, 0]);
        assert_eq!(board.retained.writes, 0);
        assert!(board.display.updates.is_empty());
        assert!(board.display.asleep);
    }

    /// The sensor answers but is stuck in boot mode: a failed cycle, retained state untouched.
    #[test]
    fn application_not_valid() {
        let i2c = vec![
            Transaction::write(SENSOR_ADDRESS, vec![]),
            Transaction::write_read(SENSOR_ADDRESS, vec![Register::HwId as u8], vec![0x81]),
            Transaction::write_read(SENSOR_ADDRESS, vec![Register::Status as u8], vec![0]),
        ];
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[5, 0], i2c, MemoryStore::default(), false, 3),
        );

        assert_eq!(node.wake(), Err(CycleError::ApplicationNotValid));

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![5, 0]);
        assert_eq!(board.retained.writes, 0);
        assert!(board.display.updates.is_empty());
    }

    /// A presence check that fails for any reason other than a NACK is a bus error.
    #[test]
    fn bus_error_during_presence_check() {
        let i2c = vec![Transaction::write(SENSOR_ADDRESS, vec![]).with_error(ErrorKind::Bus)];
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[5, 0], i2c, MemoryStore::default(), false, 3),
        );

        assert_eq!(node.wake(), Err(CycleError::BusIo(ErrorKind::Bus)));

        let board = finish(node);
        assert_eq!(board.retained.writes, 0);
    }

    #[test]
    fn wrong_hardware() {
        let i2c = vec![
            Transaction::write(SENSOR_ADDRESS, vec![]),
            Transaction::write_read(SENSOR_ADDRESS, vec![Register::HwId as u8], vec![0x42]),
        ];
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[], i2c, MemoryStore::default(), false, 3),
        );

        assert_eq!(node.wake(), Err(CycleError::WrongHardware(0x42)));

        let board = finish(node);
        assert_eq!(board.retained.writes, 0);
    }

    #[test]
    fn bus_error_mid_cycle() {
        let mut i2c = concat(vec![validation(), vec![compensation()]]);
        i2c.push(
            Transaction::write_read(SENSOR_ADDRESS, vec![Register::Status as u8], vec![0])
                .with_error(ErrorKind::Bus),
        );
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[0, 1], i2c, MemoryStore::default(), false, 3),
        );

        assert_eq!(node.wake(), Err(CycleError::BusIo(ErrorKind::Bus)));

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![0, 1]);
        assert_eq!(board.retained.writes, 0);
    }

    /// The load happened on the sensor, but the display failed, so the state isn't saved and the
    /// next wake loads again.
    #[test]
    fn display_failure_is_not_persisted() {
        let i2c = concat(vec![
            validation(),
            vec![compensation()],
            sample(612, 80),
            vec![baseline_write(1234)],
        ]);
        let store = MemoryStore::with_record(b"1234\n");
        let mut test_board = board(&[0, 0], i2c, store, false, 3);
        test_board.display.fail = true;
        let mut node = Node::new(NodeConfig::default(), test_board);

        assert_eq!(
            node.wake(),
            Err(CycleError::Unexpected(Collaborator::Display))
        );

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![0, 0]);
        assert_eq!(board.retained.writes, 0);
    }

    #[test]
    fn environment_failure() {
        let i2c = validation();
        let mut test_board = board(&[3, 0], i2c, MemoryStore::default(), false, 3);
        test_board.environment.fail = true;
        let mut node = Node::new(NodeConfig::default(), test_board);

        assert_eq!(
            node.wake(),
            Err(CycleError::Unexpected(Collaborator::Environment))
        );

        let board = finish(node);
        assert_eq!(board.retained.writes, 0);
    }

    /// Unreadable retained memory restarts conditioning.
    #[test]
    fn undecodable_state_restarts() {
        let i2c = concat(vec![validation(), start(), vec![compensation()]]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[0, 7], i2c, MemoryStore::default(), false, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::FirstRun);

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![20, 0]);
    }

    /// Retained memory from older firmware: one byte, upgraded to two on write.
    #[test]
    fn legacy_state_is_upgraded() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(400, 0)]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[3], i2c, MemoryStore::default(), false, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.phase, Phase::Conditioning);

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![2, 0]);
    }

    /// A run count above the configured one is pulled back into range.
    #[test]
    fn oversized_run_count_is_clamped() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(400, 0)]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[200, 0], i2c, MemoryStore::default(), false, 1),
        );

        node.wake().unwrap();

        let board = finish(node);
        assert_eq!(board.retained.bytes, vec![19, 0]);
    }

    #[test]
    fn battery_failure_leaves_voltage_blank() {
        let i2c = concat(vec![validation(), vec![compensation()], sample(700, 150)]);
        let mut test_board = board(&[0, 1], i2c, MemoryStore::default(), false, 1);
        test_board.battery = FakeBattery(None);
        let mut node = Node::new(NodeConfig::default(), test_board);

        let report = node.wake().unwrap();
        assert_eq!(report.reading.battery_volts, None);
        assert_eq!(report.reading.eco2, Some(700));

        finish(node);
    }

    /// Data not ready yet: the cycle goes on, just without gas values.
    #[test]
    fn data_not_ready() {
        let i2c = concat(vec![
            validation(),
            vec![compensation()],
            vec![Transaction::write_read(
                SENSOR_ADDRESS,
                vec![Register::Status as u8],
                vec![0b1001_0000],
            )],
        ]);
        let mut node = Node::new(
            NodeConfig::default(),
            board(&[0, 1], i2c, MemoryStore::default(), false, 1),
        );

        let report = node.wake().unwrap();
        assert_eq!(report.reading.eco2, None);
        assert_eq!(report.state, WakeCycleState::fresh(0).with_baseline_loaded());

        finish(node);
    }

    /// `wake_and_sleep` consumes the node, so keep clones of the mocks to check afterwards.
    #[test]
    fn wake_and_sleep() {
        let i2c = concat(vec![validation(), start(), vec![compensation()]]);
        let test_board = board(&[], i2c, MemoryStore::default(), false, 1);
        let (mut i2c, mut trigger, mut indicator) = (
            test_board.i2c.clone(),
            test_board.trigger.clone(),
            test_board.indicator.clone(),
        );
        let node = Node::new(NodeConfig::default(), test_board);
        let mut sleeper = FakeSleep::default();

        let report = node.wake_and_sleep(&mut sleeper).unwrap();
        assert_eq!(report.phase, Phase::FirstRun);
        assert!(sleeper.slept);

        i2c.done();
        trigger.done();
        indicator.done();
    }

    /// Sleep happens after a failed cycle too.
    #[test]
    fn wake_and_sleep_after_failure() {
        let i2c = vec![Transaction::write(SENSOR_ADDRESS, vec![])
            .with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))];
        let test_board = board(&[], i2c, MemoryStore::default(), false, 3);
        let (mut i2c, mut trigger, mut indicator) = (
            test_board.i2c.clone(),
            test_board.trigger.clone(),
            test_board.indicator.clone(),
        );
        let node = Node::new(NodeConfig::default(), test_board);
        let mut sleeper = FakeSleep::default();

        assert_eq!(
            node.wake_and_sleep(&mut sleeper),
            Err(CycleError::DeviceNotFound)
        );
        assert!(sleeper.slept);

        i2c.done();
        trigger.done();
        indicator.done();
    }

    #[test]
    fn factory_reset() {
        let store = MemoryStore::with_record(b"1234\n");
        let mut test_board = board(&[0, 1], vec![], store, false, 0);
        // No wake cycle runs, so the button is never polled; use up its expectation here.
        assert!(!test_board.trigger.is_low().unwrap());
        let mut node = Node::new(NodeConfig::default(), test_board);

        node.factory_reset().unwrap();

        let mut board = finish(node);
        assert!(!board.store.exists());
        assert!(board.retained.bytes.is_empty());
    }
}
