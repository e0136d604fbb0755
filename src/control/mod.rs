//! Control plane: the line-oriented command interpreter.
//!
//! Runs on a single task. Each line is split, traced through the reporter,
//! validated, and applied to the shared pipeline state. Input errors are
//! reported and leave every piece of state untouched.

pub mod command;
pub mod line_reader;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tracing::{debug, info, instrument};

use crate::coordination::{AdmissionGate, FlushCoordinator, SamplePeriod};
use crate::data::record::Rendered;
use crate::data::telemetry_buffer::{consume_threshold, TelemetryBuffer};
use crate::error::BufferError;
use crate::report::Reporter;

pub use command::{Command, RawCommand, SdAction, Switch};
pub use line_reader::LineReader;

/// Command interpreter bound to the pipeline's shared state.
pub struct ControlPlane {
    buffer: Arc<TelemetryBuffer>,
    coordinator: Arc<FlushCoordinator>,
    gate: Arc<AdmissionGate>,
    period: Arc<SamplePeriod>,
    reporter: Reporter,
    consume_window: Duration,
    max_line_len: usize,
}

impl ControlPlane {
    /// Bind a control plane to the pipeline's shared state.
    pub fn new(
        buffer: Arc<TelemetryBuffer>,
        coordinator: Arc<FlushCoordinator>,
        gate: Arc<AdmissionGate>,
        period: Arc<SamplePeriod>,
        reporter: Reporter,
    ) -> Self {
        Self {
            buffer,
            coordinator,
            gate,
            period,
            reporter,
            consume_window: Duration::from_secs(60),
            max_line_len: 64,
        }
    }

    /// Target flush interval used to derive the consume threshold.
    pub fn with_consume_window(mut self, window: Duration) -> Self {
        self.consume_window = window;
        self
    }

    /// Truncate input lines longer than `max_line_len` bytes.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Interpret lines from `input` until end of input.
    #[instrument(name = "control", skip_all)]
    pub async fn run<R>(&self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = LineReader::new(input, self.max_line_len);
        while let Some(line) = lines.next_line().await? {
            self.handle_line(&line).await;
        }
        info!("Control input closed");
        Ok(())
    }

    /// Handle one input line.
    pub async fn handle_line(&self, line: &str) {
        let Some(raw) = RawCommand::split(line) else {
            return;
        };
        self.reporter.log(format!("Command received: {raw}"));

        match raw.parse() {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => debug!(name = raw.name, argument = raw.argument, "Command ignored"),
            Err(err) => self.reporter.error(err.to_string()),
        }

        self.reporter.log(format!("Command parsed: {raw}"));
    }

    /// Apply a validated command.
    pub async fn execute(&self, command: Command) {
        debug!(?command, "Executing command");
        match command {
            Command::ReadNow => self.emit(self.buffer.peek_last()),
            Command::ReadBuffer { end } => self.emit(self.buffer.drain(0, end, false)),
            Command::SetPeriod(period) => self.set_period(period),
            Command::State(Switch::On) => {
                if self.gate.open() {
                    info!("Sampling resumed");
                }
                self.reporter.respond("SAMPLING: ACTIVE");
            }
            Command::State(Switch::Off) => {
                if self.gate.close().await {
                    info!("Sampling paused");
                }
                self.reporter.respond("SAMPLING: INACTIVE");
            }
            Command::Logging(switch) => {
                let enabled = switch == Switch::On;
                self.reporter.set_logging(enabled);
                self.reporter.respond(if enabled {
                    "LOGGING: ACTIVE"
                } else {
                    "LOGGING: INACTIVE"
                });
            }
            Command::Sd(SdAction::Flush) => {
                self.coordinator.request_flush();
                self.reporter.respond("SD CARD: FLUSHED");
            }
            Command::Sd(SdAction::Eject) => {
                self.coordinator.request_eject();
                self.reporter.respond("SD CARD: FLUSHED, EJECTED");
            }
            Command::Sd(SdAction::Mount) => {
                self.coordinator.request_remount();
                self.reporter.respond("SD CARD: MOUNTING");
            }
        }
    }

    fn emit(&self, rendered: Result<Rendered, BufferError>) {
        match rendered {
            Ok(rendered) => self.reporter.respond(rendered.to_string()),
            Err(err) => self.reporter.error(err.report_message()),
        }
    }

    fn set_period(&self, period: Duration) {
        let threshold =
            consume_threshold(self.consume_window, period, self.buffer.capacity());
        self.period.set(period);
        self.buffer.set_threshold(threshold);
        info!(period_ms = period.as_millis() as u64, threshold, "Sample period updated");
        self.reporter
            .respond(format!("T UPDATED TO {}ms", period.as_millis()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::clock::CalendarTimestamp;
    use crate::data::record::Reading;
    use crate::report;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tracing_test::traced_test;

    struct Fixture {
        plane: ControlPlane,
        buffer: Arc<TelemetryBuffer>,
        coordinator: Arc<FlushCoordinator>,
        gate: Arc<AdmissionGate>,
        period: Arc<SamplePeriod>,
        reporter: Reporter,
        rx: UnboundedReceiver<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let coordinator = Arc::new(FlushCoordinator::new());
            let buffer = Arc::new(TelemetryBuffer::new(2000, 60, Arc::clone(&coordinator)));
            let gate = Arc::new(AdmissionGate::new(true));
            let period = Arc::new(SamplePeriod::new(Duration::from_secs(1)));
            let (reporter, rx) = report::channel(false);
            let plane = ControlPlane::new(
                Arc::clone(&buffer),
                Arc::clone(&coordinator),
                Arc::clone(&gate),
                Arc::clone(&period),
                reporter.clone(),
            );
            Self {
                plane,
                buffer,
                coordinator,
                gate,
                period,
                reporter,
                rx,
            }
        }

        fn output(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                out.push(message);
            }
            out
        }

        fn fill(&self, n: usize) {
            for i in 0..n {
                self.buffer
                    .insert(Reading::new(i as f32, 1000.0, 1.0), CalendarTimestamp::default())
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn sett_updates_period_and_threshold() {
        let mut f = Fixture::new();
        f.plane.handle_line("SETT 1.5").await;
        assert_eq!(f.period.get(), Duration::from_millis(1500));
        assert_eq!(f.buffer.threshold(), 40);
        assert_eq!(f.output(), vec!["T UPDATED TO 1500ms"]);

        f.plane.handle_line("SETT 0.1").await;
        assert_eq!(f.buffer.threshold(), 600);
    }

    #[tokio::test]
    #[traced_test]
    async fn period_change_is_traced() {
        let f = Fixture::new();
        f.plane.handle_line("SETT 2").await;
        assert!(logs_contain("Sample period updated"));
        assert!(logs_contain("threshold=30"));
    }

    #[tokio::test]
    async fn sett_out_of_range_changes_nothing() {
        let mut f = Fixture::new();
        f.plane.handle_line("SETT 0.05").await;
        assert_eq!(f.period.get(), Duration::from_secs(1));
        assert_eq!(f.buffer.threshold(), 60);
        assert_eq!(f.output(), vec!["[ERROR] SETT variable out of range."]);
        assert!(f.reporter.fault_latched());
    }

    #[tokio::test]
    async fn state_toggles_gate_idempotently() {
        let mut f = Fixture::new();
        f.plane.handle_line("STATE OFF").await;
        f.plane.handle_line("STATE OFF").await;
        assert!(!f.gate.is_open());
        f.plane.handle_line("STATE ON").await;
        f.plane.handle_line("STATE ON").await;
        assert!(f.gate.is_open());
        assert_eq!(
            f.output(),
            vec![
                "SAMPLING: INACTIVE",
                "SAMPLING: INACTIVE",
                "SAMPLING: ACTIVE",
                "SAMPLING: ACTIVE"
            ]
        );
    }

    #[tokio::test]
    async fn logging_toggle_wraps_commands_with_trace_lines() {
        let mut f = Fixture::new();
        f.plane.handle_line("LOGGING ON").await;
        f.plane.handle_line("SD F").await;
        assert_eq!(
            f.output(),
            vec![
                "LOGGING: ACTIVE",
                "[LOG] Command parsed: LOGGINGON",
                "[LOG] Command received: SDF",
                "SD CARD: FLUSHED",
                "[LOG] Command parsed: SDF",
            ]
        );
        assert!(f.coordinator.flush_pending());
    }

    #[tokio::test]
    async fn read_commands_do_not_mutate_buffer() {
        let mut f = Fixture::new();
        f.plane.handle_line("READ NOW").await;
        assert_eq!(f.output(), vec![Rendered::NO_RECORDS]);

        f.fill(3);
        f.plane.handle_line("READ NOW").await;
        f.plane.handle_line("READBUFFER 2").await;
        f.plane.handle_line("READBUFFER -1").await;
        let out = f.output();
        assert!(out[0].contains("Temp: 2.00C"));
        assert_eq!(out[1].lines().count(), 2);
        assert_eq!(out[2].lines().count(), 3);
        assert_eq!(f.buffer.occupied().unwrap(), 3);
    }

    #[tokio::test]
    async fn sd_commands_signal_coordinator() {
        let mut f = Fixture::new();
        f.plane.handle_line("SD E").await;
        assert!(f.coordinator.eject_pending());
        assert!(f.coordinator.flush_pending());
        f.plane.handle_line("SD M").await;
        f.plane.handle_line("SD Q").await;
        assert_eq!(
            f.output(),
            vec![
                "SD CARD: FLUSHED, EJECTED",
                "SD CARD: MOUNTING",
                "[ERROR] SD variable must be E, F or M."
            ]
        );
    }

    #[tokio::test]
    async fn unknown_commands_are_silent() {
        let mut f = Fixture::new();
        f.plane.handle_line("REBOOT").await;
        f.plane.handle_line("READ YESTERDAY").await;
        f.plane.handle_line("").await;
        assert!(f.output().is_empty());
    }

    #[tokio::test]
    async fn run_consumes_input_until_eof() {
        let mut f = Fixture::new();
        let input: &[u8] = b"STATE OFF\nSETT 2\nSTATE ON\n";
        f.plane.run(input).await.unwrap();
        assert_eq!(
            f.output(),
            vec!["SAMPLING: INACTIVE", "T UPDATED TO 2000ms", "SAMPLING: ACTIVE"]
        );
    }
}
