//! Async shell around the update engine
//!
//! [`Epdc`] owns the engine behind an embassy mutex. Three kinds of
//! task share it:
//!
//! - Callers: `submit`, `wait`, `flush` and the control setters
//! - The dispatcher: [`Epdc::run`], woken by controller interrupts
//! - The power manager: [`Epdc::run_power_manager`]
//!
//! Nothing sleeps while holding the engine lock. Waiters park on a progress
//! watch that carries the engine epoch, and re-check their condition under
//! the lock after every wake.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_sync::watch::Watch;
use embassy_time::{with_deadline, with_timeout, Duration, Instant, Timer};

use epdc_core::config::UpdateScheme;
use epdc_core::engine::{DriveOutcome, EngineStats, PowerHint, WaitReason};
use epdc_core::geometry::Rotation;
use epdc_core::power::PowerState;
use epdc_core::traits::{ImagePipeline, PowerRails, RegisterBus, TemperatureSensor};
use epdc_core::update::{Marker, UpdateRequest};
use epdc_core::{Engine, Error};

/// Concurrent `wait`/`flush` callers woken by progress notifications
///
/// Further callers fall back to polling.
pub const MAX_WAITERS: usize = 4;

/// Poll period for waiters without a progress receiver
const POLL_INTERVAL_MS: u64 = 5;

/// E-paper update service
pub struct Epdc<M: RawMutex, R, P, S, X> {
    engine: Mutex<M, Engine<R, P, S, X>>,
    /// Controller raised its interrupt line
    irq: Signal<M, ()>,
    /// New work was admitted or settings changed
    work: Signal<M, ()>,
    /// Power-down scheduled, delay in milliseconds
    power_down: Signal<M, u32>,
    /// Engine epoch after every state change
    progress: Watch<M, u32, MAX_WAITERS>,
}

impl<M, R, P, S, X> Epdc<M, R, P, S, X>
where
    M: RawMutex,
    R: RegisterBus,
    P: PowerRails,
    S: TemperatureSensor,
    X: ImagePipeline,
{
    pub fn new(engine: Engine<R, P, S, X>) -> Self {
        Self {
            engine: Mutex::new(engine),
            irq: Signal::new(),
            work: Signal::new(),
            power_down: Signal::new(),
            progress: Watch::new(),
        }
    }

    /// Queue an update
    ///
    /// Requests that switch the whitening phase drain everything in flight
    /// first. A drain that times out is logged and the request is admitted
    /// anyway.
    pub async fn submit(&self, request: UpdateRequest) -> Result<Option<Marker>, Error> {
        let (admission, drain_ms) = {
            let engine = self.engine.lock().await;
            (engine.prepare(&request)?, engine.config().timeouts.drain_ms)
        };

        if admission.drain_first {
            debug!("whitening transition, draining first");
            if let Err(e) = self.flush(Duration::from_millis(drain_ms as u64)).await {
                warn!("drain before whitening failed: {:?}", e);
            }
        }

        let marker = {
            let mut engine = self.engine.lock().await;
            let marker = engine.submit(request)?;
            self.publish(&engine);
            marker
        };
        self.work.signal(());
        Ok(marker)
    }

    /// Wait until the update carrying `marker` is on screen
    ///
    /// With no marker, waits until every update is.
    pub async fn wait(&self, marker: Option<Marker>, timeout: Duration) -> Result<(), Error> {
        let done = match marker {
            Some(m) => self.wait_until(timeout, |e| !e.is_marker_pending(m)).await,
            None => self.wait_until(timeout, |e| e.is_quiescent()).await,
        };
        if done {
            Ok(())
        } else {
            Err(Error::WaitTimeout)
        }
    }

    /// Wait until nothing is queued, colliding, dispatching or running
    pub async fn flush(&self, timeout: Duration) -> Result<(), Error> {
        if self.wait_until(timeout, |e| e.is_quiescent()).await {
            Ok(())
        } else {
            Err(Error::FlushTimeout)
        }
    }

    /// Returns false if `done` still fails at the deadline
    async fn wait_until<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(&Engine<R, P, S, X>) -> bool,
    {
        let deadline = Instant::now() + timeout;
        // Taken before the first check so no change slips in between
        let mut rx = self.progress.receiver();

        loop {
            if done(&*self.engine.lock().await) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let woke = match rx.as_mut() {
                Some(rx) => with_deadline(deadline, rx.changed()).await.is_ok(),
                None => {
                    let poll = Instant::now() + Duration::from_millis(POLL_INTERVAL_MS);
                    Timer::at(poll.min(deadline)).await;
                    true
                }
            };
            if !woke {
                return done(&*self.engine.lock().await);
            }
        }
    }

    /// Compensate for `temp_c` instead of the sensor
    pub async fn set_temperature_override(&self, temp_c: i32) {
        self.engine.lock().await.set_temperature_override(temp_c);
    }

    pub async fn clear_temperature_override(&self) {
        self.engine.lock().await.clear_temperature_override();
    }

    /// Drain, then switch update scheme
    pub async fn set_scheme(&self, scheme: UpdateScheme) {
        self.drain_for("scheme change").await;
        let mut engine = self.engine.lock().await;
        engine.set_scheme(scheme);
        info!("update scheme {:?}", scheme);
        self.publish(&engine);
    }

    /// Drain, then switch display rotation
    pub async fn set_rotation(&self, rotation: Rotation) {
        self.drain_for("rotation change").await;
        let mut engine = self.engine.lock().await;
        engine.set_rotation(rotation);
        info!("rotation {:?}", rotation);
        self.publish(&engine);
    }

    pub async fn power_hint(&self, hint: PowerHint) -> Result<(), Error> {
        let mut engine = self.engine.lock().await;
        let result = engine.power_hint(hint);
        self.publish(&engine);
        result
    }

    /// Clear a thermal lockout after the cause was dealt with
    pub async fn reset_lockout(&self) -> Result<(), Error> {
        let mut engine = self.engine.lock().await;
        let result = engine.reset_lockout();
        self.publish(&engine);
        result
    }

    /// Drain, then stop accepting work and cut panel power
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        if let Err(e) = self.flush(timeout).await {
            warn!("shutdown with work in flight: {:?}", e);
        }
        let mut engine = self.engine.lock().await;
        let result = engine.shutdown();
        self.publish(&engine);
        result
    }

    pub async fn stats(&self) -> EngineStats {
        self.engine.lock().await.stats()
    }

    pub async fn power_state(&self) -> PowerState {
        self.engine.lock().await.power_state()
    }

    /// Controller interrupt handler hook
    ///
    /// Only signals the dispatcher, safe to call from interrupt context.
    pub fn on_interrupt(&self) {
        self.irq.signal(());
    }

    /// Dispatcher loop
    ///
    /// Drives the engine until it parks, then sleeps until an interrupt or
    /// new work. A park that outlives its timeout resynchronizes with the
    /// hardware.
    pub async fn run(&self) -> ! {
        info!("epdc dispatcher started");

        loop {
            let timeout_ms = {
                let mut engine = self.engine.lock().await;
                let outcome = engine.drive();
                self.publish(&engine);

                let timeouts = engine.config().timeouts;
                match outcome {
                    DriveOutcome::Suspended(WaitReason::FrameEnd) => Some(timeouts.frame_end_ms),
                    DriveOutcome::Suspended(reason) => {
                        trace!("dispatcher parked on {:?}", reason);
                        Some(timeouts.resource_ms)
                    }
                    DriveOutcome::Idle if engine.is_quiescent() => None,
                    // Units still running
                    DriveOutcome::Idle => Some(timeouts.resource_ms),
                }
            };

            let event = select(self.irq.wait(), self.work.wait());
            let woken = match timeout_ms {
                Some(ms) => with_timeout(Duration::from_millis(ms as u64), event)
                    .await
                    .is_ok(),
                None => {
                    event.await;
                    true
                }
            };

            let outcome = {
                let mut engine = self.engine.lock().await;
                let outcome = if woken {
                    engine.service_interrupt()
                } else {
                    warn!("no controller event for {} ms", timeout_ms.unwrap_or(0));
                    engine.recover_stall()
                };
                self.publish(&engine);
                outcome
            };

            if let Some(ms) = outcome.power_down_after_ms {
                debug!("power-down in {} ms", ms);
                self.power_down.signal(ms);
            }
        }
    }

    /// Delayed power-down timer
    ///
    /// A new schedule restarts the delay. Work admitted in the meantime
    /// powers the panel back up, which turns the expiry into a no-op.
    pub async fn run_power_manager(&self) -> ! {
        info!("epdc power manager started");

        loop {
            let mut delay_ms = self.power_down.wait().await;
            loop {
                match select(
                    Timer::after_millis(delay_ms as u64),
                    self.power_down.wait(),
                )
                .await
                {
                    Either::First(()) => break,
                    Either::Second(ms) => delay_ms = ms,
                }
            }

            let mut engine = self.engine.lock().await;
            if let Err(e) = engine.complete_power_down() {
                error!("power-down failed: {:?}", e);
            }
            self.publish(&engine);
        }
    }

    async fn drain_for(&self, what: &str) {
        let drain_ms = self.engine.lock().await.config().timeouts.drain_ms;
        if let Err(e) = self.flush(Duration::from_millis(drain_ms as u64)).await {
            warn!("drain before {} failed: {:?}", what, e);
        }
    }

    fn publish(&self, engine: &Engine<R, P, S, X>) {
        self.progress.sender().send(engine.epoch());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_futures::yield_now;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use epdc_core::config::{EngineConfig, Timeouts};
    use epdc_core::geometry::Rect;
    use epdc_core::temperature::TemperatureTable;
    use epdc_core::testing::{MockPanel, MockPipeline, MockRails, MockRegisters, MockSensor};
    use epdc_core::waveform::{WaveformMode, WaveformModes};

    type TestEpdc<'a> =
        Epdc<NoopRawMutex, MockRegisters<'a>, MockRails<'a>, MockSensor<'a>, MockPipeline<'a>>;

    fn epdc_with(panel: &MockPanel, config: EngineConfig) -> TestEpdc<'_> {
        let mut engine = Engine::new(
            config,
            panel.registers(),
            panel.rails(),
            panel.sensor(),
            panel.pipeline(),
        );
        let table = TemperatureTable::new(&[0, 10, 20, 30]).unwrap();
        engine.install_waveform(table, WaveformModes::default());
        Epdc::new(engine)
    }

    fn epdc(panel: &MockPanel) -> TestEpdc<'_> {
        epdc_with(panel, EngineConfig::default())
    }

    fn du(region: Rect) -> UpdateRequest {
        UpdateRequest::partial(region, WaveformMode::Du)
    }

    /// Run `body` next to the dispatcher and the power manager
    async fn with_runner<T>(epdc: &TestEpdc<'_>, body: impl core::future::Future<Output = T>) -> T {
        let runners = select(epdc.run(), epdc.run_power_manager());
        match select(runners, body).await {
            Either::First(Either::First(never)) | Either::First(Either::Second(never)) => {
                match never {}
            }
            Either::Second(result) => result,
        }
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        while !cond() {
            yield_now().await;
        }
    }

    /// Complete the working buffer pass and then `unit`
    async fn finish(panel: &MockPanel, epdc: &TestEpdc<'_>, unit: usize) {
        until(|| panel.working_buffer_busy()).await;
        panel.complete_working_buffer();
        epdc.on_interrupt();
        until(|| !panel.working_buffer_busy() && panel.irq_status() == 0).await;
        panel.complete_unit(unit);
        epdc.on_interrupt();
    }

    #[test]
    fn test_marker_wait_completes() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            let m = Marker::new(7).unwrap();
            let marker = epdc
                .submit(du(Rect::new(0, 0, 32, 32)).with_marker(m))
                .await
                .unwrap();
            assert_eq!(marker, Some(m));

            let (result, ()) = join(
                epdc.wait(marker, Duration::from_millis(500)),
                finish(&panel, &epdc, 0),
            )
            .await;
            assert_eq!(result, Ok(()));
            assert_eq!(panel.programmed_count(), 1);
            assert_eq!(epdc.stats().await.dispatched, 1);
        }));
    }

    #[test]
    fn test_unknown_marker_returns_immediately() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);
        let m = Marker::new(42).unwrap();
        let result = block_on(epdc.wait(Some(m), Duration::from_millis(0)));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_wait_times_out() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            let m = Marker::new(3).unwrap();
            epdc.submit(du(Rect::new(0, 0, 8, 8)).with_marker(m))
                .await
                .unwrap();
            let result = epdc.wait(Some(m), Duration::from_millis(20)).await;
            assert_eq!(result, Err(Error::WaitTimeout));
        }));
    }

    #[test]
    fn test_flush_times_out_without_completion() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            let result = epdc.flush(Duration::from_millis(20)).await;
            assert_eq!(result, Err(Error::FlushTimeout));
        }));
    }

    #[test]
    fn test_flush_drains_everything() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            let (result, ()) = join(
                epdc.flush(Duration::from_millis(500)),
                finish(&panel, &epdc, 0),
            )
            .await;
            assert_eq!(result, Ok(()));
            assert_eq!(epdc.wait(None, Duration::from_millis(0)).await, Ok(()));
        }));
    }

    #[test]
    fn test_power_down_after_delay() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            finish(&panel, &epdc, 0).await;
            epdc.flush(Duration::from_millis(500)).await.unwrap();
            assert_eq!(epdc.power_state().await, PowerState::PoweringDown);

            Timer::after_millis(150).await;
            assert_eq!(epdc.power_state().await, PowerState::Off);
        }));
    }

    #[test]
    fn test_power_down_preempted_by_new_work() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            finish(&panel, &epdc, 0).await;
            epdc.flush(Duration::from_millis(500)).await.unwrap();
            assert_eq!(epdc.power_state().await, PowerState::PoweringDown);

            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            until(|| panel.programmed_count() == 2).await;
            assert_eq!(epdc.power_state().await, PowerState::On);

            // The old schedule expires without cutting power
            Timer::after_millis(150).await;
            assert_eq!(epdc.power_state().await, PowerState::On);
        }));
    }

    #[test]
    fn test_stall_recovered_after_lost_interrupt() {
        let panel = MockPanel::new();
        let config = EngineConfig {
            timeouts: Timeouts {
                resource_ms: 20,
                ..Timeouts::default()
            },
            ..EngineConfig::default()
        };
        let epdc = epdc_with(&panel, config);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            until(|| panel.working_buffer_busy()).await;
            panel.complete_working_buffer();
            epdc.on_interrupt();
            until(|| panel.irq_status() == 0).await;

            // Unit finishes but its interrupt never arrives
            panel.lose_unit_interrupt(0);
            let result = epdc.flush(Duration::from_millis(500)).await;
            assert_eq!(result, Ok(()));
        }));
    }

    #[test]
    fn test_whitening_admitted_after_drain_timeout() {
        let panel = MockPanel::new();
        let config = EngineConfig {
            timeouts: Timeouts {
                drain_ms: 10,
                ..Timeouts::default()
            },
            ..EngineConfig::default()
        };
        let epdc = epdc_with(&panel, config);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            until(|| panel.programmed_count() == 1).await;

            // Nothing completes, so the drain runs out
            let a2 = UpdateRequest::partial(Rect::new(100, 100, 8, 8), WaveformMode::A2);
            assert_eq!(epdc.submit(a2).await, Ok(None));
            assert_eq!(epdc.stats().await.submitted, 2);
        }));
    }

    #[test]
    fn test_submit_error_reaches_caller() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);
        let result = block_on(epdc.submit(du(Rect::new(790, 0, 20, 10))));
        assert_eq!(result, Err(Error::InvalidRegion));
    }

    #[test]
    fn test_set_scheme_drains_and_applies() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(with_runner(&epdc, async {
            epdc.submit(du(Rect::new(0, 0, 8, 8))).await.unwrap();
            join(epdc.set_scheme(UpdateScheme::Queue), finish(&panel, &epdc, 0)).await;
            let engine = epdc.engine.lock().await;
            assert!(engine.is_quiescent());
            assert_eq!(engine.config().scheme, UpdateScheme::Queue);
        }));
    }

    #[test]
    fn test_set_rotation_applies() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);
        block_on(epdc.set_rotation(Rotation::Clockwise));
        let result = block_on(epdc.submit(du(Rect::new(0, 0, 600, 800))));
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_power_hint_and_shutdown() {
        let panel = MockPanel::new();
        let epdc = epdc(&panel);

        block_on(async {
            epdc.power_hint(PowerHint::On).await.unwrap();
            assert_eq!(epdc.power_state().await, PowerState::On);
            epdc.shutdown(Duration::from_millis(10)).await.unwrap();
            assert_eq!(epdc.power_state().await, PowerState::Off);
            assert_eq!(
                epdc.submit(du(Rect::new(0, 0, 8, 8))).await,
                Err(Error::NotReady)
            );
        });
    }
}
