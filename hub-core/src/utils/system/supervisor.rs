//! The always-on supervisor process.
//!
//! One cooperative task consumes the event queue in arrival order. Every
//! event goes to the HMI handler. A periodic timer expiry re-arms the timer
//! and polls the battery, HMI and supervisor sub-tasks. A power-button press
//! runs the user program's stop callback. The watchdog is refreshed after
//! every dispatched event; a stalled loop resets the hub.

use core::cell::Cell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_time::{with_deadline, Duration, Instant};

use crate::utils::{
    config::SupervisorConfig,
    controllers::hub::{with_motors, SharedMotors},
    system::status::{Event, EventChannel, StatusFlag, SystemStatus},
};

/// Callbacks a user program registers while it runs.
#[derive(Clone, Copy)]
pub struct UserProgramCallbacks<'a> {
    /// Called when the power button is pressed.
    pub stop: &'a (dyn Fn() + Sync),
    /// Called for every byte received on stdin.
    pub stdin: &'a (dyn Fn(u8) + Sync),
}

/// State shared between the supervisor and the user program.
pub struct SystemContext<'a> {
    status: SystemStatus<'a>,
    callbacks: Mutex<CriticalSectionRawMutex, Cell<Option<UserProgramCallbacks<'a>>>>,
    motors: &'a SharedMotors,
}

impl<'a> SystemContext<'a> {
    pub const fn new(
        events: &'a EventChannel,
        motors: &'a SharedMotors,
    ) -> Self {
        Self {
            status: SystemStatus::new(events),
            callbacks: Mutex::new(Cell::new(None)),
            motors,
        }
    }

    pub const fn status(&self) -> &SystemStatus<'a> {
        &self.status
    }

    pub const fn events(&self) -> &'a EventChannel {
        self.status.events()
    }

    pub const fn motors(&self) -> &'a SharedMotors {
        self.motors
    }

    /// Register (or clear) the callbacks and mark the program running.
    pub fn prepare_user_program(
        &self,
        callbacks: Option<UserProgramCallbacks<'a>>,
    ) {
        self.callbacks.lock(|c| c.set(callbacks));
        self.status.set(StatusFlag::UserProgramRunning);
        tracing::info!(callbacks = callbacks.is_some(), "user program prepared");
    }

    /// Mark the program stopped, stop every motor and drop the callbacks.
    pub fn unprepare_user_program(&self) {
        self.status.clear(StatusFlag::UserProgramRunning);
        with_motors(self.motors, |hub| hub.stop_all());
        self.callbacks.lock(|c| c.set(None));
        tracing::info!("user program unprepared");
    }

    fn callbacks(&self) -> Option<UserProgramCallbacks<'a>> {
        self.callbacks.lock(Cell::get)
    }
}

/// Subsystems polled by the supervisor. All hooks default to no-ops.
pub trait SystemServices {
    fn battery_init(&mut self) {}

    fn bluetooth_init(&mut self) {}

    fn hmi_init(&mut self) {}

    fn battery_poll(
        &mut self,
        _status: &SystemStatus<'_>,
    ) {
    }

    fn hmi_poll(
        &mut self,
        _status: &SystemStatus<'_>,
    ) {
    }

    fn supervisor_poll(
        &mut self,
        _status: &SystemStatus<'_>,
    ) {
    }

    /// Sees every event before the supervisor acts on it.
    fn hmi_handle_event(
        &mut self,
        _event: &Event,
    ) {
    }
}

impl SystemServices for () {}

/// Hardware watchdog.
pub trait Watchdog {
    fn configure(
        &mut self,
        timeout: Duration,
    );

    fn refresh(&mut self);
}

/// Timer re-armed relative to the moment it is handled.
///
/// Late handling pushes every later tick back; ticks never double-fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTimer {
    period: Duration,
    deadline: Option<Instant>,
}

impl PeriodicTimer {
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn arm(
        &mut self,
        now: Instant,
    ) {
        self.deadline = Some(now + self.period);
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    pub fn is_expired(
        &self,
        now: Instant,
    ) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Running,
}

pub struct Supervisor<'c, 'a, S, W> {
    ctx: &'c SystemContext<'a>,
    services: S,
    watchdog: W,
    config: SupervisorConfig,
    timer: PeriodicTimer,
    state: SupervisorState,
}

impl<'c, 'a, S, W> Supervisor<'c, 'a, S, W>
where
    S: SystemServices,
    W: Watchdog,
{
    pub fn new(
        ctx: &'c SystemContext<'a>,
        services: S,
        watchdog: W,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            ctx,
            services,
            watchdog,
            timer: PeriodicTimer::new(config.tick_period()),
            config,
            state: SupervisorState::Initializing,
        }
    }

    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    pub const fn timer(&self) -> &PeriodicTimer {
        &self.timer
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    /// Configure the watchdog, bring up the subsystems and arm the tick.
    pub fn init(
        &mut self,
        now: Instant,
    ) {
        self.watchdog.configure(self.config.watchdog_timeout());
        self.services.battery_init();
        self.services.bluetooth_init();
        self.services.hmi_init();
        self.timer.arm(now);
        self.state = SupervisorState::Running;
        tracing::info!(
            tick_ms = self.config.tick_period_ms,
            watchdog_ms = self.config.watchdog_timeout_ms,
            "supervisor running"
        );
    }

    /// Handle one event.
    pub fn dispatch(
        &mut self,
        event: Event,
        now: Instant,
    ) {
        self.services.hmi_handle_event(&event);

        match event {
            Event::TimerExpired => {
                if self.timer.is_expired(now) {
                    self.timer.arm(now);
                    let status = self.ctx.status();
                    self.services.battery_poll(status);
                    self.services.hmi_poll(status);
                    self.services.supervisor_poll(status);
                }
            }
            Event::StatusSet {
                flag: StatusFlag::PowerButtonPressed,
            } => {
                if let Some(callbacks) = self.ctx.callbacks() {
                    tracing::debug!("power button, stopping user program");
                    (callbacks.stop)();
                }
            }
            Event::StdinReceived { byte } => {
                if let Some(callbacks) = self.ctx.callbacks() {
                    (callbacks.stdin)(byte);
                }
            }
            _ => {}
        }

        self.watchdog.refresh();
    }

    /// Dispatch an expired tick, or else the next queued event.
    ///
    /// The tick goes first so a steady stream of events cannot hold it
    /// back. Returns `false` when there was nothing to do.
    pub fn poll(
        &mut self,
        now: Instant,
    ) -> bool {
        if self.timer.is_expired(now) {
            self.dispatch(Event::TimerExpired, now);
            true
        } else if let Ok(event) = self.ctx.events().try_receive() {
            self.dispatch(event, now);
            true
        } else {
            false
        }
    }

    /// Run forever, sleeping until the next event or tick.
    pub async fn run(&mut self) -> ! {
        if self.state == SupervisorState::Initializing {
            self.init(Instant::now());
        }
        let events = self.ctx.events();
        loop {
            let event = match self.timer.deadline() {
                Some(_) if self.timer.is_expired(Instant::now()) => Event::TimerExpired,
                Some(deadline) => with_deadline(deadline, events.receive())
                    .await
                    .unwrap_or(Event::TimerExpired),
                None => events.receive().await,
            };
            self.dispatch(event, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::controllers::hub::MotorHub;
    use core::cell::RefCell;

    #[derive(Default)]
    struct CountingDog {
        timeout: Option<Duration>,
        refreshed: u32,
    }

    impl Watchdog for CountingDog {
        fn configure(
            &mut self,
            timeout: Duration,
        ) {
            self.timeout = Some(timeout);
        }

        fn refresh(&mut self) {
            self.refreshed += 1;
        }
    }

    #[test]
    fn test_timer_rearms_relative_to_handling() {
        let events = EventChannel::new();
        let motors: SharedMotors = Mutex::new(RefCell::new(MotorHub::new()));
        let ctx = SystemContext::new(&events, &motors);
        let mut sup = Supervisor::new(&ctx, (), CountingDog::default(), SupervisorConfig::default());
        sup.init(Instant::from_millis(0));
        assert_eq!(sup.watchdog().timeout, Some(Duration::from_millis(3000)));
        assert!(!sup.poll(Instant::from_millis(49)));
        assert!(sup.poll(Instant::from_millis(70)));
        assert_eq!(sup.timer().deadline(), Some(Instant::from_millis(120)));
        assert_eq!(sup.watchdog().refreshed, 1);
    }

    #[test]
    fn test_early_timer_event_is_ignored_but_refreshes() {
        let events = EventChannel::new();
        let motors: SharedMotors = Mutex::new(RefCell::new(MotorHub::new()));
        let ctx = SystemContext::new(&events, &motors);
        let mut sup = Supervisor::new(&ctx, (), CountingDog::default(), SupervisorConfig::default());
        sup.init(Instant::from_millis(0));
        sup.dispatch(Event::TimerExpired, Instant::from_millis(10));
        assert_eq!(sup.timer().deadline(), Some(Instant::from_millis(50)));
        assert_eq!(sup.watchdog().refreshed, 1);
    }
}
