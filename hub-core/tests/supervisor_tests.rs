use core::cell::{Cell, RefCell};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex as StdMutex,
};

use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use hub_core::utils::{
    config::SupervisorConfig,
    controllers::{
        hub::{with_motors, MotorHub, SharedMotors},
        DeviceType, Direction, Passivity, Port,
    },
    system::{
        poll::{Cpu, EventPoll, IdleHook},
        status::{post, Event, EventChannel, StatusFlag, SystemStatus},
        supervisor::{
            Supervisor, SupervisorState, SystemContext, SystemServices, UserProgramCallbacks,
            Watchdog,
        },
    },
};

#[derive(Default)]
struct Recorder {
    seen: Vec<Event>,
    battery_polls: u32,
    hmi_polls: u32,
    supervisor_polls: u32,
    inits: u32,
}

impl SystemServices for Recorder {
    fn battery_init(&mut self) {
        self.inits += 1;
    }

    fn bluetooth_init(&mut self) {
        self.inits += 1;
    }

    fn hmi_init(&mut self) {
        self.inits += 1;
    }

    fn battery_poll(
        &mut self,
        _status: &SystemStatus<'_>,
    ) {
        self.battery_polls += 1;
    }

    fn hmi_poll(
        &mut self,
        _status: &SystemStatus<'_>,
    ) {
        self.hmi_polls += 1;
    }

    fn supervisor_poll(
        &mut self,
        _status: &SystemStatus<'_>,
    ) {
        self.supervisor_polls += 1;
    }

    fn hmi_handle_event(
        &mut self,
        event: &Event,
    ) {
        self.seen.push(*event);
    }
}

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

fn motors() -> SharedMotors {
    Mutex::new(RefCell::new(MotorHub::new()))
}

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

/// Dispatch everything queued at `now`.
fn drain<S: SystemServices, W: Watchdog>(
    sup: &mut Supervisor<'_, '_, S, W>,
    now: Instant,
) -> usize {
    let mut n = 0;
    while sup.poll(now) {
        n += 1;
    }
    n
}

#[test]
fn test_init_configures_watchdog_and_services() {
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let config = SupervisorConfig {
        tick_period_ms: 20,
        watchdog_timeout_ms: 1000,
    };
    let mut sup = Supervisor::new(&ctx, Recorder::default(), CountingDog::default(), config);
    assert_eq!(sup.state(), SupervisorState::Initializing);
    sup.init(at(100));
    assert_eq!(sup.state(), SupervisorState::Running);
    assert_eq!(sup.services().inits, 3);
    assert_eq!(sup.watchdog().timeout, Some(Duration::from_millis(1000)));
    assert_eq!(sup.timer().deadline(), Some(at(120)));
}

#[test]
fn test_power_button_runs_stop_callback_once_per_press() {
    let stops = AtomicUsize::new(0);
    let stop = || {
        stops.fetch_add(1, Ordering::SeqCst);
    };
    let stdin = |_: u8| {};
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(
        &ctx,
        Recorder::default(),
        CountingDog::default(),
        SupervisorConfig::default(),
    );
    sup.init(at(0));
    ctx.prepare_user_program(Some(UserProgramCallbacks {
        stop: &stop,
        stdin: &stdin,
    }));
    assert!(ctx.status().test(StatusFlag::UserProgramRunning));

    ctx.status().set(StatusFlag::PowerButtonPressed);
    // Already set: no second event.
    ctx.status().set(StatusFlag::PowerButtonPressed);
    drain(&mut sup, at(10));
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    ctx.status().clear(StatusFlag::PowerButtonPressed);
    ctx.status().set(StatusFlag::PowerButtonPressed);
    drain(&mut sup, at(20));
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

#[test]
fn test_power_button_without_callbacks_only_refreshes() {
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(
        &ctx,
        Recorder::default(),
        CountingDog::default(),
        SupervisorConfig::default(),
    );
    sup.init(at(0));
    ctx.prepare_user_program(None);
    ctx.status().set(StatusFlag::PowerButtonPressed);
    assert_eq!(drain(&mut sup, at(10)), 2);
    assert_eq!(sup.watchdog().refreshed, 2);
    assert_eq!(
        sup.services().seen,
        vec![
            Event::StatusSet {
                flag: StatusFlag::UserProgramRunning
            },
            Event::StatusSet {
                flag: StatusFlag::PowerButtonPressed
            },
        ]
    );
}

#[test]
fn test_stdin_bytes_reach_callback_in_order() {
    let received = StdMutex::new(Vec::new());
    let stop = || {};
    let stdin = |b: u8| received.lock().unwrap().push(b);
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(&ctx, (), CountingDog::default(), SupervisorConfig::default());
    sup.init(at(0));

    // Dropped: no program registered yet.
    post(&events, Event::StdinReceived { byte: b'x' });
    drain(&mut sup, at(1));

    ctx.prepare_user_program(Some(UserProgramCallbacks {
        stop: &stop,
        stdin: &stdin,
    }));
    for &byte in b"go\n" {
        post(&events, Event::StdinReceived { byte });
    }
    drain(&mut sup, at(2));
    assert_eq!(*received.lock().unwrap(), b"go\n".to_vec());
}

#[test]
fn test_unprepare_stops_motors_and_callbacks() {
    let stops = AtomicUsize::new(0);
    let stop = || {
        stops.fetch_add(1, Ordering::SeqCst);
    };
    let stdin = |_: u8| {};
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(&ctx, (), CountingDog::default(), SupervisorConfig::default());
    sup.init(at(0));

    with_motors(&motors, |hub| {
        hub.setup_actuator(Port::D, DeviceType::TrainMotor, Direction::Clockwise)
            .unwrap();
        hub.set_voltage_passive(Port::D, 5000).unwrap();
    });
    ctx.prepare_user_program(Some(UserProgramCallbacks {
        stop: &stop,
        stdin: &stdin,
    }));
    ctx.unprepare_user_program();
    assert!(!ctx.status().test(StatusFlag::UserProgramRunning));
    assert_eq!(
        with_motors(&motors, |hub| hub.actuator_state(Port::D)),
        Ok((Passivity::Coast, 0))
    );

    ctx.status().set(StatusFlag::PowerButtonPressed);
    drain(&mut sup, at(5));
    assert_eq!(stops.load(Ordering::SeqCst), 0);
}

#[test]
fn test_services_polled_only_on_tick() {
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(
        &ctx,
        Recorder::default(),
        CountingDog::default(),
        SupervisorConfig::default(),
    );
    sup.init(at(0));

    post(&events, Event::IoReady);
    post(&events, Event::StdinReceived { byte: 7 });
    assert_eq!(drain(&mut sup, at(30)), 2);
    assert_eq!(sup.services().battery_polls, 0);

    // An expired tick goes before events queued after its deadline.
    post(&events, Event::IoReady);
    assert!(sup.poll(at(55)));
    assert_eq!(sup.services().hmi_polls, 1);
    assert!(sup.poll(at(55)));
    assert!(!sup.poll(at(56)));

    let services = sup.services();
    assert_eq!(
        (services.battery_polls, services.hmi_polls, services.supervisor_polls),
        (1, 1, 1)
    );
    assert_eq!(
        services.seen,
        vec![
            Event::IoReady,
            Event::StdinReceived { byte: 7 },
            Event::TimerExpired,
            Event::IoReady,
        ]
    );
    assert_eq!(sup.timer().deadline(), Some(at(105)));
    assert_eq!(sup.watchdog().refreshed, 4);
}

#[test]
fn test_steady_events_do_not_starve_tick() {
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(
        &ctx,
        Recorder::default(),
        CountingDog::default(),
        SupervisorConfig::default(),
    );
    sup.init(at(0));

    for ms in (10..=1000).step_by(10) {
        post(&events, Event::StdinReceived { byte: b'x' });
        assert!(sup.poll(at(ms)));
    }
    assert_eq!(sup.services().supervisor_polls, 20);
    assert_eq!(sup.services().battery_polls, 20);
}

#[test]
fn test_late_tick_does_not_double_fire() {
    let events = EventChannel::new();
    let motors = motors();
    let ctx = SystemContext::new(&events, &motors);
    let mut sup = Supervisor::new(
        &ctx,
        Recorder::default(),
        CountingDog::default(),
        SupervisorConfig::default(),
    );
    sup.init(at(0));
    assert_eq!(drain(&mut sup, at(500)), 1);
    assert_eq!(sup.services().supervisor_polls, 1);
    assert_eq!(sup.timer().deadline(), Some(at(550)));
}

struct FakeCpu {
    enabled: bool,
    waits: Cell<u32>,
}

impl FakeCpu {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            waits: Cell::new(0),
        }
    }
}

impl Cpu for &FakeCpu {
    fn interrupts_enabled(&self) -> bool {
        self.enabled
    }

    fn wait_for_interrupt(&self) {
        self.waits.set(self.waits.get() + 1);
    }
}

#[test]
fn test_idle_hook_sleeps_only_on_empty_queue() {
    let events = EventChannel::new();
    let cpu = FakeCpu::new(true);
    let mut hook = IdleHook::new(&events, &cpu);
    hook.poll_events();
    assert_eq!(cpu.waits.get(), 1);

    post(&events, Event::IoReady);
    hook.poll_events();
    assert_eq!(cpu.waits.get(), 1);
}

#[test]
fn test_idle_hook_spins_with_interrupts_masked() {
    let events = EventChannel::new();
    let cpu = FakeCpu::new(false);
    let mut hook = IdleHook::new(&events, &cpu);
    for _ in 0..3 {
        hook.poll_events();
    }
    assert_eq!(cpu.waits.get(), 0);
}
