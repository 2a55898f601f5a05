#![allow(dead_code)]

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use hub_core::utils::{
    controllers::{
        actuator::PORT_COUNT,
        hub::{with_motors, MotorHub, SharedMotors},
        servo::Encoder,
        DeviceType, Direction, Passivity, Port,
    },
    error::{HubError, HubResult},
    system::poll::{poll_fn, EventPoll},
};

/// Control loop period used by the simulation.
pub const TICK: Duration = Duration::from_millis(5);

/// Upper bound on simulated periods per test.
pub const MAX_TICKS: u32 = 20_000;

/// Motors whose speed follows the applied voltage exactly.
#[derive(Default)]
pub struct SimPlant {
    angles: [f32; PORT_COUNT],
    /// Encoder on this port fails once it has been read this many times.
    fail_after: Option<(Port, u32)>,
    reads: u32,
}

impl SimPlant {
    pub fn set_angle(
        &mut self,
        port: Port,
        angle: f32,
    ) {
        self.angles[port.index()] = angle;
    }

    pub fn fail_after(
        &mut self,
        port: Port,
        reads: u32,
    ) {
        self.fail_after = Some((port, reads));
        self.reads = 0;
    }

    /// Advance every powered motor by `dt` seconds.
    pub fn step(
        &mut self,
        hub: &MotorHub,
        dt: f32,
    ) {
        for port in Port::all() {
            let Ok(actuator) = hub.actuator(port) else {
                continue;
            };
            if let Passivity::Duty(v) = actuator.output() {
                let limits = actuator.device().limits();
                let k = limits.rate_limit as f32 / limits.max_voltage as f32;
                self.angles[port.index()] += v as f32 * k * dt;
            }
        }
    }
}

impl Encoder for SimPlant {
    fn angle(
        &mut self,
        port: Port,
    ) -> HubResult<i32> {
        if let Some((p, after)) = self.fail_after {
            if p == port {
                if self.reads >= after {
                    return Err(HubError::Io);
                }
                self.reads += 1;
            }
        }
        Ok(self.angles[port.index()].round() as i32)
    }
}

/// A hub, its plant and a simulated clock.
pub struct Sim {
    pub motors: SharedMotors,
    pub plant: RefCell<SimPlant>,
    pub now: Cell<Instant>,
    pub ticks: Cell<u32>,
}

impl Sim {
    pub fn new() -> Self {
        Self {
            motors: Mutex::new(RefCell::new(MotorHub::new())),
            plant: RefCell::new(SimPlant::default()),
            now: Cell::new(Instant::from_millis(0)),
            ticks: Cell::new(0),
        }
    }

    /// Two SPIKE medium motors on A (left) and B (right) as a drivebase.
    pub fn with_drivebase() -> Self {
        let sim = Self::new();
        sim.setup_servo(Port::A, DeviceType::SpikeMMotor, Direction::Counterclockwise)
            .unwrap();
        sim.setup_servo(Port::B, DeviceType::SpikeMMotor, Direction::Clockwise)
            .unwrap();
        sim.hub(|hub| hub.setup_drivebase(Port::A, Port::B, 56.0, 114.0))
            .unwrap();
        sim
    }

    pub fn setup_servo(
        &self,
        port: Port,
        device: DeviceType,
        direction: Direction,
    ) -> HubResult {
        let mut plant = self.plant.borrow_mut();
        with_motors(&self.motors, |hub| {
            hub.setup_servo(port, device, direction, &mut *plant)
        })
    }

    pub fn hub<R>(
        &self,
        f: impl FnOnce(&mut MotorHub) -> R,
    ) -> R {
        with_motors(&self.motors, f)
    }

    /// One control period followed by the plant response.
    pub fn tick(&self) {
        let now = self.now.get() + TICK;
        self.now.set(now);
        self.ticks.set(self.ticks.get() + 1);
        assert!(self.ticks.get() < MAX_TICKS, "simulation did not settle");
        let mut plant = self.plant.borrow_mut();
        with_motors(&self.motors, |hub| {
            hub.control_tick(now, &mut *plant);
            plant.step(hub, 0.005);
        });
    }

    pub fn run(
        &self,
        ticks: u32,
    ) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Yield hook that advances the simulation by one tick per call.
    pub fn hook(&self) -> impl EventPoll + '_ {
        poll_fn(move || self.tick())
    }
}
