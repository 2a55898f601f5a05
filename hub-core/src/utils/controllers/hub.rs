//! Motor arena, ownership and the control loop.
//!
//! [`MotorHub`] holds one actuator and one optional servo per port, the
//! single drivebase slot and the status registry. The foreground task and
//! the control-loop tick share it through [`SharedMotors`]; every access is
//! one short `lock` closure.
//!
//! Claims form a chain: a servo claims the actuator on its port, a drivebase
//! claims two servos. User-level calls on a claimed device stop the owner
//! first (cascade-stop). System-level calls, used by the owners' own control
//! loops, skip that check.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_time::Instant;

use crate::utils::{
    controllers::{
        actuator::{Actuator, DeviceType, Direction, Owner, Passivity, Port, PORT_COUNT},
        drivebase::{DriveBase, DriveBaseMut, DriveMode, WheelSample},
        registry::{CompletionHandle, Device, Status, StatusRegistry},
        servo::{Encoder, Servo},
    },
    error::{Completion, HubError, HubResult},
    math::kinematics::DifferentialDrive,
    system::poll::EventPoll,
};

/// Motor state shared between the foreground task and the control loop.
pub type SharedMotors = Mutex<CriticalSectionRawMutex, RefCell<MotorHub>>;

/// The hub's motors.
pub static MOTORS: SharedMotors = Mutex::new(RefCell::new(MotorHub::new()));

/// Run `f` on the hub inside one critical section.
pub fn with_motors<R>(
    motors: &SharedMotors,
    f: impl FnOnce(&mut MotorHub) -> R,
) -> R {
    motors.lock(|cell| f(&mut cell.borrow_mut()))
}

pub struct MotorHub {
    pub(crate) actuators: [Option<Actuator>; PORT_COUNT],
    pub(crate) servos: [Option<Servo>; PORT_COUNT],
    pub(crate) drivebase: Option<DriveBase>,
    pub(crate) registry: StatusRegistry,
    /// Time of the last control tick.
    pub(crate) clock: Instant,
}

impl Default for MotorHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorHub {
    pub const fn new() -> Self {
        Self {
            actuators: [const { None }; PORT_COUNT],
            servos: [const { None }; PORT_COUNT],
            drivebase: None,
            registry: StatusRegistry::new(),
            clock: Instant::from_ticks(0),
        }
    }

    pub const fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub const fn clock(&self) -> Instant {
        self.clock
    }

    pub fn actuator(
        &self,
        port: Port,
    ) -> HubResult<&Actuator> {
        self.actuators[port.index()].as_ref().ok_or(HubError::NoDev)
    }

    fn actuator_mut(
        &mut self,
        port: Port,
    ) -> HubResult<&mut Actuator> {
        self.actuators[port.index()].as_mut().ok_or(HubError::NoDev)
    }

    pub fn servo(
        &self,
        port: Port,
    ) -> HubResult<&Servo> {
        self.servos[port.index()].as_ref().ok_or(HubError::NoDev)
    }

    pub(crate) fn servo_mut(
        &mut self,
        port: Port,
    ) -> HubResult<&mut Servo> {
        self.servos[port.index()].as_mut().ok_or(HubError::NoDev)
    }

    // ---- actuators ----

    /// Set up a plain motor on `port`, reclaiming the slot.
    ///
    /// Any servo or drivebase that used the port is released.
    pub fn setup_actuator(
        &mut self,
        port: Port,
        device: DeviceType,
        direction: Direction,
    ) -> HubResult {
        let mut actuator = Actuator::new(port, device);
        actuator.setup(direction)?;
        self.release_port(port);
        self.actuators[port.index()] = Some(actuator);
        self.registry.claim(Device::Motor(port));
        tracing::info!(port = %port, ?device, ?direction, "actuator set up");
        Ok(())
    }

    /// `(passivity, voltage)` of the motor on `port`.
    pub fn actuator_state(
        &self,
        port: Port,
    ) -> HubResult<(Passivity, i32)> {
        Ok(self.actuator(port)?.get_state())
    }

    /// Signed output for the motor driver on `port`.
    pub fn actuation(
        &self,
        port: Port,
    ) -> HubResult<Passivity> {
        Ok(self.actuator(port)?.output())
    }

    pub fn set_max_voltage(
        &mut self,
        port: Port,
        max_voltage: i32,
    ) -> HubResult {
        self.actuator_mut(port)?.set_max_voltage(max_voltage)
    }

    /// User-level coast.
    pub fn coast(
        &mut self,
        port: Port,
    ) -> HubResult {
        self.take_over(port)?;
        self.actuator_mut(port)?.stop();
        Ok(())
    }

    /// User-level brake.
    pub fn brake(
        &mut self,
        port: Port,
    ) -> HubResult {
        self.take_over(port)?;
        self.actuator_mut(port)?.brake_now();
        Ok(())
    }

    /// User-level constant voltage.
    pub fn set_voltage_passive(
        &mut self,
        port: Port,
        voltage: i32,
    ) -> HubResult {
        self.take_over(port)?;
        self.actuator_mut(port)?.set_voltage(voltage);
        Ok(())
    }

    /// System-level constant voltage; ignores claims.
    pub fn set_voltage(
        &mut self,
        port: Port,
        voltage: i32,
    ) -> HubResult {
        self.actuator_mut(port)?.set_voltage(voltage);
        Ok(())
    }

    /// Stop whatever controller claims the motor on `port`.
    fn take_over(
        &mut self,
        port: Port,
    ) -> HubResult {
        let owner = self.actuator(port)?.claimed_by();
        if let Some(owner) = owner {
            tracing::warn!(port = %port, ?owner, "cascade-stop");
            self.stop_owner(owner)?;
        }
        self.registry.complete(Device::Motor(port), Ok(()));
        Ok(())
    }

    /// Stop an owner, and first anything that owns it in turn.
    ///
    /// Coasts the motors it drives and resolves its registry entry.
    pub(crate) fn stop_owner(
        &mut self,
        owner: Owner,
    ) -> HubResult {
        match owner {
            Owner::DriveBase => {
                let base = self.drivebase.as_mut().ok_or(HubError::NoDev)?;
                base.halt();
                let (left, right) = (base.left(), base.right());
                for port in [left, right] {
                    if let Some(servo) = self.servos[port.index()].as_mut() {
                        servo.halt();
                    }
                    if let Some(actuator) = self.actuators[port.index()].as_mut() {
                        actuator.stop();
                    }
                }
                self.registry.complete(Device::DriveBase, Ok(()));
            }
            Owner::Servo(port) => {
                if let Some(parent) = self.servo(port)?.claimed_by() {
                    self.stop_owner(parent)?;
                }
                self.servo_mut(port)?.halt();
                self.actuator_mut(port)?.stop();
                self.registry.complete(Device::Motor(port), Ok(()));
            }
        }
        Ok(())
    }

    /// Global coast and cancel, bypassing ownership. Slots are kept.
    pub fn stop_all(&mut self) {
        if let Some(base) = self.drivebase.as_mut() {
            base.halt();
        }
        for servo in self.servos.iter_mut().flatten() {
            servo.halt();
        }
        for actuator in self.actuators.iter_mut().flatten() {
            actuator.stop();
        }
        let devices = Port::all()
            .map(Device::Motor)
            .chain(core::iter::once(Device::DriveBase));
        for device in devices {
            if self.registry.status(device) == Some(Status::Pending) {
                self.registry.complete(device, Ok(()));
            }
        }
        tracing::info!("all motors stopped");
    }

    /// Drop the servo and drivebase that use `port`.
    fn release_port(
        &mut self,
        port: Port,
    ) {
        let uses_port = self
            .drivebase
            .as_ref()
            .is_some_and(|b| b.left() == port || b.right() == port);
        if uses_port {
            self.release_drivebase();
        }
        if self.servos[port.index()].take().is_some() {
            tracing::debug!(port = %port, "servo released");
        }
    }

    /// Coast a drivebase's wheels, resolve its entry and drop it.
    fn release_drivebase(&mut self) {
        if self.drivebase.is_none() {
            return;
        }
        if let Err(e) = self.stop_owner(Owner::DriveBase) {
            tracing::warn!(error = e.as_label(), "drivebase stop on release");
        }
        if let Some(base) = self.drivebase.take() {
            for port in [base.left(), base.right()] {
                if let Some(servo) = self.servos[port.index()].as_mut() {
                    servo.release();
                }
            }
            self.registry.release(Device::DriveBase);
            tracing::debug!("drivebase released");
        }
    }

    // ---- servos ----

    /// Set up a servo on `port`, reading the initial angle from `encoder`.
    ///
    /// The user angle starts at zero.
    pub fn setup_servo<E: Encoder>(
        &mut self,
        port: Port,
        device: DeviceType,
        direction: Direction,
        encoder: &mut E,
    ) -> HubResult {
        let mut servo = Servo::new(port, device, direction, device.max_voltage())?;
        let raw = encoder.angle(port)?;
        self.setup_actuator(port, device, direction)?;
        servo.sample(self.clock, raw);
        servo.reset_angle(0.0)?;
        self.actuator_mut(port)?.claim(Owner::Servo(port));
        self.servos[port.index()] = Some(servo);
        tracing::info!(port = %port, "servo set up");
        Ok(())
    }

    /// Stop the servo's own parent, if any, before a direct servo command.
    fn servo_take_over(
        &mut self,
        port: Port,
    ) -> HubResult {
        if let Some(parent) = self.servo(port)?.claimed_by() {
            tracing::warn!(port = %port, ?parent, "cascade-stop");
            self.stop_owner(parent)?;
        }
        Ok(())
    }

    /// Run at `rate` deg/s until stopped.
    pub fn servo_run(
        &mut self,
        port: Port,
        rate: f32,
    ) -> HubResult {
        self.servo_take_over(port)?;
        self.servo_mut(port)?.run(rate)?;
        self.registry.issue(Device::Motor(port)).map(|_| ())
    }

    /// Move to `target` deg at `rate` deg/s.
    pub fn servo_run_target(
        &mut self,
        port: Port,
        rate: i32,
        target: f32,
    ) -> HubResult<CompletionHandle> {
        self.servo_take_over(port)?;
        let now = self.clock;
        self.servo_mut(port)?.run_target(now, rate, target)?;
        tracing::debug!(port = %port, rate, target, "servo run_target");
        self.registry.issue(Device::Motor(port))
    }

    /// Coast and cancel the servo on `port`.
    pub fn servo_stop(
        &mut self,
        port: Port,
    ) -> HubResult {
        self.stop_owner(Owner::Servo(port))
    }

    pub fn servo_angle(
        &self,
        port: Port,
    ) -> HubResult<f32> {
        Ok(self.servo(port)?.angle())
    }

    pub fn servo_reset_angle(
        &mut self,
        port: Port,
        angle: f32,
    ) -> HubResult {
        self.servo_mut(port)?.reset_angle(angle)
    }

    // ---- drivebase ----

    /// Combine the servos on `left` and `right` into the drivebase.
    ///
    /// Replaces any previous drivebase.
    pub fn setup_drivebase(
        &mut self,
        left: Port,
        right: Port,
        wheel_diameter: f32,
        axle_track: f32,
    ) -> HubResult {
        if !cfg!(feature = "drivebase") {
            return Err(HubError::NotSupported);
        }
        if left == right || !DifferentialDrive::is_valid(wheel_diameter, axle_track) {
            return Err(HubError::InvalidArg);
        }
        let left_settings = *self.servo(left)?.settings();
        let right_settings = *self.servo(right)?.settings();

        self.release_drivebase();
        for port in [left, right] {
            let servo = self.servo_mut(port)?;
            servo.halt();
            servo.claim(Owner::DriveBase);
        }
        let geometry = DifferentialDrive::new(wheel_diameter, axle_track);
        self.drivebase = Some(DriveBase::new(
            left,
            right,
            geometry,
            &left_settings,
            &right_settings,
        ));
        self.registry.claim(Device::DriveBase);
        tracing::info!(left = %left, right = %right, wheel_diameter, axle_track, "drivebase set up");
        Ok(())
    }

    pub fn drivebase(&mut self) -> HubResult<DriveBaseMut<'_>> {
        if self.drivebase.is_none() {
            return Err(HubError::NoDev);
        }
        Ok(DriveBaseMut::new(self))
    }

    pub fn drivebase_ref(&self) -> Option<&DriveBase> {
        self.drivebase.as_ref()
    }

    pub(crate) fn wheel_sample(
        &self,
        left: Port,
        right: Port,
    ) -> HubResult<WheelSample> {
        wheel_sample(&self.servos, left, right)
    }

    // ---- control loop ----

    /// Whether the controllers behind `device` all reached their targets.
    pub fn controllers_done(
        &self,
        device: Device,
    ) -> bool {
        match device {
            Device::Motor(port) => self
                .servos[port.index()]
                .as_ref()
                .is_some_and(|s| s.control().is_done()),
            Device::DriveBase => self.drivebase.as_ref().is_some_and(DriveBase::is_done),
        }
    }

    /// One control-loop period: sample encoders, run the servo and
    /// drivebase controllers and detect completion.
    pub fn control_tick<E: Encoder>(
        &mut self,
        now: Instant,
        encoder: &mut E,
    ) {
        self.clock = now;

        for port in Port::all() {
            if self.servos[port.index()].is_none() {
                continue;
            }
            match encoder.angle(port) {
                Ok(raw) => {
                    if let Some(servo) = self.servos[port.index()].as_mut() {
                        servo.sample(now, raw);
                    }
                }
                Err(e) => self.fault(port, e),
            }
        }

        // Wheels of a passive drivebase run their own servo commands.
        let base_active = self
            .drivebase
            .as_ref()
            .is_some_and(|b| b.mode() != DriveMode::Passive);
        for port in Port::all() {
            let i = port.index();
            let (Some(servo), Some(actuator)) =
                (self.servos[i].as_mut(), self.actuators[i].as_mut())
            else {
                continue;
            };
            if base_active && servo.claimed_by().is_some() {
                continue;
            }
            if let Some(voltage) = servo.update(now) {
                actuator.set_voltage(voltage);
            }
            let device = Device::Motor(port);
            if servo.control().is_done() && self.registry.status(device) == Some(Status::Pending) {
                self.registry.complete(device, Ok(()));
                tracing::debug!(port = %port, "servo done");
            }
        }

        let Some(base) = self.drivebase.as_mut() else {
            return;
        };
        let (left, right) = (base.left(), base.right());
        let Ok(wheels) = wheel_sample(&self.servos, left, right) else {
            return;
        };
        if let Some((l, r)) = base.update(now, &wheels) {
            for (port, voltage) in [(left, l), (right, r)] {
                if let Some(actuator) = self.actuators[port.index()].as_mut() {
                    actuator.set_voltage(voltage);
                }
            }
        }
        if base.is_done() && self.registry.status(Device::DriveBase) == Some(Status::Pending) {
            self.registry.complete(Device::DriveBase, Ok(()));
            tracing::debug!("drivebase done");
        }
    }

    /// Encoder failure on `port`: coast, cancel and report the error.
    fn fault(
        &mut self,
        port: Port,
        error: HubError,
    ) {
        tracing::error!(port = %port, error = error.as_label(), "encoder fault");
        let uses_port = self
            .drivebase
            .as_ref()
            .is_some_and(|b| b.left() == port || b.right() == port);
        // Stopping the servo also stops its drivebase, resolving both as
        // success; the error overwrites that.
        if let Err(e) = self.stop_owner(Owner::Servo(port)) {
            tracing::warn!(port = %port, error = e.as_label(), "stop after fault");
        }
        self.registry.complete(Device::Motor(port), Err(error));
        if uses_port {
            self.registry.complete(Device::DriveBase, Err(error));
        }
    }
}

fn wheel_sample(
    servos: &[Option<Servo>; PORT_COUNT],
    left: Port,
    right: Port,
) -> HubResult<WheelSample> {
    let l = servos[left.index()].as_ref().ok_or(HubError::NoDev)?;
    let r = servos[right.index()].as_ref().ok_or(HubError::NoDev)?;
    Ok(WheelSample {
        left_angle: l.raw_angle(),
        right_angle: r.raw_angle(),
        left_rate: l.rate(),
        right_rate: r.rate(),
    })
}

/// Block cooperatively until the command behind `handle` finishes.
///
/// Loops while the registry entry is pending and the device's controllers
/// have not all reached their targets, calling `hook` between polls. A
/// terminal error is returned unchanged. There is no timeout.
pub fn wait_for_completion<P: EventPoll>(
    motors: &SharedMotors,
    handle: CompletionHandle,
    mut hook: P,
) -> HubResult {
    loop {
        let (completion, done) = with_motors(motors, |hub| {
            (
                handle.poll(&hub.registry),
                hub.controllers_done(handle.device()),
            )
        });
        match completion {
            Completion::Done(result) => return result,
            Completion::Pending if done => return Ok(()),
            Completion::Pending => hook.poll_events(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::controllers::servo::ServoMode;

    struct Fixed;

    impl Encoder for Fixed {
        fn angle(
            &mut self,
            _port: Port,
        ) -> HubResult<i32> {
            Ok(0)
        }
    }

    #[test]
    fn test_setup_actuator_claims_registry() {
        let mut hub = MotorHub::new();
        hub.setup_actuator(Port::A, DeviceType::DcMotor, Direction::Clockwise)
            .unwrap();
        assert_eq!(
            hub.registry().status(Device::Motor(Port::A)),
            Some(Status::Pending)
        );
        assert_eq!(hub.actuator_state(Port::A), Ok((Passivity::Coast, 0)));
        assert_eq!(hub.actuator_state(Port::B), Err(HubError::NoDev));
    }

    #[test]
    fn test_coast_cascades_through_servo() {
        let mut hub = MotorHub::new();
        hub.setup_servo(Port::C, DeviceType::SpikeMMotor, Direction::Clockwise, &mut Fixed)
            .unwrap();
        hub.servo_run(Port::C, 300.0).unwrap();
        hub.control_tick(Instant::from_millis(5), &mut Fixed);
        assert!(matches!(hub.actuator_state(Port::C), Ok((Passivity::Duty(_), _))));

        hub.brake(Port::C).unwrap();
        assert_eq!(hub.actuator_state(Port::C), Ok((Passivity::Brake, 0)));
        hub.control_tick(Instant::from_millis(10), &mut Fixed);
        assert_eq!(hub.actuator_state(Port::C), Ok((Passivity::Brake, 0)));
    }

    #[test]
    fn test_system_voltage_ignores_claim() {
        let mut hub = MotorHub::new();
        hub.setup_servo(Port::A, DeviceType::SpikeLMotor, Direction::Clockwise, &mut Fixed)
            .unwrap();
        hub.servo_run(Port::A, 100.0).unwrap();
        hub.set_voltage(Port::A, 1234).unwrap();
        assert_eq!(hub.servo(Port::A).unwrap().mode(), ServoMode::Rate(100.0));
        assert_eq!(hub.actuator_state(Port::A), Ok((Passivity::Duty(1234), 1234)));
    }

    #[test]
    fn test_wait_returns_once_controllers_are_done() {
        let motors: SharedMotors = Mutex::new(RefCell::new(MotorHub::new()));
        let handle = with_motors(&motors, |hub| {
            hub.setup_servo(Port::D, DeviceType::SpikeMMotor, Direction::Clockwise, &mut Fixed)
                .unwrap();
            hub.servo_run_target(Port::D, 500, 0.0).unwrap();
            for ms in (5..=100).step_by(5) {
                hub.control_tick(Instant::from_millis(ms), &mut Fixed);
            }
            assert!(hub.controllers_done(Device::Motor(Port::D)));
            // A fresh command entry the tick has not resolved yet.
            hub.registry.issue(Device::Motor(Port::D)).unwrap()
        });
        assert_eq!(
            with_motors(&motors, |hub| handle.poll(hub.registry())),
            Completion::Pending
        );
        let hook = crate::utils::system::poll::poll_fn(|| panic!("waited on done controllers"));
        assert_eq!(wait_for_completion(&motors, handle, hook), Ok(()));
    }
}
