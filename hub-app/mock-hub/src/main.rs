mod plant;

use core::{cell::RefCell, fmt::Write as _};
use std::{
    io::{Read, Write as _},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_time::{Duration, Instant, Ticker, Timer};
use hub_core::{
    mk_static,
    utils::{
        config::{HubConfig, SupervisorConfig},
        connection::{memory::MemoryTransport, StdioMux, Transport},
        controllers::{wait_for_completion, with_motors, DeviceType, Direction, Port, MOTORS},
        system::{
            poll::{poll_fn, EventPoll},
            status::{post, Event, StatusFlag, SystemStatus, EVENTS},
            supervisor::{Supervisor, SystemContext, SystemServices, UserProgramCallbacks, Watchdog},
        },
        HubError, HubResult,
    },
};
use plant::Plant;
use static_cell::StaticCell;
use tracing::{error, info, trace, warn};

type SharedPlant = Mutex<CriticalSectionRawMutex, RefCell<Plant>>;

/// Below this the battery warning flag is raised.
const LOW_BATTERY_MV: i32 = 6800;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON configuration file; missing fields keep their defaults
    #[clap(long)]
    config: Option<PathBuf>,
    /// Wheel diameter override (mm)
    #[clap(long)]
    wheel_diameter: Option<f32>,
    /// Axle track override (mm)
    #[clap(long)]
    axle_track: Option<f32>,
    /// Distance the demo program drives (mm)
    #[clap(long, default_value_t = 300.0, allow_hyphen_values = true)]
    distance: f32,
    /// Angle the demo program turns (deg)
    #[clap(long, default_value_t = 90.0, allow_hyphen_values = true)]
    angle: f32,
    /// Simulated battery voltage (mV)
    #[clap(long, default_value_t = 8000)]
    battery_mv: i32,
    /// Press the power button this many milliseconds after start
    #[clap(long)]
    press_button_ms: Option<u64>,
}

static CONTEXT: SystemContext<'static> = SystemContext::new(&EVENTS, &MOTORS);

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

fn on_stop() {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    with_motors(&MOTORS, |hub| hub.stop_all());
}

fn on_stdin(byte: u8) {
    info!(byte = %char::from(byte).escape_default(), "stdin");
}

static CALLBACKS: UserProgramCallbacks<'static> = UserProgramCallbacks {
    stop: &on_stop,
    stdin: &on_stdin,
};

/// Battery and HMI stand-ins.
struct HostServices {
    battery_mv: i32,
}

impl SystemServices for HostServices {
    fn battery_init(&mut self) {
        info!(battery_mv = self.battery_mv, "battery ready");
    }

    fn battery_poll(
        &mut self,
        status: &SystemStatus<'_>,
    ) {
        if self.battery_mv < LOW_BATTERY_MV {
            status.set(StatusFlag::BatteryLowVoltageWarning);
        } else {
            status.clear(StatusFlag::BatteryLowVoltageWarning);
        }
    }

    fn hmi_handle_event(
        &mut self,
        event: &Event,
    ) {
        trace!(?event, "hmi");
    }
}

/// Reports refreshes that arrive later than the timeout.
struct LogWatchdog {
    timeout: Duration,
    last: Option<Instant>,
}

impl LogWatchdog {
    const fn new() -> Self {
        Self {
            timeout: Duration::MAX,
            last: None,
        }
    }
}

impl Watchdog for LogWatchdog {
    fn configure(
        &mut self,
        timeout: Duration,
    ) {
        self.timeout = timeout;
        info!(timeout_ms = timeout.as_millis(), "watchdog armed");
    }

    fn refresh(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last {
            let gap = now.duration_since(last);
            if gap > self.timeout {
                error!(gap_ms = gap.as_millis(), "watchdog would have reset the hub");
            }
        }
        self.last = Some(now);
    }
}

/// USB link backed by the process stdout.
struct Console;

impl Transport for Console {
    fn transmit(
        &mut self,
        data: &[u8],
    ) -> HubResult<usize> {
        std::io::stdout().write(data).map_err(|_| HubError::Io)
    }

    fn transmit_is_idle(&self) -> bool {
        std::io::stdout().flush().is_ok()
    }

    fn receive(
        &mut self,
        _buf: &mut [u8],
    ) -> HubResult<usize> {
        Err(HubError::Again)
    }

    fn receive_available(&self) -> bool {
        false
    }
}

#[embassy_executor::task]
async fn supervisor_task(services: HostServices, config: SupervisorConfig) -> ! {
    let mut supervisor = Supervisor::new(&CONTEXT, services, LogWatchdog::new(), config);
    supervisor.run().await
}

#[embassy_executor::task]
async fn control_task(plant: &'static SharedPlant, period: Duration) -> ! {
    let dt = period.as_micros() as f32 / 1_000_000.0;
    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        let now = Instant::now();
        with_motors(&MOTORS, |hub| {
            plant.lock(|p| {
                let mut p = p.borrow_mut();
                hub.control_tick(now, &mut *p);
                p.step(hub, dt);
            })
        });
    }
}

#[embassy_executor::task]
async fn button_task(after: Duration) {
    Timer::after(after).await;
    info!("power button pressed");
    CONTEXT.status().set(StatusFlag::PowerButtonPressed);
    Timer::after(Duration::from_millis(100)).await;
    CONTEXT.status().clear(StatusFlag::PowerButtonPressed);
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner, opts: Opts, config: HubConfig) {
    let plant: &'static SharedPlant = mk_static!(
        SharedPlant,
        Mutex::new(RefCell::new(Plant::new(opts.battery_mv)))
    );
    let services = HostServices {
        battery_mv: opts.battery_mv,
    };
    spawner.spawn(supervisor_task(services, config.supervisor)).unwrap();
    spawner
        .spawn(control_task(plant, config.control.loop_period()))
        .unwrap();
    if let Some(ms) = opts.press_button_ms {
        spawner.spawn(button_task(Duration::from_millis(ms))).unwrap();
    }

    // Commands take the clock of the last control tick.
    Timer::after(config.control.loop_period() * 2).await;

    let (distance, angle) = (opts.distance, opts.angle);
    thread::spawn(move || {
        let code = match user_program(plant, &config, distance, angle) {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "user program failed");
                1
            }
        };
        std::process::exit(code);
    });
}

fn user_program(
    plant: &'static SharedPlant,
    config: &HubConfig,
    distance: f32,
    angle: f32,
) -> HubResult {
    CONTEXT.prepare_user_program(Some(CALLBACKS));
    let result = drive_demo(plant, config, distance, angle);
    CONTEXT.unprepare_user_program();
    result
}

fn drive_demo(
    plant: &'static SharedPlant,
    config: &HubConfig,
    distance: f32,
    angle: f32,
) -> HubResult {
    let geometry = config.geometry;
    with_motors(&MOTORS, |hub| {
        plant.lock(|p| {
            let mut p = p.borrow_mut();
            hub.setup_servo(Port::A, DeviceType::SpikeMMotor, Direction::Counterclockwise, &mut *p)?;
            hub.setup_servo(Port::B, DeviceType::SpikeMMotor, Direction::Clockwise, &mut *p)
        })?;
        hub.setup_drivebase(Port::A, Port::B, geometry.wheel_diameter, geometry.axle_track)
    })?;

    let sleep = || thread::sleep(std::time::Duration::from_millis(1));
    let mut hook = poll_fn(sleep);
    let mut stdout = StdioMux::new(
        MemoryTransport::<4096, 64>::new(),
        Some(Console),
        poll_fn(sleep),
    );

    let handle = with_motors(&MOTORS, |hub| hub.drivebase()?.straight(distance))?;
    wait_for_completion(&MOTORS, handle, &mut hook)?;
    report(&mut stdout, "straight")?;

    if !STOP_REQUESTED.load(Ordering::SeqCst) {
        let handle = with_motors(&MOTORS, |hub| hub.drivebase()?.turn(angle))?;
        wait_for_completion(&MOTORS, handle, &mut hook)?;
        report(&mut stdout, "turn")?;
    } else {
        warn!("stopped by power button");
    }

    stdout.flush();
    info!(
        queued = stdout.bluetooth().sent_len(),
        "bytes waiting for a bluetooth host"
    );
    Ok(())
}

fn report<B: Transport, U: Transport, P: EventPoll>(
    out: &mut StdioMux<B, U, P>,
    label: &str,
) -> HubResult {
    let state = with_motors(&MOTORS, |hub| hub.drivebase()?.state())?;
    writeln!(
        out,
        "{label}: distance={:.1}mm angle={:.1}deg",
        state.distance, state.angle
    )
    .map_err(|_| HubError::Io)
}

/// Forward host stdin to the supervisor as stdin events.
fn spawn_stdin_reader() {
    thread::spawn(|| {
        for byte in std::io::stdin().bytes() {
            match byte {
                Ok(byte) => post(&EVENTS, Event::StdinReceived { byte }),
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    break;
                }
            }
        }
    });
}

fn load_config(opts: &Opts) -> Result<HubConfig, String> {
    let mut config = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => HubConfig::default(),
    };
    if let Some(d) = opts.wheel_diameter {
        config.geometry.wheel_diameter = d;
    }
    if let Some(t) = opts.axle_track {
        config.geometry.axle_track = t;
    }
    Ok(config)
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opts = Opts::parse();
    let config = match load_config(&opts) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };
    info!(?config, "mock hub starting");
    spawn_stdin_reader();

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner, opts, config)).unwrap();
    });
}
