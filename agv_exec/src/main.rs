//! Main AGV executable entry point.
//!
//! # Architecture
//!
//! The executable runs one thread per long running task:
//!
//!     - ingest: vision and station datagrams into the observation store and supervisor
//!     - ranging: ultrasonic sweeps into the observation store
//!     - report: status frames out to the stations
//!     - watchdog: tag and link staleness, link flags into the supervisor
//!     - tc: operator commands from the control link into the supervisor
//!
//! The main thread runs the navigation cycle, which is the only code to command the drive. The
//! executable only stops on a fatal actuation fault.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{error, info, warn};
use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use structopt::StructOpt;

// Internal
use agv_lib::{
    clock::{Clock, SystemClock},
    ingest::Ingest,
    mission::{vision_link_listener, MissionParams, Supervisor},
    motion::MotionCtrl,
    nav::{NavMgr, NavParams},
    obs_store::ObservationStore,
    params::AgvExecParams,
    ranging::RangingTask,
    sensors::object::{ColourObjectSensor, ColourSample},
    sim::{SimColourSource, SimDrive, SimRanger},
    station_report::{PeerRegistry, StationReporter},
    tc_client::{TcClient, TcClientError},
    tc_processor,
    watchdog::Watchdog,
};
use comms_if::net::{zmq, NetParams};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "agv_exec", about = "AGV navigation executable")]
struct Opts {
    /// Log debug messages
    #[structopt(short, long)]
    debug: bool,

    /// Log every message, including per-cycle traces
    #[structopt(long)]
    trace: bool,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("agv_exec", "sessions").wrap_err("Failed to create the session")?;

    let level = if opts.trace {
        LevelFilter::Trace
    } else if opts.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    info!("AGV Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;
    let exec_params: AgvExecParams =
        util::params::load("agv_exec.toml").wrap_err("Could not load exec params")?;
    let nav_params: NavParams =
        util::params::load("nav.toml").wrap_err("Could not load nav params")?;
    let mission_params: MissionParams =
        util::params::load("mission.toml").wrap_err("Could not load mission params")?;

    info!("Parameters loaded");

    // ---- INITIALISE HARDWARE ----

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    // No drivers are linked in, run against the simulated hardware
    info!("Using simulated drive, ultrasonic array and colour sensor");
    let drive = SimDrive::new(exec_params.sim, clock.clone());
    let ranger = SimRanger::new(exec_params.us_max_range_cm);
    let colour_source = SimColourSource::new(ColourSample {
        lux: 400,
        ..Default::default()
    });
    let colour_handle = colour_source.handle();

    let mut object_sensor =
        ColourObjectSensor::new(colour_source, mission_params.colour, clock.clone());
    object_sensor
        .calibrate()
        .wrap_err("Failed to calibrate the object sensor")?;

    // Simulated container is empty, brighter than the calibration
    colour_handle.set_sample(ColourSample {
        lux: 450,
        ..Default::default()
    });

    info!("Hardware initialisation complete\n");

    // ---- INITIALISE SHARED STATE ----

    let supervisor = Arc::new(Supervisor::new(
        mission_params,
        Box::new(object_sensor),
        clock.clone(),
    ));
    let store = Arc::new(ObservationStore::with_link_listener(
        exec_params.store_params(nav_params.tag_last_seen_timeout_ms),
        vision_link_listener(&supervisor),
    ));

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let mut station_endpoints = Vec::new();
    for e in net_params.station_endpoints.iter() {
        let addr: SocketAddr = e
            .parse()
            .wrap_err_with(|| format!("Invalid station endpoint {:?}", e))?;
        station_endpoints.push(addr);
    }
    let peers = Arc::new(PeerRegistry::new(
        station_endpoints,
        exec_params.peer_timeout_ms,
    ));

    let udp_socket = UdpSocket::bind(&net_params.udp_bind_addr)
        .wrap_err_with(|| format!("Could not bind to {}", net_params.udp_bind_addr))?;
    udp_socket
        .set_read_timeout(Some(Duration::from_millis(exec_params.udp_recv_timeout_ms)))
        .wrap_err("Could not set the datagram socket's read timeout")?;
    let report_socket = udp_socket
        .try_clone()
        .wrap_err("Could not clone the datagram socket")?;
    info!("Datagram socket bound to {}", net_params.udp_bind_addr);

    let zmq_ctx = zmq::Context::new();
    let tc_client =
        TcClient::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise the TcClient")?;
    info!("TcClient initialised");

    info!("Network initialisation complete\n");

    // ---- START TASKS ----

    let run = Arc::new(AtomicBool::new(true));
    let mut handles = Vec::new();

    let ingest = Ingest::new(
        store.clone(),
        supervisor.clone(),
        peers.clone(),
        clock.clone(),
    );
    let stats = ingest.stats();
    handles.push(spawn_task("ingest", &run, move |run| {
        ingest.run(&udp_socket, run)
    })?);

    let mut ranging = RangingTask::new(
        Box::new(ranger),
        store.clone(),
        clock.clone(),
        exec_params.ranging_period_ms,
        exec_params.max_consec_ranging_failures,
    );
    handles.push(spawn_task("ranging", &run, move |run| ranging.run(run))?);

    let reporter = StationReporter::new(
        report_socket,
        supervisor.clone(),
        peers,
        clock.clone(),
        exec_params.report_period_ms,
    );
    handles.push(spawn_task("report", &run, move |run| reporter.run(run))?);

    let mut watchdog = Watchdog::new(
        store.clone(),
        supervisor.clone(),
        clock.clone(),
        tc_client.connected_flag(),
        stats,
        exec_params.watchdog_period_ms,
        exec_params.diagnostics_period_ms,
    );
    handles.push(spawn_task("watchdog", &run, move |run| watchdog.run(run))?);

    let tc_supervisor = supervisor.clone();
    let tc_clock = clock.clone();
    let idle_ms = exec_params.cycle_period_ms;
    handles.push(spawn_task("tc", &run, move |run| {
        tc_loop(&tc_client, &tc_supervisor, &*tc_clock, idle_ms, run)
    })?);

    info!("Tasks started");

    // ---- MAIN LOOP ----

    let mut nav = NavMgr::new(
        nav_params,
        MotionCtrl::new(Box::new(drive)),
        store,
        supervisor,
        clock,
    );

    let cycle_period = Duration::from_millis(exec_params.cycle_period_ms);

    info!("Beginning main loop\n");

    loop {
        let cycle_start_instant = Instant::now();

        if let Err(e) = nav.step() {
            error!("Navigation stopped: {}", e);
            stop_tasks(&run, handles);

            return Err(e).wrap_err("A fatal fault occurred during navigation");
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                (cycle_dur - cycle_period).as_secs_f64()
            ),
        }
    }
}

/// Spawn a named task thread, which is given the shared run flag.
fn spawn_task<F>(name: &str, run: &Arc<AtomicBool>, task: F) -> Result<JoinHandle<()>, Report>
where
    F: FnOnce(&AtomicBool) + Send + 'static,
{
    let run = run.clone();

    thread::Builder::new()
        .name(name.into())
        .spawn(move || task(&run))
        .wrap_err_with(|| format!("Could not start the {} task", name))
}

/// Signal every task to stop and wait for them.
fn stop_tasks(run: &AtomicBool, handles: Vec<JoinHandle<()>>) {
    run.store(false, Ordering::Relaxed);

    for h in handles {
        let name = h.thread().name().unwrap_or("unnamed").to_string();
        if h.join().is_err() {
            error!("The {} task panicked", name);
        }
    }
}

/// Receive and execute operator commands until `run` is cleared.
fn tc_loop(
    client: &TcClient,
    supervisor: &Supervisor,
    clock: &dyn Clock,
    idle_ms: u64,
    run: &AtomicBool,
) {
    let mut connected = false;

    while run.load(Ordering::Relaxed) {
        match client.receive_tc() {
            Ok(Some(tc)) => {
                let response = tc_processor::exec(supervisor, tc);

                if let Err(e) = client.send_response(response) {
                    warn!("Could not respond to TC: {}", e)
                }
            }
            Ok(None) => (),
            Err(TcClientError::NotConnected) => {
                if connected {
                    error!("Connection to the console lost");
                }
                connected = false;
                clock.sleep_ms(idle_ms);
                continue;
            }
            Err(TcClientError::TcParseError(e)) => warn!("Could not parse received TC: {}", e),
            Err(e) => warn!("TcClient error: {}", e),
        }

        if !connected {
            info!("Console connected");
            connected = true;
        }
    }
}
