//! # AGV operator console
//!
//! Line based console sending operator commands to the AGV over the control link and printing the
//! AGV's response to each.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Report};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::path::PathBuf;
use structopt::StructOpt;

use comms_if::{
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
    tc::{Tc, TcResponse},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "AGV $ ";

/// Time to wait for a response. Selecting a mission blocks on the AGV until the container is
/// ready, so this must be longer than the mission's load wait.
const RESPONSE_TIMEOUT_MS: i32 = 10_000;

const HELP: &str = "\
Commands:
    gg      fetch a gummy
    gc      fetch cotton
    gb      fetch a ball
    d       deliver the loaded object
    da      leave the station now
    stop    abandon the current mission
    help    show this message
    quit    exit the console";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "agv_console", about = "Operator console for the AGV")]
struct Opts {
    /// File the command history is kept in
    #[structopt(long, parse(from_os_str), default_value = "data/history.txt")]
    history: PathBuf,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;

    let ctx = zmq::Context::new();
    let socket = MonitoredSocket::new(
        &ctx,
        zmq::REQ,
        SocketOptions {
            block_on_first_connect: false,
            req_correlate: true,
            req_relaxed: true,
            heartbeat_ivl: net_params.heartbeat_ivl_ms,
            heartbeat_ttl: net_params.heartbeat_timeout_ms,
            heartbeat_timeout: net_params.heartbeat_timeout_ms,
            linger: 1,
            recv_timeout: RESPONSE_TIMEOUT_MS,
            send_timeout: 100,
            ..Default::default()
        },
        &net_params.tc_client_endpoint,
    )
    .wrap_err("Could not create the control link socket")?;

    println!("Control link: {}", net_params.tc_client_endpoint);
    println!("Type \"help\" for the list of commands\n");

    let mut rl = DefaultEditor::new().wrap_err("Could not start the line editor")?;
    if rl.load_history(&opts.history).is_err() {
        println!("No history detected");
    }

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                match line {
                    "help" => println!("{}", HELP),
                    "quit" | "exit" => break,
                    _ => send(&socket, line),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Unhandled error: {:?}", e);
                break;
            }
        }
    }

    if let Some(dir) = opts.history.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    rl.save_history(&opts.history)
        .wrap_err("Could not save the command history")?;

    println!("Exiting...");

    Ok(())
}

/// Send one command line to the AGV and print its response.
fn send(socket: &MonitoredSocket, line: &str) {
    // Catch typos before they go over the link
    if let Err(e) = Tc::from_line(line) {
        println!("{}, type \"help\" for the list of commands", e);
        return;
    }

    if !socket.connected() {
        println!("The AGV is not connected");
        return;
    }

    if let Err(e) = socket.send(line, 0) {
        println!("Could not send the command: {}", e);
        return;
    }

    match socket.recv_string(0) {
        Ok(Ok(s)) => match TcResponse::from_json(&s) {
            Ok(TcResponse::Ok) => println!("OK"),
            Ok(TcResponse::Invalid) => println!("The AGV could not parse the command"),
            Ok(TcResponse::CannotExecute) => {
                println!("The AGV cannot execute the command now, see its log")
            }
            Err(e) => println!("Invalid response {:?}: {}", s, e),
        },
        Ok(Err(_)) => println!("Response is not valid UTF-8"),
        Err(zmq::Error::EAGAIN) => println!("No response from the AGV"),
        Err(e) => println!("Could not receive the response: {}", e),
    }
}
