use std::io::Write;

use fcdriver::FirecrackerDriver;
use sectionleader::{cli::styles::AnsiStyles, manager::VmManager, vm::MachineInfo, LeaderResult};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::handlers::{shutdown_everything, wait_for_signal};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const PROMPT: &str = "VM$ ";

const HELP: &str = "\
commands:
  run             provision a new machine
  list            list live machines
  pause <name>    pause a machine
  resume <name>   resume a paused machine
  stop <name>     shut a machine down
  quit            stop every machine and exit";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Run,
    List,
    Pause(&'a str),
    Resume(&'a str),
    Stop(&'a str),
    Quit,
    Help,
    Empty,
    Unknown(&'a str),
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Runs the interactive prompt until `quit`, end of input or a termination signal.
pub async fn shell_subcommand(manager: VmManager<FirecrackerDriver>) -> LeaderResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", "type `help` for a list of commands".literal());

    loop {
        print!("{}", PROMPT.header());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            signal = wait_for_signal() => {
                let signal = signal?;
                tracing::info!(signal, "received termination signal");
                None
            }
        };

        let Some(line) = line else {
            break;
        };

        match parse(&line) {
            Command::Run => match manager.create_vm_and_wait().await {
                Ok(info) => println!("{}", describe(&info).valid()),
                Err(e) => println!("{}", format!("could not create machine: {e}").error()),
            },
            Command::List => {
                let machines = manager.list().await;
                if machines.is_empty() {
                    println!("no machines");
                }
                for info in machines {
                    println!("{}", describe(&info));
                }
            }
            Command::Pause(name) => report("paused", name, pause(&manager, name).await),
            Command::Resume(name) => report("resumed", name, resume(&manager, name).await),
            Command::Stop(name) => report("stopped", name, stop(&manager, name).await),
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Empty => {}
            Command::Unknown(word) => {
                println!("{}", format!("unknown command `{word}`, try `help`").error())
            }
        }
    }

    shutdown_everything(&manager).await;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn parse(line: &str) -> Command<'_> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Command::Empty;
    };

    match (command, words.next()) {
        ("run", None) => Command::Run,
        ("list", None) => Command::List,
        ("pause", Some(name)) => Command::Pause(name),
        ("resume", Some(name)) => Command::Resume(name),
        ("stop", Some(name)) => Command::Stop(name),
        ("quit" | "exit", None) => Command::Quit,
        ("help", None) => Command::Help,
        _ => Command::Unknown(command),
    }
}

fn describe(info: &MachineInfo) -> String {
    format!(
        "{} [{}] ip {} ssh {} game {} local {}",
        info.name, info.state, info.local_ip, info.remote_port, info.game_remote_port, info.local_port
    )
}

fn report(done: &str, name: &str, result: LeaderResult<()>) {
    match result {
        Ok(()) => println!("{}", format!("{name} {done}").valid()),
        Err(e) => println!("{}", format!("{name}: {e}").error()),
    }
}

async fn pause(manager: &VmManager<FirecrackerDriver>, name: &str) -> LeaderResult<()> {
    let id = manager.resolve(name).await?;
    manager.pause_vm(&id).await
}

async fn resume(manager: &VmManager<FirecrackerDriver>, name: &str) -> LeaderResult<()> {
    let id = manager.resolve(name).await?;
    manager.resume_vm(&id).await
}

async fn stop(manager: &VmManager<FirecrackerDriver>, name: &str) -> LeaderResult<()> {
    let id = manager.resolve(name).await?;
    let signal = manager.graceful_shutdown_vm(&id).await?;
    if !signal.wait().await {
        return Err(sectionleader::LeaderError::ShutdownFailed { failed: 1 });
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
