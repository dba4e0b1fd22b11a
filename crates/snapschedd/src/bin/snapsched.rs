//! snapsched - control CLI for snapschedd
//!
//! Sends one command over the daemon socket and prints the result.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use snapsched_api::{Command, ResponsePayload, ResponseResult, ScheduleDetails};
use snapsched_ipc::IpcClient;
use snapsched_util::{default_socket_path, format_duration, FsName};
use std::path::PathBuf;
use std::process::ExitCode;

/// Manage snapshot schedules of a running snapschedd
#[derive(Parser, Debug)]
#[command(name = "snapsched", version, about)]
struct Cli {
    /// Daemon socket path
    #[arg(short, long, env = "SNAPSCHED_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Print raw JSON responses
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Add a schedule rule to a path
    Add {
        /// Absolute path inside the filesystem
        path: String,
        /// Interval such as 15m, 1h, 1d or 1w
        schedule: String,
        /// Retention such as 24h7d4w
        #[arg(short, long)]
        retention: Option<String>,
        /// Anchor of the firing cadence (default: midnight UTC today)
        #[arg(long)]
        start: Option<String>,
        /// Filesystem name (default: the configured default)
        #[arg(long)]
        fs: Option<String>,
        /// Subvolume the path belongs to
        #[arg(long)]
        subvol: Option<String>,
    },
    /// Remove rules from a path; all of them unless a schedule or start is given
    Remove {
        path: String,
        schedule: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        fs: Option<String>,
    },
    /// List rules at a path
    List {
        #[arg(default_value = "/")]
        path: String,
        /// Include every path below
        #[arg(short, long)]
        recursive: bool,
        #[arg(long)]
        fs: Option<String>,
    },
    /// Show rule details and run counters of a path
    Show {
        path: String,
        #[arg(long)]
        fs: Option<String>,
    },
    /// Resume scheduling of a path
    Activate {
        path: String,
        #[arg(long)]
        fs: Option<String>,
    },
    /// Pause scheduling of a path without removing its rules
    Deactivate {
        path: String,
        #[arg(long)]
        fs: Option<String>,
    },
    /// Show the next snapshot of every loaded filesystem
    Status,
    /// Check that the daemon answers
    Ping,
}

impl Action {
    fn into_command(self) -> Command {
        let fs_name = |fs: Option<String>| fs.map(FsName::from);

        match self {
            Action::Add {
                path,
                schedule,
                retention,
                start,
                fs,
                subvol,
            } => Command::AddSchedule {
                path,
                schedule,
                retention,
                start,
                fs: fs_name(fs),
                subvol,
            },
            Action::Remove {
                path,
                schedule,
                start,
                fs,
            } => Command::RemoveSchedule {
                path,
                schedule,
                start,
                fs: fs_name(fs),
            },
            Action::List {
                path,
                recursive,
                fs,
            } => Command::ListSchedules {
                path,
                recursive,
                fs: fs_name(fs),
            },
            Action::Show { path, fs } => Command::GetSchedule {
                path,
                fs: fs_name(fs),
            },
            Action::Activate { path, fs } => Command::Activate {
                path,
                fs: fs_name(fs),
            },
            Action::Deactivate { path, fs } => Command::Deactivate {
                path,
                fs: fs_name(fs),
            },
            Action::Status => Command::GetStatus,
            Action::Ping => Command::Ping,
        }
    }
}

fn print_details(details: &[ScheduleDetails]) {
    for d in details {
        println!("{} {} {}", d.path, d.schedule, d.retention);
        println!("  fs:           {}", d.fs);
        if let Some(subvol) = &d.subvol {
            println!("  subvol:       {}", subvol);
        }
        println!("  active:       {}", d.active);
        println!("  start:        {}", d.start);
        println!("  created:      {}", d.created);
        let never = || "never".to_string();
        println!("  first:        {}", d.first.map_or_else(never, |t| t.to_string()));
        println!("  last:         {}", d.last.map_or_else(never, |t| t.to_string()));
        println!(
            "  last pruned:  {}",
            d.last_pruned.map_or_else(never, |t| t.to_string())
        );
        println!("  created/pruned: {}/{}", d.created_count, d.pruned_count);
    }
}

fn print_payload(payload: &ResponsePayload) {
    match payload {
        ResponsePayload::ScheduleAdded => println!("Schedule added"),
        ResponsePayload::ScheduleRemoved { removed } => println!("Removed {} rule(s)", removed),
        ResponsePayload::Schedules { schedules } => {
            for s in schedules {
                println!("{} {} {}", s.path, s.schedule, s.retention);
            }
        }
        ResponsePayload::Details { details } => print_details(details),
        ResponsePayload::Activated => println!("Activated"),
        ResponsePayload::Deactivated => println!("Deactivated"),
        ResponsePayload::Status { filesystems } => {
            let now = snapsched_util::now();
            for fs in filesystems {
                match &fs.next {
                    Some(next) => {
                        let wait = (next.due_at - now).to_std().unwrap_or_default();
                        println!(
                            "{}: {} active path(s), next {} {} in {}",
                            fs.fs,
                            fs.active_paths,
                            next.path,
                            next.schedule,
                            format_duration(wait)
                        );
                    }
                    None => println!("{}: {} active path(s), idle", fs.fs, fs.active_paths),
                }
            }
        }
        ResponsePayload::Pong => println!("pong"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut client = IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to snapschedd at {:?}", cli.socket))?;

    let response = client
        .send(cli.command.into_command())
        .await
        .context("Request failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    match &response.result {
        ResponseResult::Ok(payload) => {
            if !cli.json {
                print_payload(payload);
            }
            Ok(())
        }
        ResponseResult::Err(e) => bail!("{:?}: {}", e.code, e.message),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
