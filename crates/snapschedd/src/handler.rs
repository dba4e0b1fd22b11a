//! Command dispatch

use snapsched_api::{Command, ErrorCode, ErrorInfo, Response, ResponsePayload, API_VERSION};
use snapsched_core::SnapScheduler;
use snapsched_util::Result;
use tracing::{debug, warn};

/// Run one command against the scheduler.
///
/// Blocks on filesystem and object-store calls; async callers run it on
/// the blocking pool.
pub fn handle_command(
    scheduler: &SnapScheduler,
    request_id: u64,
    api_version: u32,
    command: Command,
) -> Response {
    if api_version != API_VERSION {
        return Response::error(
            request_id,
            ErrorInfo::new(
                ErrorCode::InvalidRequest,
                format!(
                    "unsupported API version {} (expected {})",
                    api_version, API_VERSION
                ),
            ),
        );
    }

    debug!(request_id, command = ?command, "Handling command");

    match dispatch(scheduler, command) {
        Ok(payload) => Response::success(request_id, payload),
        Err(e) => {
            warn!(request_id, error = %e, "Command failed");
            Response::error(request_id, ErrorInfo::from(&e))
        }
    }
}

fn dispatch(scheduler: &SnapScheduler, command: Command) -> Result<ResponsePayload> {
    let payload = match command {
        Command::AddSchedule {
            path,
            schedule,
            retention,
            start,
            fs,
            subvol,
        } => {
            scheduler.add_schedule(
                &path,
                &schedule,
                retention.as_deref(),
                start.as_deref(),
                fs,
                subvol,
            )?;
            ResponsePayload::ScheduleAdded
        }

        Command::RemoveSchedule {
            path,
            schedule,
            start,
            fs,
        } => {
            let removed =
                scheduler.rm_schedule(&path, schedule.as_deref(), start.as_deref(), fs)?;
            ResponsePayload::ScheduleRemoved { removed }
        }

        Command::ListSchedules {
            path,
            recursive,
            fs,
        } => ResponsePayload::Schedules {
            schedules: scheduler.list_schedules(&path, recursive, fs)?,
        },

        Command::GetSchedule { path, fs } => ResponsePayload::Details {
            details: scheduler.get_schedule(&path, fs)?,
        },

        Command::Activate { path, fs } => {
            scheduler.activate(&path, fs)?;
            ResponsePayload::Activated
        }

        Command::Deactivate { path, fs } => {
            scheduler.deactivate(&path, fs)?;
            ResponsePayload::Deactivated
        }

        Command::GetStatus => ResponsePayload::Status {
            filesystems: scheduler.status()?,
        },

        Command::Ping => ResponsePayload::Pong,
    };

    Ok(payload)
}
