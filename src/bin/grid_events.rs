use std::collections::HashSet;

use grid_sdk::{ClientConfig, GridClient, JobEvent, JobEventKind, JobId};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("grid-events failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut job_filter: Option<JobId> = None;
    let mut kinds: HashSet<JobEventKind> = JobEventKind::ALL.into_iter().collect();
    let mut log_directive = "grid_sdk=info".to_string();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        if let Some(value) = arg.strip_prefix("--job=") {
            job_filter = Some(parse_job_id(value));
            continue;
        }
        if arg == "--job" {
            let value = args.next().ok_or_else(|| "--job requires a value".to_string())?;
            job_filter = Some(parse_job_id(&value));
            continue;
        }

        if let Some(value) = arg.strip_prefix("--events=") {
            kinds = parse_kinds(value)?;
            continue;
        }
        if arg == "--events" {
            let value = args
                .next()
                .ok_or_else(|| "--events requires a value".to_string())?;
            kinds = parse_kinds(&value)?;
            continue;
        }

        if let Some(value) = arg.strip_prefix("--log=") {
            log_directive = value.to_string();
            continue;
        }

        return Err(format!("unknown argument '{arg}'. Use --help for usage"));
    }

    grid_sdk::init_tracing(&log_directive);

    let config = ClientConfig::from_env().map_err(|e| e.to_string())?;
    let client = GridClient::new(config).map_err(|e| e.to_string())?;
    let mut events = client.watch();

    let print = |event: &JobEvent| -> Result<(), String> {
        if !kinds.contains(&event.kind()) {
            return Ok(());
        }
        if job_filter.as_ref().is_some_and(|id| id != event.job_id()) {
            return Ok(());
        }
        let line = serde_json::to_string(event).map_err(|e| e.to_string())?;
        println!("{line}");
        Ok(())
    };

    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => print(&event)?,
                Err(RecvError::Lagged(skipped)) => eprintln!("skipped {skipped} events"),
                Err(RecvError::Closed) => return Err("event stream closed".to_string()),
            },
            _ = client.stream_closed() => {
                // Events read before the end are already queued.
                loop {
                    match events.try_recv() {
                        Ok(event) => print(&event)?,
                        Err(TryRecvError::Lagged(skipped)) => eprintln!("skipped {skipped} events"),
                        Err(_) => break,
                    }
                }
                return Err("event stream closed".to_string());
            }
        }
    }
}

/// Numeric ids are taken as numbers, anything else as text.
fn parse_job_id(value: &str) -> JobId {
    value
        .parse::<i64>()
        .map(JobId::from)
        .unwrap_or_else(|_| JobId::from(value))
}

fn parse_kinds(value: &str) -> Result<HashSet<JobEventKind>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobEventKind>)
        .collect()
}

fn print_help() {
    println!(
        "grid-events: print Grid job events as JSON lines\n\n\
         Connection settings come from GRID_ADDRESS, GRID_PORT, GRID_PROTOCOL,\n\
         GRID_API_ROOT and GRID_HEADERS (a .env file is read when present).\n\n\
         Options:\n  \
         --job <id>          only print events for this job\n  \
         --events <list>     comma separated kinds, e.g. Progress,JobFailed\n  \
         --log=<directive>   tracing filter when RUST_LOG is unset (default grid_sdk=info)\n  \
         -h, --help          show this help"
    );
}
