// Main CLI entry point for splice
// Loads a captured request and a payload list, then submits every
// (injection point × payload) variant to the core

use clap::{Arg, ArgAction, ArgMatches, Command};
use splice::{discover, CoreClient, CoreConfig, GeneratedRequest, Request, SpliceError};
use std::ops::Range;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Parse an `offset:length` injection range
fn parse_point(s: &str) -> Result<Range<usize>, String> {
    let (offset, length) = s
        .split_once(':')
        .ok_or_else(|| format!("expected offset:length, got '{}'", s))?;
    let offset: usize = offset.trim().parse().map_err(|_| format!("bad offset in '{}'", s))?;
    let length: usize = length.trim().parse().map_err(|_| format!("bad length in '{}'", s))?;
    let end = offset
        .checked_add(length)
        .ok_or_else(|| format!("range overflows in '{}'", s))?;
    Ok(offset..end)
}

/// One payload per line; `\r\n` endings tolerated
fn split_payloads(data: &[u8], keep_empty: bool) -> Vec<Vec<u8>> {
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    if data.is_empty() {
        return Vec::new();
    }
    data.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| keep_empty || !line.is_empty())
        .map(|line| line.to_vec())
        .collect()
}


fn build_cli() -> Command {
    Command::new("splice")
        .version(clap::crate_version!())
        .about("Substitute payloads into a captured request and submit each variant to the core")
        .after_help("EXAMPLES:\n  splice --request login.req --host app.local --payloads sqli.txt\n  splice --request search.req --host app.local --tls --point 18:4 --payloads xss.txt --wait\n  splice --parts parts.json --host app.local --payloads ids.txt --dry-run")
        .arg(Arg::new("request")
            .short('r')
            .long("request")
            .num_args(1)
            .conflicts_with("parts")
            .required_unless_present("parts")
            .help("Raw captured HTTP request"))
        .arg(Arg::new("parts")
            .long("parts")
            .num_args(1)
            .help("Request parts JSON: [{\"Inject\": bool, \"RequestPart\": base64}, ...]"))
        .arg(Arg::new("host")
            .long("host")
            .required(true)
            .num_args(1)
            .help("Target host (host or host:port)"))
        .arg(Arg::new("tls")
            .long("tls")
            .action(ArgAction::SetTrue)
            .help("Send the request over TLS"))
        .arg(Arg::new("point")
            .short('p')
            .long("point")
            .action(ArgAction::Append)
            .value_parser(parse_point)
            .conflicts_with("parts")
            .help("Injection range as offset:length (repeatable); discovered automatically when omitted"))
        .arg(Arg::new("payloads")
            .short('w')
            .long("payloads")
            .required(true)
            .num_args(1)
            .help("Payload list, one per line"))
        .arg(Arg::new("keep_empty")
            .long("keep-empty")
            .action(ArgAction::SetTrue)
            .help("Treat empty lines in the payload list as the empty payload"))
        .arg(Arg::new("wait")
            .long("wait")
            .action(ArgAction::SetTrue)
            .help("Wait for each request to execute and print its response status"))
        .arg(Arg::new("concurrency")
            .short('c')
            .long("concurrency")
            .num_args(1)
            .default_value("4")
            .value_parser(clap::value_parser!(usize))
            .help("Number of submissions in flight"))
        .arg(Arg::new("dry_run")
            .long("dry-run")
            .action(ArgAction::SetTrue)
            .help("Print each generated variant instead of submitting it"))
        .arg(Arg::new("core_host")
            .long("core-host")
            .env("SPLICE_CORE_HOST")
            .default_value(splice::DEFAULT_CORE_HOST)
            .help("Host the core listens on"))
        .arg(Arg::new("core_port")
            .long("core-port")
            .env("SPLICE_CORE_PORT")
            .default_value("10101")
            .value_parser(clap::value_parser!(u16))
            .help("Port the core listens on"))
        .arg(Arg::new("api_key")
            .long("api-key")
            .env("SPLICE_API_KEY")
            .hide_env_values(true)
            .help("API key for the core"))
        .arg(Arg::new("scan_id")
            .long("scan-id")
            .env("SPLICE_SCAN_ID")
            .hide_env_values(true)
            .help("Scan identifier the results are filed under"))
        .arg(Arg::new("timeout")
            .long("timeout")
            .env("SPLICE_TIMEOUT_SECS")
            .default_value("30")
            .value_parser(clap::value_parser!(u64))
            .help("Per-call timeout in seconds"))
        .arg(Arg::new("log_level")
            .long("log-level")
            .default_value("info")
            .help("Log filter used when RUST_LOG is not set"))
}

fn load_request(matches: &ArgMatches) -> Result<Request, SpliceError> {
    let host = matches.get_one::<String>("host").cloned().unwrap_or_default();
    let use_tls = matches.get_flag("tls");

    if let Some(path) = matches.get_one::<String>("parts") {
        let json = std::fs::read_to_string(path)?;
        return Request::from_parts_json(host, use_tls, &json);
    }

    let path = matches
        .get_one::<String>("request")
        .ok_or_else(|| SpliceError::Config("either --request or --parts is required".to_string()))?;
    let raw = std::fs::read(path)?;

    match matches.get_many::<Range<usize>>("point") {
        Some(points) => {
            let ranges: Vec<Range<usize>> = points.cloned().collect();
            Request::from_ranges(host, use_tls, &raw, &ranges)
        }
        None => Ok(discover(host, use_tls, &raw)),
    }
}

fn core_config(matches: &ArgMatches) -> CoreConfig {
    CoreConfig {
        host: matches
            .get_one::<String>("core_host")
            .cloned()
            .unwrap_or_else(|| splice::DEFAULT_CORE_HOST.to_string()),
        port: matches.get_one::<u16>("core_port").copied().unwrap_or(splice::DEFAULT_CORE_PORT),
        api_key: matches.get_one::<String>("api_key").cloned().unwrap_or_default(),
        scan_id: matches.get_one::<String>("scan_id").cloned().unwrap_or_default(),
        timeout_secs: matches.get_one::<u64>("timeout").copied().unwrap_or(splice::DEFAULT_TIMEOUT_SECS),
    }
}

fn print_variants(base: &Request, payloads: &[Vec<u8>]) -> Result<(), SpliceError> {
    for point in 0..base.count() {
        for payload in payloads {
            let generated = GeneratedRequest::build(&base.replace(point, payload)?)?;
            println!(
                "### point {} payload {}",
                point,
                String::from_utf8_lossy(payload)
            );
            println!("{}", String::from_utf8_lossy(&generated.bytes));
        }
    }
    Ok(())
}

fn submit_variant(
    client: &CoreClient,
    base: &Request,
    point: usize,
    payload: &[u8],
    wait: bool,
) -> Result<(), SpliceError> {
    let variant = base.replace(point, payload)?;
    let shown = String::from_utf8_lossy(payload);

    if wait {
        let outcome = client.queue_and_wait(&variant)?;
        println!(
            "[{}] point {}: {}",
            String::from_utf8_lossy(outcome.status_line()),
            point,
            shown
        );
    } else {
        let handle = client.queue(&variant)?;
        println!("[QUEUED {}] point {}: {}", handle, point, shown);
    }
    Ok(())
}

/// Submit every variant on blocking tasks, at most `concurrency` at a time.
/// Returns the number of failed submissions.
async fn fan_out(
    client: Arc<CoreClient>,
    base: Arc<Request>,
    payloads: Arc<Vec<Vec<u8>>>,
    wait: bool,
    concurrency: usize,
) -> usize {
    let total = base.count() * payloads.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let done = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(total);

    for point in 0..base.count() {
        for slot in 0..payloads.len() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let client = client.clone();
            let base = base.clone();
            let payloads = payloads.clone();
            let done = done.clone();

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = submit_variant(&client, &base, point, &payloads[slot], wait);

                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Err(e) = client.report_progress(finished, total) {
                    warn!("progress update failed: {}", e);
                }
                result.map_err(|e| (point, slot, e))
            }));
        }
    }

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err((point, slot, e))) => {
                println!("[ERROR] point {} payload #{}: {}", point, slot, e);
                failures += 1;
            }
            Err(e) => {
                error!("submission task failed: {}", e);
                failures += 1;
            }
        }
    }
    failures
}

fn main() -> ExitCode {
    let matches = build_cli().get_matches();

    let log_level = matches.get_one::<String>("log_level").map(|s| s.as_str()).unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let request = match load_request(&matches) {
        Ok(request) => request,
        Err(e) => {
            error!("Failed to load request: {}", e);
            return ExitCode::from(2);
        }
    };

    let payload_path = matches.get_one::<String>("payloads").cloned().unwrap_or_default();
    let payloads = match std::fs::read(&payload_path) {
        Ok(data) => split_payloads(&data, matches.get_flag("keep_empty")),
        Err(e) => {
            error!("Failed to read payloads from {}: {}", payload_path, e);
            return ExitCode::from(2);
        }
    };

    info!(
        "Loaded {} with {} injection point(s) and {} payload(s)",
        request,
        request.count(),
        payloads.len()
    );
    if request.count() == 0 {
        warn!("Request has no injection points; only the base request will be sent");
    }

    if matches.get_flag("dry_run") {
        return match print_variants(&request, &payloads) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    // Built outside the runtime: the blocking client may not be created or
    // dropped from async context.
    let client = match CoreClient::from_config(&core_config(&matches)) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Cannot set up core client: {}", e);
            return ExitCode::from(2);
        }
    };

    match client.queue_base(&request) {
        Ok(handle) => println!("[QUEUED {}] base request", handle),
        Err(e) => {
            error!("Core rejected the base request: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let total = request.count() * payloads.len();
    let concurrency = matches.get_one::<usize>("concurrency").copied().unwrap_or(4);
    let failures = runtime.block_on(fan_out(
        client.clone(),
        Arc::new(request),
        Arc::new(payloads),
        matches.get_flag("wait"),
        concurrency,
    ));
    drop(runtime);

    println!("Submitted {} of {} variant(s).", total - failures, total);
    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
