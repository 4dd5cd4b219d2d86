use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zerotrace::access::{AccessProvider, MemoryAccessProvider, SystemAccessProvider};
use zerotrace::{
    audit, standards, CancelToken, Device, OrchestratorConfig, ProgressEvent, StandardId,
    WipeOrchestrator, WipeRequest, WipeSession,
};

#[derive(Parser)]
#[command(name = "zerotrace")]
#[command(about = "Standards-driven storage sanitization engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported sanitization standards and their pass tables
    Standards,

    /// Sanitize a device to a named standard
    Wipe {
        /// Device path (e.g. /dev/sdb)
        #[arg(short, long)]
        device: String,

        /// Sanitization standard (NIST_800_88, BSI_VS_A, DOD_5220_22_M)
        #[arg(short, long, default_value = "NIST_800_88")]
        standard: String,

        /// Confirmation token; must be exactly "ERASE <device>"
        #[arg(long)]
        confirm: String,

        /// Run against a simulated in-memory device instead of hardware
        #[arg(long)]
        simulate: bool,

        /// Simulated device size in MiB
        #[arg(long, default_value = "16")]
        simulate_size_mb: u64,

        /// Device capacity in bytes (overrides the probed size)
        #[arg(long)]
        capacity: Option<u64>,

        /// Device model, for the session record
        #[arg(long)]
        model: Option<String>,

        /// Device serial, for the session record
        #[arg(long)]
        serial: Option<String>,

        /// Mark the device as the boot/system disk (the wipe will refuse it)
        #[arg(long)]
        system_disk: bool,

        /// Directory for the session report JSON
        #[arg(long, default_value = "./reports")]
        report_dir: PathBuf,

        /// Write live progress snapshots to this JSON file
        #[arg(long)]
        status_file: Option<PathBuf>,

        /// Disable the one-shot re-execution of a pass that fails verification
        #[arg(long)]
        no_reexecute: bool,
    },

    /// Audit a persisted session record against a standard
    Audit {
        /// Path to a session report or session JSON file
        #[arg(short, long)]
        session: PathBuf,

        /// Standard to audit against; defaults to the one the session records
        #[arg(long)]
        standard: Option<String>,
    },
}

/// Report written next to every finished session: the record, its digest and
/// the audit verdict, self-contained for later re-auditing.
#[derive(Serialize)]
struct SessionReport {
    session: WipeSession,
    record_digest: String,
    verdict: audit::AuditVerdict,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Standards => {
            print_standards();
            Ok(())
        }
        Commands::Wipe {
            device,
            standard,
            confirm,
            simulate,
            simulate_size_mb,
            capacity,
            model,
            serial,
            system_disk,
            report_dir,
            status_file,
            no_reexecute,
        } => {
            run_wipe(WipeArgs {
                device,
                standard,
                confirm,
                simulate,
                simulate_size_mb,
                capacity,
                model,
                serial,
                system_disk,
                report_dir,
                status_file,
                no_reexecute,
            })
            .await
        }
        Commands::Audit { session, standard } => run_audit(&session, standard.as_deref()),
    }
}

fn print_standards() {
    for id in StandardId::ALL {
        let standard = standards::generate(id);
        println!("{} - {}", id.as_str().bold(), standard.name);
        for (i, pass) in standard.passes.iter().enumerate() {
            println!(
                "  pass {}: write {} verify {:?}",
                i + 1,
                pass.pattern,
                pass.verification
            );
        }
    }
}

struct WipeArgs {
    device: String,
    standard: String,
    confirm: String,
    simulate: bool,
    simulate_size_mb: u64,
    capacity: Option<u64>,
    model: Option<String>,
    serial: Option<String>,
    system_disk: bool,
    report_dir: PathBuf,
    status_file: Option<PathBuf>,
    no_reexecute: bool,
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

async fn run_wipe(args: WipeArgs) -> Result<()> {
    if !args.simulate && !is_root() {
        bail!("raw device access requires root privileges (or use --simulate)");
    }

    let standard = standards::generate_by_name(&args.standard)
        .with_context(|| format!("unsupported standard {}", args.standard))?;

    let (provider, device): (Arc<dyn AccessProvider>, Device) = if args.simulate {
        let capacity = args.simulate_size_mb * 1024 * 1024;
        let mut device = Device::new(&args.device, capacity)
            .with_identity("Simulated", "SIM-0")
            .with_system_disk(args.system_disk);
        if let Some(capacity) = args.capacity {
            device.capacity = capacity;
        }
        (Arc::new(MemoryAccessProvider::new(device.capacity)), device)
    } else {
        let capacity = match args.capacity {
            Some(capacity) => capacity,
            None => probe_capacity(&args.device)?,
        };
        let device = Device::new(&args.device, capacity)
            .with_identity(
                args.model.clone().unwrap_or_else(|| "Unknown".to_string()),
                args.serial.clone().unwrap_or_else(|| "N/A".to_string()),
            )
            .with_system_disk(args.system_disk);
        (Arc::new(SystemAccessProvider::default()), device)
    };

    println!(
        "{} {} ({} bytes) with {}",
        "Sanitizing".bold().red(),
        device.id,
        device.capacity,
        standard.name
    );

    let cancel = CancelToken::new();
    install_sigint_handler(cancel.clone())?;

    let (progress_tx, progress_rx) = tokio::sync::mpsc::channel::<ProgressEvent>(256);
    let consumer = tokio::spawn(consume_progress(
        progress_rx,
        device.capacity,
        standard.passes.len(),
        args.status_file.clone(),
    ));

    let config = OrchestratorConfig {
        reexecute_failed_verification: !args.no_reexecute,
        ..OrchestratorConfig::default()
    };

    let request = WipeRequest::new(&device.id, &args.standard, &args.confirm);
    let run_device = device.clone();
    let run_cancel = cancel.clone();
    let session = tokio::task::spawn_blocking(move || {
        let mut orchestrator = WipeOrchestrator::new(config, provider)
            .with_cancel(run_cancel)
            .with_progress(progress_tx);
        orchestrator.run(&run_device, &request)
    })
    .await
    .context("wipe task failed")??;

    consumer.await.context("progress consumer failed")?;

    let verdict = audit::audit(&standard, &session);
    let report_path = write_report(&args.report_dir, &session, &verdict)?;

    print_summary(&session, &verdict);
    println!("report: {}", report_path.display());

    if verdict.compliant {
        Ok(())
    } else {
        bail!("session is not compliant with {}", standard.id)
    }
}

fn run_audit(path: &Path, standard_override: Option<&str>) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;

    // accept either a bare session record or a full report
    let session = match WipeSession::from_json(&raw) {
        Ok(session) => session,
        Err(_) => {
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("file is not valid JSON")?;
            let session = value
                .get("session")
                .context("file contains neither a session record nor a report")?;
            WipeSession::from_json(&session.to_string())?
        }
    };

    let id = match standard_override {
        Some(name) => StandardId::parse(name)?,
        None => session.standard_id,
    };
    let standard = standards::generate(id);
    let verdict = audit::audit(&standard, &session);
    print_summary(&session, &verdict);

    if verdict.compliant {
        Ok(())
    } else {
        bail!("session is not compliant with {id}")
    }
}

fn print_summary(session: &WipeSession, verdict: &audit::AuditVerdict) {
    println!();
    println!("session  {}", session.session_id);
    println!("device   {} ({})", session.device.id, session.device.model);
    println!("standard {}", session.standard_id);
    println!("status   {:?}", session.status);
    println!("access   {:?}", session.access_mode);
    println!("written  {} bytes", session.total_bytes_written());
    if let Some(duration) = session.duration().and_then(|d| d.to_std().ok()) {
        println!("duration {}", humantime::format_duration(duration));
    }

    if verdict.compliant {
        println!("{}", "COMPLIANT".green().bold());
    } else {
        println!("{}", "NOT COMPLIANT".red().bold());
        for deviation in &verdict.deviations {
            println!(
                "  [{:?}] {:?}: {}",
                deviation.severity, deviation.kind, deviation.description
            );
        }
    }
}

fn write_report(
    dir: &Path,
    session: &WipeSession,
    verdict: &audit::AuditVerdict,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create report directory {}", dir.display()))?;
    let report = SessionReport {
        session: session.clone(),
        record_digest: session.record_digest()?,
        verdict: verdict.clone(),
    };
    let path = dir.join(format!("session-{}.json", session.session_id));
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("cannot write report {}", path.display()))?;
    Ok(path)
}

/// Drains progress events into a terminal bar and, optionally, a live status
/// JSON file for external consumers.
async fn consume_progress(
    mut rx: tokio::sync::mpsc::Receiver<ProgressEvent>,
    capacity: u64,
    total_passes: usize,
    status_file: Option<PathBuf>,
) {
    let bar = ProgressBar::new(capacity.max(1));
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }

    let mut last_status_write: Option<std::time::Instant> = None;
    while let Some(event) = rx.recv().await {
        bar.set_prefix(format!("pass {}/{}", event.pass_index + 1, total_passes));
        bar.set_position(event.bytes_written);

        if let Some(path) = &status_file {
            // throttled; a slow filesystem must not back up the channel
            let due = last_status_write.map_or(true, |t| t.elapsed() >= Duration::from_millis(500));
            if due {
                if let Ok(json) = serde_json::to_string(&event) {
                    let _ = std::fs::write(path, json);
                }
                last_status_write = Some(std::time::Instant::now());
            }
        }
    }
    bar.finish_and_clear();
}

fn install_sigint_handler(cancel: CancelToken) -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGINT {
                eprintln!("\ninterrupt received, stopping at the next chunk boundary...");
                cancel.cancel();
            }
        }
    });
    Ok(())
}

/// Capacity of a block device or backing file, by seeking to its end.
fn probe_capacity(path: &str) -> Result<u64> {
    use std::io::{Seek, SeekFrom};
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {path} to probe its capacity"))?;
    Ok(file.seek(SeekFrom::End(0))?)
}
