// crates/scale-vision-server/src/main.rs
//
// The scale-vision binary: CLI, process wiring and lifecycle. `run` owns
// the three long-lived tasks (ingestion thread, control thread, HTTP
// thread) and tears them down in order on SIGINT/SIGTERM.

mod api;
mod logging;
mod version;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use scale_vision_pipeline::{
    build_output, build_source, ConfigLoader, ControlPipeline, FrameBuffer, IngestionRunner,
    RuntimeState,
};

use crate::version::{visible_version, BASE_VERSION, BUILD_ID};

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "scale-vision", disable_version_flag = true)]
struct Cli {
    /// Path to the runtime config file.
    #[arg(
        long,
        global = true,
        env = "SCALE_VISION_CONFIG",
        default_value = "/etc/scale-vision/config.json"
    )]
    config: PathBuf,

    /// Show version and exit.
    #[arg(long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the recognition pipeline (the default).
    Run,
    /// Report missing devices, models and config; exit 2 on failure.
    InstallCheck,
    /// Probe the service and open the browser console.
    Ui {
        /// Override the console URL (default comes from config.http).
        #[arg(long)]
        url: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("scale-vision {BASE_VERSION} -> {} (build {BUILD_ID})", visible_version());
        return ExitCode::SUCCESS;
    }

    match cli.command {
        None | Some(Command::Run) => match run(cli.config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("scale-vision: {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::InstallCheck) => ExitCode::from(install_check(&cli.config)),
        Some(Command::Ui { url }) => ExitCode::from(ui_command(&cli.config, url)),
    }
}

// ── run ───────────────────────────────────────────────────────────────────────

fn run(config_path: PathBuf) -> Result<()> {
    ffmpeg_the_third::init().map_err(|e| anyhow!("ffmpeg init failed: {e}"))?;

    let loader = ConfigLoader::new(&config_path);
    let loaded = loader.load()?;
    let config = loaded.config.clone();

    let _log_guard = logging::init(&config.logging, true)?;
    info!(
        config_checksum = %loaded.checksum,
        version = %visible_version(),
        build_id = BUILD_ID,
        "startup"
    );

    let state = Arc::new(RuntimeState::new(config.clone(), config_path));
    let buffer = Arc::new(FrameBuffer::new(&config.ingestion.buffer));

    let mut runner = IngestionRunner::spawn(
        build_source(&config.ingestion),
        Arc::clone(&buffer),
        config.ingestion.normalize,
        config.ingestion.camera.freeze_detection,
        Arc::clone(&state.health),
        Arc::clone(&state.metrics),
    );

    let mut pipeline = ControlPipeline::new(
        Arc::clone(&state),
        buffer,
        runner.status_handle(),
        build_output(&config.output),
        loader,
    );
    pipeline.init_inference();
    let stop = pipeline.stop_handle();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_handle = config.http.enabled.then(move || {
        api::spawn(state, config.http.bind.clone(), config.http.port, shutdown_rx)
    });

    let (sig_tx, sig_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    })?;

    let control = std::thread::spawn(move || pipeline.run());

    // Block until SIGINT/SIGTERM, then tear down: control loop first (it
    // stops the output backend), then ingestion, then HTTP.
    let _ = sig_rx.recv();
    info!("shutdown_signal");
    stop.store(true, Ordering::Relaxed);
    let _ = control.join();
    let _ = shutdown_tx.send(());
    runner.stop();
    if let Some(handle) = http_handle {
        let _ = handle.join();
    }
    info!("shutdown_complete");
    Ok(())
}

// ── install-check ─────────────────────────────────────────────────────────────

fn install_check(config_path: &Path) -> u8 {
    let mut issues: Vec<String> = Vec::new();

    if !config_path.exists() {
        issues.push(format!("config_missing:{}", config_path.display()));
        return report(&issues);
    }
    let config = match ConfigLoader::new(config_path).load() {
        Ok(loaded) => loaded.config,
        Err(e) => {
            issues.push(format!("config_invalid:{e}"));
            return report(&issues);
        }
    };

    if config.ingestion.source == "camera" && !any_device("/dev", "video") {
        issues.push("camera_device_missing".into());
    }
    if config.output.backend == "serial" {
        let present = serialport::available_ports().map(|p| !p.is_empty()).unwrap_or(false);
        if !present {
            issues.push("serial_device_missing".into());
        }
    }
    if config.inference.backend == "onnx" {
        if !Path::new(&config.inference.model_path).exists() {
            issues.push("onnx_model_missing".into());
        }
        if !onnxruntime_present() {
            issues.push("onnxruntime_missing".into());
        }
    }
    report(&issues)
}

fn report(issues: &[String]) -> u8 {
    if issues.is_empty() {
        println!("install-check: OK");
        0
    } else {
        println!("install-check: FAIL");
        for issue in issues {
            println!("- {issue}");
        }
        2
    }
}

fn any_device(dir: &str, prefix: &str) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .any(|e| e.file_name().to_string_lossy().starts_with(prefix))
        })
        .unwrap_or(false)
}

fn onnxruntime_present() -> bool {
    if let Ok(path) = std::env::var("ORT_DYLIB_PATH") {
        if Path::new(&path).exists() {
            return true;
        }
    }
    ["/usr/lib", "/usr/local/lib", "/usr/lib/x86_64-linux-gnu", "/usr/lib/aarch64-linux-gnu"]
        .iter()
        .any(|dir| {
            fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .any(|e| e.file_name().to_string_lossy().starts_with("libonnxruntime"))
                })
                .unwrap_or(false)
        })
}

// ── ui ────────────────────────────────────────────────────────────────────────

fn ui_command(config_path: &Path, url_override: Option<String>) -> u8 {
    let url = match url_override {
        Some(url) => url,
        None => match ConfigLoader::new(config_path).load() {
            Ok(loaded) => {
                format!("http://{}:{}/", loaded.config.http.bind, loaded.config.http.port)
            }
            Err(e) => {
                eprintln!("ui: cannot load config: {e}");
                return 2;
            }
        },
    };

    // The console is served by the running service; don't open a browser
    // onto a dead endpoint.
    let probe = format!("{}/health", url.trim_end_matches('/'));
    match ureq::get(&probe).timeout(Duration::from_secs(2)).call() {
        Ok(_) | Err(ureq::Error::Status(_, _)) => {}
        Err(e) => {
            eprintln!("ui: service unreachable at {probe}: {e}");
            return 2;
        }
    }

    let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
    match std::process::Command::new(opener).arg(&url).spawn() {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("ui: failed to launch browser: {e}");
            2
        }
    }
}
