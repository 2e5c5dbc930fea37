//! # ChronoSense Receiver
//!
//! Ingere frames de sensores (UDP, TCP ou arquivo), valida o checksum,
//! aplica calibração e mantém a série temporal para exibição e
//! exportação CSV.
//!
//! ## Uso
//! ```bash
//! chronosense_receiver                              # fonte do config (UDP por padrão)
//! chronosense_receiver --source serial://            # micro:bit via USB, detectado
//! chronosense_receiver --source serial:///dev/ttyACM0@115200
//! chronosense_receiver --source tcp://10.0.0.5:9000
//! chronosense_receiver --source file://captura.txt
//! ```
//! Digite `help` no terminal para ver os comandos.

mod console;
mod presenter;
mod reader;
mod recorder;
mod session;
mod transport;

use chronosense_core::calibration::CalibrationEngine;
use chronosense_core::checksum::ChecksumRegistry;
use chronosense_core::config::AppConfig;
use chronosense_core::pipeline::IngestPipeline;
use clap::Parser;
use jiff::tz::TimeZone;
use presenter::Presenter;
use session::{Session, SessionSettings};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn};
use transport::SourceSpec;

#[derive(Parser)]
#[command(name = "chronosense_receiver")]
#[command(about = "ChronoSense Receiver – ingestão, validação e calibração de frames")]
struct Cli {
    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fonte: serial://[porta][@baud], udp, tcp://host:porta ou file://caminho
    /// (sobrepõe `receiver.source`)
    #[arg(short, long)]
    source: Option<String>,

    /// Porta UDP (sobrepõe `receiver.port`)
    #[arg(short, long)]
    port: Option<u16>,
}

/// Caminhos relativos do config valem a partir da pasta do config.
fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // ── Config ──
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if let Some(source) = cli.source {
        config.receiver.source = source;
    }
    if let Some(port) = cli.port {
        config.receiver.port = port;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config: {e}");
        }
        std::process::exit(1);
    }

    let recv_cfg = &config.receiver;
    let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let source = match SourceSpec::parse(&recv_cfg.source, recv_cfg.port, &recv_cfg.sender_ip) {
        Ok(source) => source,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // ── Pipeline ──
    let calibration_file = resolve(&base, &recv_cfg.calibration_file);
    let calibration = CalibrationEngine::load(&calibration_file).unwrap_or_else(|e| {
        warn!("Perfis de calibração ignorados: {e}");
        CalibrationEngine::new()
    });
    let mut pipeline = match IngestPipeline::from_config(recv_cfg, &ChecksumRegistry::with_defaults()) {
        Ok(pipeline) => pipeline.with_calibration(calibration),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let tz = TimeZone::system();
    let presenter = Presenter::new(std::io::stdout(), pipeline.subscribe(), tz.clone());
    let auto_export = (recv_cfg.auto_export_interval_minutes > 0)
        .then(|| Duration::from_secs(u64::from(recv_cfg.auto_export_interval_minutes) * 60));
    let settings = SessionSettings {
        source: source.clone(),
        window: recv_cfg.time_window(),
        export_dir: resolve(&base, &recv_cfg.export_dir),
        instance_name: recv_cfg.instance_name.clone(),
        calibration_file,
        auto_export,
        log_dir: (!recv_cfg.log_dir.is_empty()).then(|| resolve(&base, &recv_cfg.log_dir)),
        tz,
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ CHRONOSENSE RECEIVER");
    println!("══════════════════════════════════════════════");
    println!("  Fonte:      {}", source.describe());
    println!("  Checksum:   {}", pipeline.checksum_method());
    println!("  Inválidos:  {}", if recv_cfg.keep_invalid_data { "mantidos" } else { "descartados" });
    println!("  Janela:     {}", settings.window);
    match settings.auto_export {
        Some(_) => println!("  Auto-export: a cada {} min", recv_cfg.auto_export_interval_minutes),
        None => println!("  Auto-export: desligado"),
    }
    match &settings.log_dir {
        Some(dir) => println!("  Log CSV:    {}", dir.display()),
        None => println!("  Log CSV:    desligado"),
    }
    println!("══════════════════════════════════════════════");
    println!("  Digite `help` para ver os comandos.");
    println!();

    let mut session = Session::new(pipeline, presenter, settings);
    if let Err(e) = session.connect() {
        error!("Falha ao conectar: {e} (use connect para tentar de novo)");
    }
    session.run(console::spawn_stdin_reader());
}
