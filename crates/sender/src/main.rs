//! # ChronoSense Sender
//!
//! Lê sensores do host e transmite frames `v1,...,vN,checksum` via UDP.
//!
//! ## Uso
//! ```bash
//! chronosense_sender                          # config.toml ao lado do executável
//! chronosense_sender --dest 192.168.0.20 --port 5005
//! ```

mod monitor;
mod transmit;

use chronosense_core::checksum::ChecksumRegistry;
use chronosense_core::config::AppConfig;
use chronosense_core::device::{CooperativeLoop, DeviceState, EncodeTask};
use chronosense_core::protocol::FrameEncoder;
use chronosense_core::pulse::MonotonicClock;
use clap::Parser;
use monitor::{HostSensors, SensorTask};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use transmit::UdpTransmitTask;

#[derive(Parser)]
#[command(name = "chronosense_sender")]
#[command(about = "ChronoSense Sender – frames de sensores via UDP")]
struct Cli {
    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IP de destino (sobrepõe `sender.dest_ip`; um IP específico vira unicast)
    #[arg(short, long)]
    dest: Option<String>,

    /// Porta UDP (sobrepõe `sender.port`)
    #[arg(short, long)]
    port: Option<u16>,
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

    // ── Carregar config ──
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if let Some(dest) = cli.dest {
        config.sender.set_destination(&dest);
    }
    if let Some(port) = cli.port {
        config.sender.port = port;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config: {e}");
        }
        std::process::exit(1);
    }

    let sender_cfg = &config.sender;
    let interval = Duration::from_secs_f64(sender_cfg.interval_secs);
    let registry = ChecksumRegistry::with_defaults();
    let Some(algorithm) = registry.get(&sender_cfg.checksum_method) else {
        error!("Checksum desconhecido: {}", sender_cfg.checksum_method);
        std::process::exit(1);
    };

    // ── Socket UDP ──
    let transmit = match UdpTransmitTask::bind(sender_cfg, interval) {
        Ok(task) => task,
        Err(e) => {
            error!("Falha ao criar socket UDP: {e}");
            std::process::exit(1);
        }
    };
    let dest_addr = transmit.dest_addr().to_string();

    // ── Sensores ──
    let sensors = HostSensors::new();
    info!("Sensores do host inicializados");

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ CHRONOSENSE SENDER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Destino:   {dest_addr}");
    println!("  Intervalo: {:.1}s", sender_cfg.interval_secs);
    println!("  Checksum:  {}", algorithm.name());
    println!("══════════════════════════════════════════════");
    println!();

    let mut state = DeviceState::new(sender_cfg.max_fallback_failures);
    let mut device_loop = CooperativeLoop::new(MonotonicClock::default());
    device_loop.add_task(Box::new(SensorTask::new(sensors, interval)));
    device_loop.add_task(Box::new(EncodeTask::new(FrameEncoder::new(algorithm), interval)));
    device_loop.add_task(Box::new(transmit));

    // ── Loop principal ──
    let mut reported = 0;
    loop {
        device_loop.tick(&mut state);
        if state.frames_sent() >= reported + 10 {
            reported = state.frames_sent();
            info!(
                "{} frames enviados, {} descartados na fila",
                state.frames_sent(),
                state.frames_dropped()
            );
        }
        // Dormir até a próxima tarefa vencer
        std::thread::sleep(device_loop.until_next().max(Duration::from_millis(10)));
    }
}
