//! Envio dos frames por UDP (broadcast ou unicast).

use chronosense_core::config::SenderConfig;
use chronosense_core::device::{DeviceState, PeriodicTask};
use std::io;
use std::net::UdpSocket;
use std::time::Duration;
use tracing::{error, info};

pub struct UdpTransmitTask {
    sock: UdpSocket,
    dest_addr: String,
    period: Duration,
}

impl UdpTransmitTask {
    /// Cria o socket conforme a configuração.
    pub fn bind(config: &SenderConfig, period: Duration) -> io::Result<Self> {
        let bind_addr = if config.bind_ip.is_empty() {
            "0.0.0.0:0".to_string()
        } else {
            format!("{}:0", config.bind_ip)
        };
        let sock = UdpSocket::bind(bind_addr)?;

        if config.is_broadcast() {
            sock.set_broadcast(true)?;
            info!("Modo BROADCAST ativado");
        } else {
            info!("Modo UNICAST → {}", config.dest_ip);
        }

        Ok(Self {
            sock,
            dest_addr: format!("{}:{}", config.dest_ip, config.port),
            period,
        })
    }

    pub fn dest_addr(&self) -> &str {
        &self.dest_addr
    }
}

impl PeriodicTask for UdpTransmitTask {
    fn name(&self) -> &str {
        "transmit"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn run(&mut self, state: &mut DeviceState) {
        while let Some(frame) = state.next_frame() {
            match self.sock.send_to(frame.as_bytes(), &self.dest_addr) {
                Ok(sent) => {
                    state.mark_sent();
                    info!("→ {sent} bytes para {} | {}", self.dest_addr, frame.trim_end());
                }
                Err(e) => {
                    error!("Erro ao enviar UDP: {e}");
                    state.requeue_frame(frame);
                    break;
                }
            }
        }
    }
}
