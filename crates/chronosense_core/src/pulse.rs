//! Medição de largura de pulso sem espera ativa.
//!
//! O [`PulseMeter`] é uma máquina de estados alimentada por amostras do
//! pino e por um relógio monotônico. Cada estado tem um prazo; estourá-lo
//! encerra a medição com [`PulseTimeout`]. Como o relógio é injetado
//! ([`Clock`]), os timeouts são testáveis sem hardware.
//!
//! Biblioteca para emissores com pinos GPIO (sensor ultrassônico de eco,
//! DHT11 de um fio). O `chronosense_sender` lê sensores do host e não usa
//! este módulo; um emissor de placa monta um [`PeriodicTask`] com
//! [`measure_pulse`] lendo o pino e grava em
//! [`DeviceState::record_reading`].
//!
//! [`PeriodicTask`]: crate::device::PeriodicTask
//! [`DeviceState::record_reading`]: crate::device::DeviceState::record_reading

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Velocidade do som em cm/µs (≈ 343 m/s).
const SOUND_CM_PER_MICRO: f64 = 0.0343;

/// Limite entre bit 0 e bit 1 de um sensor DHT (tempo em nível alto).
pub const DHT_ONE_THRESHOLD: Duration = Duration::from_micros(40);

/// Relógio monotônico (tempo desde uma origem arbitrária).
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Relógio real, baseado em [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Relógio avançado manualmente. Clones compartilham o mesmo tempo.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// Fase em que a medição estourou o prazo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PulseTimeout {
    #[error("Pulso não começou dentro do prazo")]
    NoRise,

    #[error("Pulso não terminou dentro do prazo")]
    NoFall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseState {
    /// Esperando o pino subir.
    AwaitingRise { deadline: Duration },
    /// Pino alto desde `rose_at`.
    Measuring { rose_at: Duration, deadline: Duration },
    Done(Duration),
    TimedOut(PulseTimeout),
}

/// Mede um pulso em nível alto.
#[derive(Debug, Clone, Copy)]
pub struct PulseMeter {
    state: PulseState,
    max_width: Duration,
}

impl PulseMeter {
    /// Começa a medição em `now`. `rise_timeout` limita a espera pela
    /// subida; `max_width` limita a duração do pulso.
    pub fn start(now: Duration, rise_timeout: Duration, max_width: Duration) -> Self {
        Self {
            state: PulseState::AwaitingRise {
                deadline: now + rise_timeout,
            },
            max_width,
        }
    }

    pub fn state(&self) -> PulseState {
        self.state
    }

    /// Avança a máquina com uma amostra do pino lida em `now`.
    pub fn sample(&mut self, level: PinLevel, now: Duration) -> PulseState {
        self.state = match self.state {
            PulseState::AwaitingRise { .. } if level == PinLevel::High => PulseState::Measuring {
                rose_at: now,
                deadline: now + self.max_width,
            },
            PulseState::AwaitingRise { deadline } if now > deadline => {
                PulseState::TimedOut(PulseTimeout::NoRise)
            }
            PulseState::Measuring { rose_at, .. } if level == PinLevel::Low => {
                PulseState::Done(now.saturating_sub(rose_at))
            }
            PulseState::Measuring { deadline, .. } if now > deadline => {
                PulseState::TimedOut(PulseTimeout::NoFall)
            }
            unchanged => unchanged,
        };
        self.state
    }

    /// Largura medida, erro de prazo ou `None` se ainda em andamento.
    pub fn result(&self) -> Option<Result<Duration, PulseTimeout>> {
        match self.state {
            PulseState::Done(width) => Some(Ok(width)),
            PulseState::TimedOut(timeout) => Some(Err(timeout)),
            _ => None,
        }
    }
}

/// Conduz um [`PulseMeter`] até o fim lendo o pino com `read_pin`.
///
/// Bloqueia quem chama até o pulso terminar ou um prazo estourar.
pub fn measure_pulse<C: Clock>(
    clock: &C,
    mut read_pin: impl FnMut() -> PinLevel,
    rise_timeout: Duration,
    max_width: Duration,
) -> Result<Duration, PulseTimeout> {
    let mut meter = PulseMeter::start(clock.now(), rise_timeout, max_width);
    loop {
        let level = read_pin();
        meter.sample(level, clock.now());
        if let Some(result) = meter.result() {
            return result;
        }
    }
}

/// Distância em cm a partir da largura do eco de um sensor ultrassônico
/// (ida e volta).
pub fn echo_distance_cm(echo: Duration) -> f64 {
    echo.as_micros() as f64 * SOUND_CM_PER_MICRO / 2.0
}

/// Bit de um sensor DHT a partir do tempo em nível alto.
pub fn dht_bit(high_time: Duration) -> u8 {
    u8::from(high_time > DHT_ONE_THRESHOLD)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DhtError {
    #[error("Checksum DHT inválido (esperado {expected}, recebido {received})")]
    Checksum { expected: u8, received: u8 },

    #[error("Leitura DHT fora da faixa: umidade {humidity}%, temperatura {temperature}°C")]
    OutOfRange { humidity: u8, temperature: u8 },
}

/// Leitura inteira de um DHT11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhtReading {
    pub humidity: u8,
    pub temperature: u8,
}

/// Decodifica os 40 bits de um DHT11: umidade, decimal, temperatura,
/// decimal e checksum (soma dos quatro bytes, módulo 256).
pub fn decode_dht(bits: &[u8; 40]) -> Result<DhtReading, DhtError> {
    let mut bytes = [0u8; 5];
    for (byte, chunk) in bytes.iter_mut().zip(bits.chunks(8)) {
        *byte = chunk.iter().fold(0, |acc, bit| (acc << 1) | (bit & 1));
    }

    let expected = bytes[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if expected != bytes[4] {
        return Err(DhtError::Checksum {
            expected,
            received: bytes[4],
        });
    }

    let (humidity, temperature) = (bytes[0], bytes[2]);
    if humidity == 0 || humidity > 100 || temperature == 0 || temperature > 80 {
        return Err(DhtError::OutOfRange {
            humidity,
            temperature,
        });
    }
    Ok(DhtReading {
        humidity,
        temperature,
    })
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
