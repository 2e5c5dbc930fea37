//! Laço cooperativo do dispositivo emissor.
//!
//! Todo o estado do dispositivo fica em [`DeviceState`], passado a cada
//! [`PeriodicTask`]. As tarefas rodam até o fim, uma de cada vez, na
//! ordem em que foram registradas: uma tarefa lenta atrasa todas as
//! outras. Quem passa do próprio orçamento de tempo é registrado no log.

use crate::protocol::{FrameEncoder, Reading};
use crate::pulse::Clock;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Frames aguardando transmissão além deste limite descartam o mais antigo.
const OUTBOX_LIMIT: usize = 16;

/// Falha ao ler um sensor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Falha de leitura do sensor: {0}")]
pub struct SensorReadError(pub String);

/// Estado explícito do dispositivo.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// Leituras prontas para codificar.
    pending: Option<Vec<Reading>>,
    last_good: Option<Vec<Reading>>,
    failure_count: u32,
    max_fallback_failures: u32,
    outbox: VecDeque<String>,
    frames_sent: u64,
    frames_dropped: u64,
}

impl DeviceState {
    pub fn new(max_fallback_failures: u32) -> Self {
        Self {
            pending: None,
            last_good: None,
            failure_count: 0,
            max_fallback_failures,
            outbox: VecDeque::new(),
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Registra o resultado de uma leitura.
    ///
    /// Em caso de falha a última leitura boa é reaproveitada enquanto houver
    /// menos de `max_fallback_failures` falhas seguidas; depois disso nada é
    /// enviado até uma leitura ter sucesso.
    pub fn record_reading(&mut self, reading: Result<Vec<Reading>, SensorReadError>) {
        match reading {
            Ok(readings) => {
                self.failure_count = 0;
                self.last_good = Some(readings.clone());
                self.pending = Some(readings);
            }
            Err(e) => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.pending = match &self.last_good {
                    Some(last) if self.failure_count < self.max_fallback_failures => {
                        debug!("{e}; reenviando última leitura boa ({} falhas)", self.failure_count);
                        Some(last.clone())
                    }
                    _ => {
                        warn!("{e}; nada a enviar ({} falhas seguidas)", self.failure_count);
                        None
                    }
                };
            }
        }
    }

    pub fn take_pending(&mut self) -> Option<Vec<Reading>> {
        self.pending.take()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Enfileira um frame já codificado.
    pub fn queue_frame(&mut self, frame: String) {
        if self.outbox.len() >= OUTBOX_LIMIT {
            self.outbox.pop_front();
            self.frames_dropped += 1;
        }
        self.outbox.push_back(frame);
    }

    pub fn next_frame(&mut self) -> Option<String> {
        self.outbox.pop_front()
    }

    /// Devolve um frame que não pôde ser enviado ao início da fila.
    pub fn requeue_frame(&mut self, frame: String) {
        self.outbox.push_front(frame);
    }

    pub fn mark_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }
}

/// Tarefa periódica do laço cooperativo.
pub trait PeriodicTask {
    fn name(&self) -> &str;

    fn period(&self) -> Duration;

    /// Tempo máximo esperado de uma execução.
    fn budget(&self) -> Duration {
        self.period()
    }

    fn run(&mut self, state: &mut DeviceState);
}

/// Codifica as leituras pendentes em um frame e o enfileira.
#[derive(Debug, Clone)]
pub struct EncodeTask {
    encoder: FrameEncoder,
    period: Duration,
}

impl EncodeTask {
    pub fn new(encoder: FrameEncoder, period: Duration) -> Self {
        Self { encoder, period }
    }
}

impl PeriodicTask for EncodeTask {
    fn name(&self) -> &str {
        "encode"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run(&mut self, state: &mut DeviceState) {
        let Some(readings) = state.take_pending() else {
            return;
        };
        match self.encoder.encode_line(&readings) {
            Ok(line) => state.queue_frame(line),
            Err(e) => warn!("Frame não codificado: {e}"),
        }
    }
}

struct Scheduled {
    task: Box<dyn PeriodicTask + Send>,
    next_due: Duration,
}

/// Executa as tarefas vencidas, em ordem, até o fim.
pub struct CooperativeLoop<C: Clock> {
    clock: C,
    tasks: Vec<Scheduled>,
}

impl<C: Clock> CooperativeLoop<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            tasks: Vec::new(),
        }
    }

    /// Adiciona uma tarefa; a primeira execução é imediata.
    pub fn add_task(&mut self, task: Box<dyn PeriodicTask + Send>) {
        let next_due = self.clock.now();
        self.tasks.push(Scheduled { task, next_due });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Roda cada tarefa vencida. Retorna quantas rodaram.
    pub fn tick(&mut self, state: &mut DeviceState) -> usize {
        let mut ran = 0;
        for scheduled in self.tasks.iter_mut() {
            let started = self.clock.now();
            if started < scheduled.next_due {
                continue;
            }
            scheduled.task.run(state);
            let finished = self.clock.now();
            let elapsed = finished.saturating_sub(started);
            if elapsed > scheduled.task.budget() {
                warn!(
                    "Tarefa '{}' levou {:?} (orçamento {:?}); o laço ficou bloqueado",
                    scheduled.task.name(),
                    elapsed,
                    scheduled.task.budget()
                );
            }
            scheduled.next_due = started + scheduled.task.period();
            ran += 1;
        }
        ran
    }

    /// Tempo até a próxima tarefa vencer (zero se alguma já venceu).
    pub fn until_next(&self) -> Duration {
        let now = self.clock.now();
        self.tasks
            .iter()
            .map(|s| s.next_due.saturating_sub(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
