//! # ChronoSense Core
//!
//! Crate compartilhada com o protocolo de frames em texto, o pipeline de
//! ingestão do host e os utilitários do lado do dispositivo.
//!
//! ## Módulos
//! - [`checksum`] – Algoritmos de checksum nomeados (`modSum`, `pairwiseOffsetSum`)
//! - [`protocol`] – Constantes de fio e o [`FrameEncoder`]
//! - [`reassembler`] – Stream em pedaços → frames completos
//! - [`record`] – Campos, registros e schema inferido
//! - [`validator`] – Validação de checksum e política de descarte
//! - [`calibration`] – Perfis lineares por campo
//! - [`store`] – Série temporal append-only e recorte exibido
//! - [`export`] – Exportação CSV e log CSV contínuo
//! - [`pipeline`] – Orquestra a ingestão e publica eventos
//! - [`config`] – Configuração unificada via TOML
//! - [`device`] – Estado e laço cooperativo do emissor
//! - [`pulse`] – Medição de pulso por máquina de estados (emissores com GPIO)

pub mod calibration;
pub mod checksum;
pub mod config;
pub mod device;
pub mod export;
pub mod pipeline;
pub mod protocol;
pub mod pulse;
pub mod reassembler;
pub mod record;
pub mod store;
pub mod validator;

// Re-exports convenientes
pub use calibration::{CalibrationEngine, CalibrationError, CalibrationProfile, CalibrationRequest};
pub use checksum::{ChecksumAlgorithm, ChecksumRegistry, MOD_SUM, PAIRWISE_OFFSET_SUM};
pub use config::{AppConfig, ReceiverConfig, SenderConfig};
pub use export::{CsvLog, ExportError};
pub use pipeline::{IngestPipeline, PipelineEvent};
pub use protocol::{FrameEncoder, Reading};
pub use pulse::{Clock, MonotonicClock, PulseMeter, measure_pulse};
pub use reassembler::StreamReassembler;
pub use record::{Record, RecordParser};
pub use store::{TimeSeriesStore, TimeWindow};
pub use validator::{ChecksumValidator, Validity};
