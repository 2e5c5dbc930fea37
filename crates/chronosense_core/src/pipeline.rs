//! Pipeline de ingestão do host.
//!
//! bytes → [`StreamReassembler`] → [`RecordParser`] → [`ChecksumValidator`]
//! → [`CalibrationEngine`] → [`TimeSeriesStore`].
//!
//! Cada pedaço é processado por completo antes do próximo. O pipeline é
//! dono exclusivo do store; a apresentação acompanha por eventos
//! ([`IngestPipeline::subscribe`]) ou consultando o estado diretamente.

use crate::calibration::{CalibrationEngine, CalibrationError, CalibrationProfile, CalibrationRequest};
use crate::checksum::ChecksumRegistry;
use crate::config::ReceiverConfig;
use crate::export::{self, ExportError};
use crate::reassembler::StreamReassembler;
use crate::record::{FieldRole, FieldValue, MalformedRecordError, Record, RecordParser, RenameError, SchemaChange};
use crate::store::{DisplayBuffer, Position, TimeSeriesPoint, TimeSeriesStore, TimeWindow};
use crate::validator::{ChecksumValidator, ValidationPolicy, Validity};
use crossbeam_channel::{Receiver, Sender};
use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A cada quantos pontos inseridos uma linha de status é registrada.
const STATUS_EVERY: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Algoritmo de checksum desconhecido: '{0}'")]
    UnknownChecksum(String),
}

/// Notificações para a camada de apresentação.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PointAppended { position: Position, validity: Validity },
    SchemaChanged(SchemaChange),
    CalibrationChanged {
        field: String,
        profile: Option<CalibrationProfile>,
        recalculated: usize,
    },
    Cleared,
}

/// Destino de um frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Appended { position: Position, validity: Validity },
    /// Inválido com `keep_invalid_data = false`.
    DiscardedInvalid,
    /// Linha em branco.
    Skipped,
    Malformed(MalformedRecordError),
}

/// Resumo de um pedaço processado.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub frames: usize,
    pub appended: usize,
    pub discarded_invalid: usize,
    pub malformed: usize,
    pub skipped: usize,
}

/// Contadores acumulados desde a criação do pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub appended: u64,
    pub invalid_kept: u64,
    pub discarded_invalid: u64,
    pub malformed: u64,
    pub blank: u64,
    /// Frames descartados pelo limite de tamanho.
    pub overflowed: u64,
    /// Fragmentos sem terminador descartados ao fechar o stream.
    pub trailing_discarded: u64,
}

#[derive(Debug)]
pub struct IngestPipeline {
    reassembler: StreamReassembler,
    parser: RecordParser,
    validator: ChecksumValidator,
    calibration: CalibrationEngine,
    store: TimeSeriesStore,
    display: DisplayBuffer,
    subscribers: Vec<Sender<PipelineEvent>>,
    stats: IngestStats,
}

impl IngestPipeline {
    pub fn new(validator: ChecksumValidator, max_frame_len: usize, display_limit: usize) -> Self {
        let parser = RecordParser::new(validator.policy().last_column_is_checksum);
        Self {
            reassembler: StreamReassembler::new(max_frame_len),
            parser,
            validator,
            calibration: CalibrationEngine::new(),
            store: TimeSeriesStore::new(),
            display: DisplayBuffer::new(display_limit),
            subscribers: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    /// Monta o pipeline a partir da seção `[receiver]`.
    pub fn from_config(config: &ReceiverConfig, registry: &ChecksumRegistry) -> Result<Self, PipelineError> {
        let algorithm = registry
            .get(&config.checksum_method)
            .ok_or_else(|| PipelineError::UnknownChecksum(config.checksum_method.clone()))?;
        let policy = ValidationPolicy {
            keep_invalid: config.keep_invalid_data,
            last_column_is_checksum: config.last_column_is_checksum,
        };
        info!(
            "Pipeline: checksum={} keep_invalid={} last_column_is_checksum={}",
            algorithm.name(),
            policy.keep_invalid,
            policy.last_column_is_checksum
        );
        Ok(Self::new(
            ChecksumValidator::new(algorithm, policy),
            config.max_frame_len,
            config.display_limit,
        ))
    }

    /// Substitui os perfis de calibração (ex.: carregados do disco).
    pub fn with_calibration(mut self, calibration: CalibrationEngine) -> Self {
        self.calibration = calibration;
        self
    }

    /// Registra um assinante de eventos. Assinantes desconectados são
    /// removidos na próxima publicação.
    pub fn subscribe(&mut self) -> Receiver<PipelineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: PipelineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ──────────────────────────────────────────────
    // Ingestão
    // ──────────────────────────────────────────────

    /// Processa um pedaço do transporte. Todos os frames completados por
    /// este pedaço recebem o mesmo instante de recepção.
    pub fn ingest_chunk(&mut self, chunk: &[u8], received_at: Timestamp) -> IngestReport {
        let mut report = IngestReport::default();
        for frame in self.reassembler.push_bytes(chunk) {
            report.frames += 1;
            match self.ingest_frame(&frame, received_at) {
                FrameOutcome::Appended { .. } => report.appended += 1,
                FrameOutcome::DiscardedInvalid => report.discarded_invalid += 1,
                FrameOutcome::Skipped => report.skipped += 1,
                FrameOutcome::Malformed(_) => report.malformed += 1,
            }
        }
        report
    }

    /// Processa um frame completo (sem o separador).
    pub fn ingest_frame(&mut self, frame: &str, received_at: Timestamp) -> FrameOutcome {
        self.stats.frames += 1;
        if frame.trim().is_empty() {
            debug!("Linha em branco ignorada");
            self.stats.blank += 1;
            return FrameOutcome::Skipped;
        }

        let parsed = match self.parser.parse(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Frame descartado ({e}): {:?}", truncate(frame, 64));
                self.stats.malformed += 1;
                return FrameOutcome::Malformed(e);
            }
        };
        if let Some(change) = parsed.schema_change {
            self.publish(PipelineEvent::SchemaChanged(change));
        }

        let mut record = parsed.record;
        let validity = self.validator.validate(&record);
        if !self.validator.admits(validity) {
            debug!("Registro inválido descartado: {frame}");
            self.stats.discarded_invalid += 1;
            return FrameOutcome::DiscardedInvalid;
        }
        if let Validity::Invalid(reason) = validity {
            debug!("Registro inválido mantido ({reason}): {frame}");
            self.stats.invalid_kept += 1;
        }

        self.apply_calibration(&mut record);
        let position = self.store.append(record, validity, received_at);
        self.display.push(position);
        self.stats.appended += 1;
        if self.stats.appended % STATUS_EVERY == 0 {
            info!(
                "{} pontos ({} válidos), {} frames recebidos",
                self.store.len(),
                self.store.valid_count(),
                self.stats.frames
            );
        }

        self.publish(PipelineEvent::PointAppended { position, validity });
        FrameOutcome::Appended { position, validity }
    }

    fn apply_calibration(&self, record: &mut Record) {
        for field in record.fields.iter_mut().filter(|f| f.role == FieldRole::Data) {
            if let FieldValue::Numeric { raw, calibrated } = &mut field.value {
                *calibrated = self.calibration.apply(&field.name, *raw);
            }
        }
    }

    /// Encerra o stream atual (desconexão). O fragmento sem terminador é
    /// descartado; o store fica intacto e a próxima conexão começa com o
    /// buffer vazio.
    pub fn close_stream(&mut self) {
        self.reassembler.close();
        let finished = self.reassembler.stats();
        self.stats.overflowed += finished.overflowed;
        self.stats.trailing_discarded += finished.trailing_discarded;
        self.reassembler.reset();
    }

    // ──────────────────────────────────────────────
    // Calibração e schema
    // ──────────────────────────────────────────────

    /// Deriva e instala um perfil para `field`, recalculando o histórico.
    ///
    /// Em caso de erro nenhum perfil é alterado. Retorna quantos pontos
    /// foram recalculados.
    pub fn calibrate(&mut self, field: &str, request: CalibrationRequest) -> Result<usize, CalibrationError> {
        if !self.is_calibratable(field) {
            return Err(CalibrationError::UnknownField(field.to_string()));
        }
        let profile = request.derive()?;
        self.calibration.set(field, profile);
        let recalculated = self.store.recalibrate(field, Some(&profile));
        self.publish(PipelineEvent::CalibrationChanged {
            field: field.to_string(),
            profile: Some(profile),
            recalculated,
        });
        Ok(recalculated)
    }

    /// Remove o perfil de `field` (volta à identidade).
    pub fn clear_calibration(&mut self, field: &str) -> Option<CalibrationProfile> {
        let removed = self.calibration.remove(field)?;
        info!("Calibração de '{field}' removida");
        let recalculated = self.store.recalibrate(field, None);
        self.publish(PipelineEvent::CalibrationChanged {
            field: field.to_string(),
            profile: None,
            recalculated,
        });
        Some(removed)
    }

    /// Campo de dados do schema atual (o checksum não é calibrável).
    fn is_calibratable(&self, field: &str) -> bool {
        let Some(schema) = self.parser.schema() else {
            return false;
        };
        match schema.position_of(field) {
            Some(index) => !(self.parser.last_column_is_checksum() && index + 1 == schema.len()),
            None => false,
        }
    }

    /// Renomeia a posição `index` do schema atual. Pontos guardados que
    /// ainda usam o nome antigo nessa posição (de qualquer schema) e o
    /// perfil de calibração acompanham o novo nome.
    pub fn rename_field(&mut self, index: usize, new_name: &str) -> Result<SchemaChange, RenameError> {
        let change = self.parser.rename(index, new_name)?;
        if let Some(previous) = &change.previous {
            let from = &previous.names[index];
            let to = &change.current.names[index];
            if from != to {
                let renamed = self.store.rename_field(index, from, to);
                self.store.retag_schema(previous.id, change.current.id);
                self.calibration.rename(from, to);
                info!("Campo '{from}' renomeado para '{to}' ({renamed} pontos)");
            }
        }
        self.publish(PipelineEvent::SchemaChanged(change.clone()));
        Ok(change)
    }

    /// Remove todos os pontos. Schema e calibração permanecem.
    pub fn clear(&mut self) {
        self.store.clear();
        self.display.clear();
        info!("Dados limpos");
        self.publish(PipelineEvent::Cleared);
    }

    // ──────────────────────────────────────────────
    // Consultas
    // ──────────────────────────────────────────────

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    pub fn stats(&self) -> IngestStats {
        let current = self.reassembler.stats();
        IngestStats {
            overflowed: self.stats.overflowed + current.overflowed,
            trailing_discarded: self.stats.trailing_discarded + current.trailing_discarded,
            ..self.stats
        }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.validator.policy()
    }

    pub fn checksum_method(&self) -> &str {
        self.validator.algorithm_name()
    }

    /// Nomes do schema atual (vazio antes do primeiro frame).
    pub fn field_names(&self) -> Vec<String> {
        self.parser
            .schema()
            .map(|s| s.names.clone())
            .unwrap_or_default()
    }

    /// Linhas visíveis, mais recente primeiro.
    pub fn visible_rows(&self, window: TimeWindow, now: Timestamp) -> Vec<&TimeSeriesPoint> {
        self.display.rows(&self.store, window, now).collect()
    }

    /// Exporta o store completo em CSV para `dir`.
    pub fn export(
        &self,
        dir: &Path,
        instance_name: &str,
        tz: &TimeZone,
        now: Timestamp,
    ) -> Result<PathBuf, ExportError> {
        export::export_to_dir(dir, instance_name, &self.store, &self.field_names(), tz, now)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
