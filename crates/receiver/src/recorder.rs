//! Log CSV contínuo da sessão.
//!
//! Inscrito nos eventos do pipeline: cada ponto novo vira uma linha no
//! arquivo na hora; mudança de schema ou de calibração reescreve o arquivo
//! com o cabeçalho atual. Depois de um `clear` o próximo ponto abre um
//! arquivo novo, e o anterior fica intacto.

use chronosense_core::export::{CsvLog, ExportError};
use chronosense_core::pipeline::{IngestPipeline, PipelineEvent};
use chronosense_core::store::Position;
use crossbeam_channel::Receiver;
use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::path::{Path, PathBuf};
use tracing::error;

pub struct Recorder {
    dir: PathBuf,
    instance_name: String,
    tz: TimeZone,
    events: Receiver<PipelineEvent>,
    log: Option<CsvLog>,
    disabled: bool,
}

/// O que precisa ser gravado depois de um lote de eventos.
#[derive(Debug, Default)]
struct Pending {
    appended: Vec<Position>,
    rewrite: bool,
    restart: bool,
}

impl Recorder {
    pub fn new(
        dir: PathBuf,
        instance_name: &str,
        tz: TimeZone,
        events: Receiver<PipelineEvent>,
    ) -> Self {
        Self {
            dir,
            instance_name: instance_name.to_string(),
            tz,
            events,
            log: None,
            disabled: false,
        }
    }

    /// Arquivo em uso, se algum ponto já foi gravado.
    pub fn path(&self) -> Option<&Path> {
        self.log.as_ref().map(CsvLog::path)
    }

    /// Grava o que chegou desde a última chamada. Um erro de disco desliga
    /// o log até o fim da sessão.
    pub fn drain(&mut self, pipeline: &IngestPipeline) {
        let mut pending = Pending::default();
        while let Ok(event) = self.events.try_recv() {
            match event {
                PipelineEvent::PointAppended { position, .. } => pending.appended.push(position),
                PipelineEvent::SchemaChanged(_) | PipelineEvent::CalibrationChanged { .. } => {
                    pending.rewrite = true;
                }
                PipelineEvent::Cleared => {
                    pending = Pending {
                        restart: true,
                        ..Pending::default()
                    };
                }
            }
        }
        if self.disabled {
            return;
        }
        if let Err(e) = self.write(pipeline, pending) {
            error!("Log CSV desligado: {e}");
            self.disabled = true;
            self.log = None;
        }
    }

    fn write(&mut self, pipeline: &IngestPipeline, pending: Pending) -> Result<(), ExportError> {
        if pending.restart {
            self.log = None;
        }
        let store = pipeline.store();
        let names = pipeline.field_names();

        match self.log.as_mut() {
            None if store.is_empty() => {}
            None => {
                let log = CsvLog::create(
                    &self.dir,
                    &self.instance_name,
                    store,
                    &names,
                    &self.tz,
                    Timestamp::now(),
                )?;
                self.log = Some(log);
            }
            Some(log) if pending.rewrite || log.field_names() != names.as_slice() => {
                log.rewrite(store, &names, &self.tz)?;
            }
            Some(log) => {
                for position in pending.appended {
                    if let Some(point) = store.get(position) {
                        log.append(point, &self.tz)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
