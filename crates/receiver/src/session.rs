//! Sessão de ingestão.
//!
//! Dona exclusiva do [`IngestPipeline`]: recebe pedaços da thread de
//! leitura, comandos do terminal e o tick de exportação automática, um de
//! cada vez. Cada pedaço é processado por completo antes do próximo.

use crate::console::{Command, HELP, parse_command};
use crate::presenter::Presenter;
use crate::reader::{ReaderHandle, ReaderMessage, spawn_reader};
use crate::recorder::Recorder;
use crate::transport::{SourceSpec, TransportError};
use chronosense_core::pipeline::IngestPipeline;
use chronosense_core::store::TimeWindow;
use crossbeam_channel::{Receiver, never, select, tick};
use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Estado do transporte.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    Connected,
    /// A fonte terminou normalmente (fim de arquivo).
    Ended,
    /// Desconectado pelo usuário.
    Disconnected,
    /// O transporte falhou; comandos de dados ficam bloqueados até reconectar.
    Failed(String),
}

impl LinkState {
    fn allows_data_commands(&self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Ended)
    }
}

/// Parâmetros da sessão que não pertencem ao pipeline.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub source: SourceSpec,
    pub window: TimeWindow,
    pub export_dir: PathBuf,
    pub instance_name: String,
    pub calibration_file: PathBuf,
    pub auto_export: Option<Duration>,
    /// Diretório do log CSV contínuo (`None` = sem log).
    pub log_dir: Option<PathBuf>,
    pub tz: TimeZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Session<W: Write> {
    pipeline: IngestPipeline,
    presenter: Presenter<W>,
    recorder: Option<Recorder>,
    settings: SessionSettings,
    reader: Option<ReaderHandle>,
    link: LinkState,
    last_export: Option<Instant>,
}

impl<W: Write> Session<W> {
    /// `presenter` deve estar inscrito em `pipeline`.
    pub fn new(mut pipeline: IngestPipeline, presenter: Presenter<W>, settings: SessionSettings) -> Self {
        let recorder = settings.log_dir.clone().map(|dir| {
            Recorder::new(dir, &settings.instance_name, settings.tz.clone(), pipeline.subscribe())
        });
        Self {
            pipeline,
            presenter,
            recorder,
            settings,
            reader: None,
            link: LinkState::Disconnected,
            last_export: None,
        }
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    // ──────────────────────────────────────────────
    // Transporte
    // ──────────────────────────────────────────────

    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.reader.is_some() {
            return Ok(());
        }
        match spawn_reader(self.settings.source.clone()) {
            Ok(reader) => {
                self.reader = Some(reader);
                self.link = LinkState::Connected;
                Ok(())
            }
            Err(e) => {
                self.link = LinkState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Encerra a leitura. Store e perfis ficam intactos.
    pub fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
            info!("Desconectado de {}", self.settings.source.describe());
        }
        self.pipeline.close_stream();
        self.link = LinkState::Disconnected;
    }

    fn on_reader_message(&mut self, msg: ReaderMessage) {
        match msg {
            ReaderMessage::Chunk(bytes) => {
                self.pipeline.ingest_chunk(&bytes, Timestamp::now());
                self.present();
            }
            ReaderMessage::Ended(ending) => {
                if let Some(reader) = self.reader.take() {
                    reader.stop();
                }
                self.pipeline.close_stream();
                self.link = match ending {
                    None => LinkState::Ended,
                    Some(e) => LinkState::Failed(e.to_string()),
                };
                let message = match &self.link {
                    LinkState::Failed(reason) => format!("Transporte falhou: {reason} (use connect)"),
                    _ => "Fim do stream".to_string(),
                };
                self.notice(&message);
            }
        }
    }

    /// Leva os eventos pendentes ao terminal e ao log CSV.
    fn present(&mut self) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.drain(&self.pipeline);
        }
        if let Err(e) = self.presenter.drain(&self.pipeline) {
            warn!("Erro ao escrever no terminal: {e}");
        }
    }

    fn notice(&mut self, message: &str) {
        if let Err(e) = self.presenter.notice(message) {
            warn!("Erro ao escrever no terminal: {e}");
        }
    }

    // ──────────────────────────────────────────────
    // Comandos
    // ──────────────────────────────────────────────

    /// Interpreta e executa uma linha digitada.
    pub fn handle_line(&mut self, line: &str) -> Flow {
        match parse_command(line) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) => Flow::Continue,
            Err(e) => {
                self.notice(&e.to_string());
                Flow::Continue
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Flow {
        if command.needs_link() && !self.link.allows_data_commands() {
            self.notice("Sem conexão: use connect antes deste comando");
            return Flow::Continue;
        }

        match command {
            Command::Show(window) => {
                if let Some(window) = window {
                    self.settings.window = window;
                }
                if let Err(e) = self.presenter.show(&self.pipeline, self.settings.window, Timestamp::now()) {
                    warn!("Erro ao escrever no terminal: {e}");
                }
            }
            Command::Calibrate { field, request } => match self.pipeline.calibrate(&field, request) {
                Ok(_) => {
                    self.present();
                    self.save_calibration();
                }
                Err(e) => self.notice(&format!("Calibração não aplicada: {e}")),
            },
            Command::ClearCalibration(field) => {
                if self.pipeline.clear_calibration(&field).is_some() {
                    self.present();
                    self.save_calibration();
                } else {
                    self.notice(&format!("'{field}' não tem calibração"));
                }
            }
            Command::ListCalibration => {
                let lines: Vec<String> = self
                    .pipeline
                    .calibration()
                    .profiles()
                    .map(|(field, p)| format!("  {field}: ×{:.4} {:+.4} ({:?})", p.slope, p.intercept, p.method))
                    .collect();
                if lines.is_empty() {
                    self.notice("Nenhuma calibração ativa");
                } else {
                    self.notice(&lines.join("\n"));
                }
            }
            Command::Rename { index, name } => match self.pipeline.rename_field(index, &name) {
                Ok(_) => {
                    self.present();
                    self.save_calibration();
                }
                Err(e) => self.notice(&format!("Renomeação recusada: {e}")),
            },
            Command::Export => {
                self.export();
            }
            Command::Clear => {
                self.pipeline.clear();
                self.present();
            }
            Command::Disconnect => self.disconnect(),
            Command::Connect => {
                if let Err(e) = self.connect() {
                    self.notice(&format!("Falha ao conectar: {e}"));
                }
            }
            Command::Stats => {
                let s = self.pipeline.stats();
                let message = format!(
                    "frames {} | pontos {} ({} válidos) | inválidos mantidos {} | descartados {} | malformados {} | em branco {} | longos demais {} | fragmentos finais {} | link {:?}",
                    s.frames,
                    self.pipeline.store().len(),
                    self.pipeline.store().valid_count(),
                    s.invalid_kept,
                    s.discarded_invalid,
                    s.malformed,
                    s.blank,
                    s.overflowed,
                    s.trailing_discarded,
                    self.link
                );
                self.notice(&message);
            }
            Command::Help => self.notice(HELP),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn save_calibration(&self) {
        if let Err(e) = self.pipeline.calibration().save(&self.settings.calibration_file) {
            warn!("Perfis de calibração não salvos: {e}");
        }
    }

    /// Exporta o store completo. Retorna o arquivo criado.
    pub fn export(&mut self) -> Option<PathBuf> {
        let result = self.pipeline.export(
            &self.settings.export_dir,
            &self.settings.instance_name,
            &self.settings.tz,
            Timestamp::now(),
        );
        match result {
            Ok(path) => {
                self.last_export = Some(Instant::now());
                self.notice(&format!("Exportado: {}", path.display()));
                Some(path)
            }
            Err(e) => {
                self.notice(&format!("Exportação falhou: {e}"));
                None
            }
        }
    }

    fn auto_export(&mut self) {
        if self.link != LinkState::Connected || self.pipeline.store().is_empty() {
            return;
        }
        info!("Exportação automática");
        self.export();
    }

    // ──────────────────────────────────────────────
    // Laço principal
    // ──────────────────────────────────────────────

    /// Roda até `quit`. `stdin` fecha quando a entrada termina; a sessão
    /// continua só com o transporte.
    pub fn run(&mut self, stdin: Receiver<String>) {
        let mut stdin_open = true;
        let export_tick = match self.settings.auto_export {
            Some(period) => tick(period),
            None => never(),
        };

        loop {
            let data = self
                .reader
                .as_ref()
                .map(|r| r.receiver().clone())
                .unwrap_or_else(never);
            let commands = if stdin_open { stdin.clone() } else { never() };

            select! {
                recv(data) -> msg => match msg {
                    Ok(msg) => self.on_reader_message(msg),
                    // Thread de leitura sumiu sem avisar
                    Err(_) => self.on_reader_message(ReaderMessage::Ended(Some(TransportError::Closed(
                        self.settings.source.describe(),
                    )))),
                },
                recv(commands) -> line => match line {
                    Ok(line) => {
                        if self.handle_line(&line) == Flow::Quit {
                            break;
                        }
                    }
                    Err(_) => stdin_open = false,
                },
                recv(export_tick) -> _ => self.auto_export(),
            }
        }

        self.disconnect();
        if let Some(at) = self.last_export {
            info!("Última exportação há {:?}", at.elapsed());
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chronosense_core::calibration::CalibrationEngine;
    use chronosense_core::checksum::ChecksumRegistry;
    use chronosense_core::config::ReceiverConfig;
    use std::io::Write as _;

    struct Fixture {
        dir: tempfile::TempDir,
        session: Session<Vec<u8>>,
    }

    fn fixture(frames: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.txt");
        std::fs::File::create(&capture).unwrap().write_all(frames).unwrap();

        let mut pipeline =
            IngestPipeline::from_config(&ReceiverConfig::default(), &ChecksumRegistry::with_defaults()).unwrap();
        let presenter = Presenter::new(Vec::new(), pipeline.subscribe(), TimeZone::UTC);
        let settings = SessionSettings {
            source: SourceSpec::File(capture),
            window: TimeWindow::All,
            export_dir: dir.path().join("exports"),
            instance_name: "teste".into(),
            calibration_file: dir.path().join("calibration.toml"),
            auto_export: None,
            log_dir: None,
            tz: TimeZone::UTC,
        };
        Fixture {
            session: Session::new(pipeline, presenter, settings),
            dir,
        }
    }

    /// Consome a thread de leitura até o fim do arquivo.
    fn replay(session: &mut Session<Vec<u8>>) {
        session.connect().unwrap();
        loop {
            let msg = session
                .reader
                .as_ref()
                .unwrap()
                .receiver()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
            let ended = matches!(msg, ReaderMessage::Ended(_));
            session.on_reader_message(msg);
            if ended {
                break;
            }
        }
    }

    fn output(session: &mut Session<Vec<u8>>) -> String {
        String::from_utf8(std::mem::take(session.presenter.out())).unwrap()
    }

    #[test]
    fn file_replay_fills_store() {
        let mut f = fixture(b"23,45,8\n23,45,3\n7,7\n12,");
        replay(&mut f.session);
        assert_eq!(f.session.link(), &LinkState::Ended);
        assert_eq!(f.session.pipeline().store().len(), 3);
        assert_eq!(f.session.pipeline().stats().trailing_discarded, 1);
        assert!(output(&mut f.session).contains("Fim do stream"));
    }

    #[test]
    fn data_commands_refused_while_disconnected() {
        let mut f = fixture(b"23,45,8\n");
        f.session.handle_line("export");
        assert!(output(&mut f.session).contains("Sem conexão"));
        assert!(!f.dir.path().join("exports").exists());

        // Comandos de consulta continuam disponíveis
        assert_eq!(f.session.handle_line("stats"), Flow::Continue);
        assert!(output(&mut f.session).contains("frames 0"));
    }

    #[test]
    fn calibrate_persists_profiles() {
        let mut f = fixture(b"10,0,1\n");
        replay(&mut f.session);
        f.session.handle_line("cal single field1 10 15");

        let point = &f.session.pipeline().store().points()[0];
        assert_eq!(point.field("field1").unwrap().value.calibrated(), Some(15.0));
        let saved = CalibrationEngine::load(&f.dir.path().join("calibration.toml")).unwrap();
        assert_eq!(saved.apply("field1", 10.0), 15.0);
    }

    #[test]
    fn bad_calibration_is_reported() {
        let mut f = fixture(b"10,0,1\n");
        replay(&mut f.session);
        output(&mut f.session);
        f.session.handle_line("cal two field1 5 0 5 10");
        assert!(output(&mut f.session).contains("Calibração não aplicada"));
        assert!(f.session.pipeline().calibration().is_empty());
    }

    #[test]
    fn export_after_replay() {
        let mut f = fixture(b"23,45,8\n23,45,3\n");
        replay(&mut f.session);
        let path = f.session.export().unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.lines().nth(2).unwrap().ends_with(",invalid"));
    }

    #[test]
    fn rename_and_quit() {
        let mut f = fixture(b"23,45,8\n");
        replay(&mut f.session);
        f.session.handle_line("rename 2 humidity");
        assert_eq!(
            f.session.pipeline().field_names(),
            vec!["field1", "humidity", "field3"]
        );
        assert_eq!(f.session.handle_line("quit"), Flow::Quit);
    }

    #[test]
    fn replay_is_logged_as_it_arrives() {
        let mut f = fixture(b"10,0\n10,5,5\n");
        let logs = f.dir.path().join("logs");
        let events = f.session.pipeline.subscribe();
        f.session.recorder = Some(Recorder::new(logs.clone(), "teste", TimeZone::UTC, events));

        replay(&mut f.session);
        f.session.handle_line("rename 1 temp");

        let files: Vec<_> = std::fs::read_dir(&logs).unwrap().collect();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains(",temp,field2,field3,"));
        assert!(lines[1].ends_with(",10,0,,valid"));
    }

    #[test]
    fn disconnect_keeps_store() {
        let mut f = fixture(b"23,45,8\n");
        replay(&mut f.session);
        f.session.handle_line("disconnect");
        assert_eq!(f.session.link(), &LinkState::Disconnected);
        assert_eq!(f.session.pipeline().store().len(), 1);
    }
}
