//! Apresentação em terminal.
//!
//! Consome os eventos do pipeline e imprime cada ponto novo; o comando
//! `show` redesenha o recorte visível inteiro.

use chronosense_core::pipeline::{IngestPipeline, PipelineEvent};
use chronosense_core::record::{Field, FieldRole, FieldValue};
use chronosense_core::store::{TimeSeriesPoint, TimeWindow};
use chronosense_core::validator::Validity;
use crossbeam_channel::Receiver;
use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::io::{self, Write};

pub struct Presenter<W: Write> {
    out: W,
    events: Receiver<PipelineEvent>,
    tz: TimeZone,
}

impl<W: Write> Presenter<W> {
    pub fn new(out: W, events: Receiver<PipelineEvent>, tz: TimeZone) -> Self {
        Self { out, events, tz }
    }

    #[cfg(test)]
    pub fn out(&mut self) -> &mut W {
        &mut self.out
    }

    /// Imprime os eventos pendentes.
    pub fn drain(&mut self, pipeline: &IngestPipeline) -> io::Result<()> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                PipelineEvent::PointAppended { position, .. } => {
                    if let Some(point) = pipeline.store().get(position) {
                        writeln!(self.out, "{}", format_row(point, &self.tz))?;
                    }
                }
                PipelineEvent::SchemaChanged(change) => {
                    writeln!(
                        self.out,
                        "── schema {:?}: {} ──",
                        change.kind,
                        change.current.names.join(" | ")
                    )?;
                }
                PipelineEvent::CalibrationChanged {
                    field,
                    profile,
                    recalculated,
                } => match profile {
                    Some(p) => writeln!(
                        self.out,
                        "── calibração de '{field}': ×{:.4} {:+.4} ({recalculated} pontos recalculados) ──",
                        p.slope, p.intercept
                    )?,
                    None => writeln!(
                        self.out,
                        "── calibração de '{field}' removida ({recalculated} pontos recalculados) ──"
                    )?,
                },
                PipelineEvent::Cleared => writeln!(self.out, "── dados limpos ──")?,
            }
        }
        self.out.flush()
    }

    /// Redesenha as linhas visíveis, mais recente primeiro.
    pub fn show(&mut self, pipeline: &IngestPipeline, window: TimeWindow, now: Timestamp) -> io::Result<()> {
        let rows = pipeline.visible_rows(window, now);
        writeln!(self.out, "      #  hora     | {}", pipeline.field_names().join(" | "))?;
        for point in &rows {
            writeln!(self.out, "{}", format_row(point, &self.tz))?;
        }
        writeln!(
            self.out,
            "── {} linhas visíveis (janela {window}), {} pontos no total ──",
            rows.len(),
            pipeline.store().len()
        )?;
        self.out.flush()
    }

    /// Mensagem avulsa para o usuário.
    pub fn notice(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{message}")?;
        self.out.flush()
    }
}

/// Uma linha da tabela: posição, hora local, campos e validade.
pub fn format_row(point: &TimeSeriesPoint, tz: &TimeZone) -> String {
    let time = point.received_at().to_zoned(tz.clone()).strftime("%H:%M:%S").to_string();
    let cells: Vec<String> = point.fields().iter().map(format_cell).collect();
    format!(
        "{:>7}  {time} | {} | {}",
        point.position(),
        cells.join(" | "),
        validity_mark(point.validity())
    )
}

/// Valores calibrados levam `*`.
fn format_cell(field: &Field) -> String {
    match &field.value {
        FieldValue::Numeric { raw, calibrated } if field.role == FieldRole::Data && raw != calibrated => {
            format!("{}*", field.value.display_text())
        }
        _ => field.value.display_text(),
    }
}

fn validity_mark(validity: Validity) -> String {
    match validity {
        Validity::Valid => "✓".into(),
        Validity::Invalid(reason) => format!("✗ {reason}"),
        Validity::Unchecked => "·".into(),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chronosense_core::calibration::CalibrationRequest;
    use chronosense_core::checksum::ChecksumRegistry;
    use chronosense_core::config::ReceiverConfig;

    fn at() -> Timestamp {
        Timestamp::from_second(1_700_000_000).unwrap()
    }

    fn setup() -> (IngestPipeline, Presenter<Vec<u8>>) {
        let mut pipeline =
            IngestPipeline::from_config(&ReceiverConfig::default(), &ChecksumRegistry::with_defaults()).unwrap();
        let events = pipeline.subscribe();
        (pipeline, Presenter::new(Vec::new(), events, TimeZone::UTC))
    }

    fn output(presenter: &mut Presenter<Vec<u8>>) -> String {
        String::from_utf8(std::mem::take(presenter.out())).unwrap()
    }

    #[test]
    fn prints_schema_then_rows() {
        let (mut pipeline, mut presenter) = setup();
        pipeline.ingest_chunk(b"23,45,8\n23,45,3\n", at());
        presenter.drain(&pipeline).unwrap();

        let text = output(&mut presenter);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "── schema Initial: field1 | field2 | field3 ──");
        assert_eq!(lines[1], "      0  22:13:20 | 23 | 45 | 8 | ✓");
        assert!(lines[2].ends_with("| 23 | 45 | 3 | ✗ checksum 3 ≠ esperado 8"));
    }

    #[test]
    fn calibrated_values_are_marked() {
        let (mut pipeline, mut presenter) = setup();
        pipeline.ingest_frame("10,0,1", at());
        pipeline
            .calibrate(
                "field1",
                CalibrationRequest::SinglePoint {
                    current_reading: 10.0,
                    expected_value: 15.0,
                },
            )
            .unwrap();
        presenter.drain(&pipeline).unwrap();
        presenter.show(&pipeline, TimeWindow::All, at()).unwrap();

        let text = output(&mut presenter);
        assert!(text.contains("calibração de 'field1'"));
        assert!(text.contains("| 15* | 0 | 1 |"));
        assert!(text.contains("1 linhas visíveis (janela all), 1 pontos no total"));
    }
}
