//! Comandos digitados no terminal.

use chronosense_core::calibration::{CalibrationError, CalibrationRequest, parse_input};
use chronosense_core::store::TimeWindow;
use crossbeam_channel::{Receiver, bounded};
use std::io::BufRead;
use tracing::{debug, warn};

pub const HELP: &str = "\
Comandos:
  show [minutos|all]                     mostra as linhas visíveis (e ajusta a janela)
  cal single <campo> <lido> <esperado>    calibração de ponto único
  cal two <campo> <cru1> <esp1> <cru2> <esp2>
                                         calibração de dois pontos
  cal clear <campo>                      remove a calibração do campo
  cal list                               lista os perfis ativos
  rename <n> <nome>                      renomeia o n-ésimo campo (1 = primeiro)
  export                                 exporta todos os pontos em CSV
  clear                                  apaga todos os pontos
  disconnect | connect                   encerra / reabre o transporte
  stats                                  contadores de ingestão
  help                                   esta ajuda
  quit                                   sai";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Show(Option<TimeWindow>),
    Calibrate { field: String, request: CalibrationRequest },
    ClearCalibration(String),
    ListCalibration,
    /// Posição base zero.
    Rename { index: usize, name: String },
    Export,
    Clear,
    Disconnect,
    Connect,
    Stats,
    Help,
    Quit,
}

impl Command {
    /// Comandos que dependem de um transporte ativo.
    pub fn needs_link(&self) -> bool {
        matches!(
            self,
            Command::Calibrate { .. } | Command::ClearCalibration(_) | Command::Export
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Comando desconhecido: '{0}' (digite help)")]
    Unknown(String),

    #[error("Uso: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("{0}")]
    Window(String),
}

/// Interpreta uma linha. Linhas vazias retornam `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (head.to_lowercase().as_str(), args) {
        ("show", []) => Command::Show(None),
        ("show", [window]) => Command::Show(Some(window.parse().map_err(CommandError::Window)?)),
        ("show", _) => return Err(CommandError::Usage("show [minutos|all]")),

        ("cal", ["single", field, current, expected]) => Command::Calibrate {
            field: field.to_string(),
            request: CalibrationRequest::SinglePoint {
                current_reading: parse_input(current)?,
                expected_value: parse_input(expected)?,
            },
        },
        ("cal", ["two", field, low_raw, low_expected, high_raw, high_expected]) => Command::Calibrate {
            field: field.to_string(),
            request: CalibrationRequest::TwoPoint {
                low_raw: parse_input(low_raw)?,
                low_expected: parse_input(low_expected)?,
                high_raw: parse_input(high_raw)?,
                high_expected: parse_input(high_expected)?,
            },
        },
        ("cal", ["clear", field]) => Command::ClearCalibration(field.to_string()),
        ("cal", ["list"]) => Command::ListCalibration,
        ("cal", _) => {
            return Err(CommandError::Usage(
                "cal single <campo> <lido> <esperado> | cal two <campo> <cru1> <esp1> <cru2> <esp2> | cal clear <campo> | cal list",
            ));
        }

        ("rename", [position, name]) => match position.parse::<usize>() {
            Ok(n) if n >= 1 => Command::Rename {
                index: n - 1,
                name: name.to_string(),
            },
            _ => return Err(CommandError::Usage("rename <n> <nome> (n começa em 1)")),
        },
        ("rename", _) => return Err(CommandError::Usage("rename <n> <nome> (n começa em 1)")),

        ("export", []) => Command::Export,
        ("clear", []) => Command::Clear,
        ("disconnect", []) => Command::Disconnect,
        ("connect", []) => Command::Connect,
        ("stats", []) => Command::Stats,
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit" | "q", []) => Command::Quit,
        _ => return Err(CommandError::Unknown(line.trim().to_string())),
    };
    Ok(Some(command))
}

/// Lê o stdin em uma thread própria, uma linha por mensagem. O channel
/// fecha quando o stdin termina.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = bounded::<String>(16);
    let spawned = std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Erro ao ler stdin: {e}");
                        break;
                    }
                }
            }
            debug!("stdin encerrado");
        });
    if let Err(e) = spawned {
        warn!("Sem leitura de comandos: {e}");
    }
    rx
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("export"), Command::Export);
        assert_eq!(parse("  STATS "), Command::Stats);
        assert_eq!(parse("q"), Command::Quit);
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn show_with_window() {
        assert_eq!(parse("show"), Command::Show(None));
        assert_eq!(parse("show 5"), Command::Show(Some(TimeWindow::LastMinutes(5))));
        assert_eq!(parse("show all"), Command::Show(Some(TimeWindow::All)));
        assert!(matches!(parse_command("show 0"), Err(CommandError::Window(_))));
    }

    #[test]
    fn calibration_commands() {
        assert_eq!(
            parse("cal single field1 10 15"),
            Command::Calibrate {
                field: "field1".into(),
                request: CalibrationRequest::SinglePoint {
                    current_reading: 10.0,
                    expected_value: 15.0
                }
            }
        );
        assert_eq!(
            parse("cal two light 100 0 700 100"),
            Command::Calibrate {
                field: "light".into(),
                request: CalibrationRequest::TwoPoint {
                    low_raw: 100.0,
                    low_expected: 0.0,
                    high_raw: 700.0,
                    high_expected: 100.0
                }
            }
        );
        assert_eq!(parse("cal clear temp"), Command::ClearCalibration("temp".into()));
        assert_eq!(parse("cal list"), Command::ListCalibration);
    }

    #[test]
    fn non_numeric_calibration_is_rejected() {
        assert_eq!(
            parse_command("cal single field1 abc 15"),
            Err(CommandError::Calibration(CalibrationError::NotNumeric("abc".into())))
        );
        assert!(matches!(parse_command("cal single field1 1"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn rename_is_one_based() {
        assert_eq!(
            parse("rename 1 temp"),
            Command::Rename {
                index: 0,
                name: "temp".into()
            }
        );
        assert!(parse_command("rename 0 temp").is_err());
        assert!(parse_command("rename x temp").is_err());
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_command("reboot now"),
            Err(CommandError::Unknown("reboot now".into()))
        );
    }

    #[test]
    fn link_dependent_commands() {
        assert!(Command::Export.needs_link());
        assert!(!parse("cal list").needs_link());
        assert!(!Command::Show(None).needs_link());
    }
}
