//! Protocolo de fio: uma linha ASCII por frame.
//!
//! ```text
//! ┌──────────┬───┬──────────┬───┬─────┬───┬──────────┬────┐
//! │ valor_1  │ , │ valor_2  │ , │ ... │ , │ checksum │ \n │
//! └──────────┴───┴──────────┴───┴─────┴───┴──────────┴────┘
//! ```
//!
//! - Campos em decimal ASCII, separados por vírgula
//! - Último campo: checksum calculado sobre os anteriores
//! - Sem versão, sequência ou identidade do emissor; o schema é inferido
//!   pela quantidade de campos

use crate::checksum::ChecksumAlgorithm;
use std::sync::Arc;

/// Separador de registros no stream.
pub const RECORD_SEPARATOR: char = '\n';

/// Separador de campos dentro do frame.
pub const FIELD_SEPARATOR: char = ',';

/// Tamanho máximo padrão de um frame (bytes, sem o terminador).
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Erros do encoder.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame sem leituras")]
    Empty,

    #[error("Leitura {index} não é finita: {value}")]
    NonFinite { index: usize, value: f64 },

    #[error("Checksum '{0}' não pôde ser calculado para estas leituras")]
    ChecksumUnavailable(String),
}

/// Convenção de exibição de um campo no emissor.
///
/// Cada sensor escolhe a sua; não há padronização entre dispositivos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldFormat {
    /// Arredonda para inteiro.
    Integer,
    /// Casas decimais fixas.
    Decimals(u8),
    /// Representação decimal mais curta do valor.
    #[default]
    Shortest,
}

impl FieldFormat {
    /// Texto decimal do valor segundo a convenção.
    pub fn render(self, value: f64) -> String {
        let text = match self {
            FieldFormat::Integer => format!("{}", value.round()),
            FieldFormat::Decimals(places) => format!("{:.*}", places as usize, value),
            FieldFormat::Shortest => format!("{value}"),
        };
        // "-0" e "-0.0" confundem parsers ingênuos
        if text.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
            text.trim_start_matches('-').to_string()
        } else {
            text
        }
    }
}

/// Uma leitura pronta para ser emitida.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub format: FieldFormat,
}

impl Reading {
    pub fn new(value: f64, format: FieldFormat) -> Self {
        Self { value, format }
    }

    pub fn integer(value: f64) -> Self {
        Self::new(value, FieldFormat::Integer)
    }

    pub fn decimals(value: f64, places: u8) -> Self {
        Self::new(value, FieldFormat::Decimals(places))
    }
}

/// Monta frames `v1,v2,...,vN,checksum` no lado do dispositivo.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    algorithm: Arc<dyn ChecksumAlgorithm>,
}

impl FrameEncoder {
    pub fn new(algorithm: Arc<dyn ChecksumAlgorithm>) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> &dyn ChecksumAlgorithm {
        self.algorithm.as_ref()
    }

    /// Codifica as leituras em um frame, sem terminador.
    ///
    /// O checksum é calculado sobre os valores já formatados, exatamente
    /// como o receptor os verá.
    pub fn encode(&self, readings: &[Reading]) -> Result<String, ProtocolError> {
        if readings.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut fields = Vec::with_capacity(readings.len() + 1);
        let mut emitted = Vec::with_capacity(readings.len());
        for (index, reading) in readings.iter().enumerate() {
            if !reading.value.is_finite() {
                return Err(ProtocolError::NonFinite {
                    index,
                    value: reading.value,
                });
            }
            let text = reading.format.render(reading.value);
            emitted.push(text.parse::<f64>().ok());
            fields.push(text);
        }

        let checksum = self
            .algorithm
            .compute(&emitted)
            .ok_or_else(|| ProtocolError::ChecksumUnavailable(self.algorithm.name().to_string()))?;
        fields.push(checksum.to_string());

        let separator = FIELD_SEPARATOR.to_string();
        Ok(fields.join(separator.as_str()))
    }

    /// Codifica e anexa o separador de registros.
    pub fn encode_line(&self, readings: &[Reading]) -> Result<String, ProtocolError> {
        let mut line = self.encode(readings)?;
        line.push(RECORD_SEPARATOR);
        Ok(line)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{ModSum, PairwiseOffsetSum};

    fn mod_sum_encoder() -> FrameEncoder {
        FrameEncoder::new(Arc::new(ModSum))
    }

    #[test]
    fn encodes_values_and_checksum() {
        let frame = mod_sum_encoder()
            .encode(&[Reading::integer(23.0), Reading::integer(45.0)])
            .unwrap();
        assert_eq!(frame, "23,45,8");
    }

    #[test]
    fn line_is_terminated() {
        let line = mod_sum_encoder()
            .encode_line(&[Reading::integer(7.0)])
            .unwrap();
        assert_eq!(line, "7,7\n");
    }

    #[test]
    fn checksum_follows_emitted_text() {
        // 23.6 sai como "24" → dígito 4
        let frame = mod_sum_encoder()
            .encode(&[Reading::integer(23.6)])
            .unwrap();
        assert_eq!(frame, "24,4");

        let frame = mod_sum_encoder()
            .encode(&[Reading::decimals(21.46, 1), Reading::decimals(45.04, 1)])
            .unwrap();
        // 21.5 → 22 → 2; 45.0 → 5
        assert_eq!(frame, "21.5,45.0,7");
    }

    #[test]
    fn negative_zero_is_normalised() {
        assert_eq!(FieldFormat::Decimals(1).render(-0.01), "0.0");
        assert_eq!(FieldFormat::Integer.render(-0.2), "0");
        assert_eq!(FieldFormat::Integer.render(-3.0), "-3");
    }

    #[test]
    fn pairwise_encoder_with_two_fields() {
        let encoder = FrameEncoder::new(Arc::new(PairwiseOffsetSum));
        let frame = encoder
            .encode(&[Reading::integer(27.0), Reading::integer(86.0)])
            .unwrap();
        assert_eq!(frame, "27,86,15");
    }

    #[test]
    fn rejects_empty_and_non_finite() {
        let encoder = mod_sum_encoder();
        assert_eq!(encoder.encode(&[]), Err(ProtocolError::Empty));
        assert!(matches!(
            encoder.encode(&[Reading::integer(1.0), Reading::integer(f64::NAN)]),
            Err(ProtocolError::NonFinite { index: 1, .. })
        ));
    }

    #[test]
    fn pairwise_with_one_field_is_unavailable() {
        let encoder = FrameEncoder::new(Arc::new(PairwiseOffsetSum));
        assert_eq!(
            encoder.encode(&[Reading::integer(27.0)]),
            Err(ProtocolError::ChecksumUnavailable("pairwiseOffsetSum".into()))
        );
    }
}
