//! Remontagem de frames a partir de um stream em pedaços arbitrários.
//!
//! O transporte entrega bytes sem alinhamento com o separador de
//! registros. O [`StreamReassembler`] mantém um único buffer, emite cada
//! frame completo exatamente uma vez e na ordem, e retém o fragmento final
//! até chegar o terminador. No fechamento do stream esse fragmento é
//! descartado.

use crate::protocol::{DEFAULT_MAX_FRAME_LEN, RECORD_SEPARATOR};
use tracing::{debug, warn};

/// Caractere usado no lugar de bytes UTF-8 inválidos.
const REPLACEMENT: char = '\u{FFFD}';

/// Contadores do reassembler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    /// Frames emitidos.
    pub frames: u64,
    /// Frames descartados por excederem o tamanho máximo.
    pub overflowed: u64,
    /// Fragmentos finais descartados no fechamento.
    pub trailing_discarded: u64,
}

#[derive(Debug, Clone)]
pub struct StreamReassembler {
    /// Texto ainda sem terminador.
    buffer: String,
    /// Bytes de um caractere UTF-8 cortado entre dois pedaços.
    pending: Vec<u8>,
    max_frame_len: usize,
    /// Descartando o resto de um frame longo demais até o próximo separador.
    skipping: bool,
    stats: ReassemblerStats,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl StreamReassembler {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: String::new(),
            pending: Vec::new(),
            max_frame_len: max_frame_len.max(1),
            skipping: false,
            stats: ReassemblerStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    /// Quantidade de bytes retidos (texto + UTF-8 parcial).
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.pending.len()
    }

    /// Alimenta bytes crus. Decodifica UTF-8 de forma incremental.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // `valid_up_to` garante que o prefixo é UTF-8 válido
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(REPLACEMENT);
                            rest = &after[len..];
                        }
                        None => {
                            // Sequência incompleta no fim: espera o próximo pedaço
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        self.push_str(&text)
    }

    /// Alimenta texto já decodificado.
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        if self.buffer.contains(RECORD_SEPARATOR) {
            let buffer = std::mem::take(&mut self.buffer);
            let mut pieces = buffer.split(RECORD_SEPARATOR);
            // `split` sempre produz ao menos um pedaço: o último é o resto
            let mut previous = pieces.next().unwrap_or_default();
            for piece in pieces {
                self.emit(previous, &mut frames);
                previous = piece;
            }
            self.buffer = previous.to_string();
        }

        if self.buffer.len() > self.max_frame_len {
            warn!(
                "Fragmento sem terminador excedeu {} bytes, descartando até o próximo separador",
                self.max_frame_len
            );
            self.buffer.clear();
            if !self.skipping {
                self.stats.overflowed += 1;
            }
            self.skipping = true;
        }

        frames
    }

    fn emit(&mut self, piece: &str, frames: &mut Vec<String>) {
        if self.skipping {
            // Cauda de um frame já contado como descartado
            self.skipping = false;
            return;
        }
        if piece.len() > self.max_frame_len {
            warn!(
                "Frame de {} bytes excede o limite de {}, descartado",
                piece.len(),
                self.max_frame_len
            );
            self.stats.overflowed += 1;
            return;
        }
        self.stats.frames += 1;
        frames.push(piece.to_string());
    }

    /// Fecha o stream: o fragmento sem terminador é descartado.
    ///
    /// Retorna quantos bytes foram descartados. O reassembler fica pronto
    /// para um novo stream.
    pub fn close(&mut self) -> usize {
        let discarded = self.buffered_len();
        if discarded > 0 {
            debug!("Descartando fragmento final incompleto ({discarded} bytes)");
            self.stats.trailing_discarded += 1;
        }
        self.buffer.clear();
        self.pending.clear();
        self.skipping = false;
        discarded
    }

    /// Recomeça do zero (nova conexão), zerando também os contadores.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_frame_len);
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
