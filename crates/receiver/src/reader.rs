//! Thread de leitura: puxa pedaços da fonte e entrega para a sessão via
//! channel.
//!
//! Um único produtor e um único consumidor. O envio é bloqueante (com
//! checagem periódica de cancelamento), então nenhum pedaço é perdido
//! quando a sessão está ocupada.

use crate::transport::{Chunk, SourceSpec, TransportError};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capacidade do channel (pedaços).
const QUEUE_CAPACITY: usize = 64;

/// Maior datagrama UDP.
const READ_BUFFER: usize = 65536;

/// Espera máxima de um envio antes de checar cancelamento.
const SEND_POLL: Duration = Duration::from_millis(200);

/// Mensagem da thread de leitura para a sessão.
#[derive(Debug)]
pub enum ReaderMessage {
    Chunk(Vec<u8>),
    /// Fim do stream: `None` = fim normal, `Some` = falha de transporte.
    Ended(Option<TransportError>),
}

/// Thread de leitura em andamento.
pub struct ReaderHandle {
    rx: Receiver<ReaderMessage>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub fn receiver(&self) -> &Receiver<ReaderMessage> {
        &self.rx
    }

    /// Cancela a leitura e espera a thread terminar.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Thread de leitura terminou com pânico");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Abre a fonte e inicia a thread de leitura.
pub fn spawn_reader(target: SourceSpec) -> Result<ReaderHandle, TransportError> {
    let mut source = target.open()?;
    let (tx, rx) = bounded::<ReaderMessage>(QUEUE_CAPACITY);
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    let thread = std::thread::Builder::new()
        .name("chronosense-reader".into())
        .spawn(move || {
            let mut buf = vec![0u8; READ_BUFFER];
            let ending = loop {
                if flag.load(Ordering::SeqCst) {
                    debug!("Leitura cancelada");
                    return;
                }
                match source.read_chunk(&mut buf) {
                    Ok(Chunk::Data(n)) => {
                        if !send(&tx, &flag, ReaderMessage::Chunk(buf[..n].to_vec())) {
                            return;
                        }
                    }
                    Ok(Chunk::Idle) => {}
                    Ok(Chunk::Eof) => break None,
                    Err(e) => break Some(e),
                }
            };
            match &ending {
                None => info!("Fim do stream: {}", target.describe()),
                Some(e) => warn!("Transporte falhou: {e}"),
            }
            send(&tx, &flag, ReaderMessage::Ended(ending));
        })
        .map_err(|source| TransportError::Io {
            target: "thread de leitura".into(),
            source,
        })?;

    Ok(ReaderHandle {
        rx,
        cancel,
        thread: Some(thread),
    })
}

/// Envio bloqueante que desiste se a leitura for cancelada ou a sessão
/// sumir.
fn send(tx: &Sender<ReaderMessage>, cancel: &AtomicBool, mut msg: ReaderMessage) -> bool {
    loop {
        match tx.send_timeout(msg, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if cancel.load(Ordering::SeqCst) {
                    return false;
                }
                msg = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_replay_delivers_all_bytes_then_ends() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"23,45,8\n23,45,3\n").unwrap();
        file.flush().unwrap();

        let reader = spawn_reader(SourceSpec::File(file.path().to_path_buf())).unwrap();
        let mut data = Vec::new();
        loop {
            match reader.receiver().recv_timeout(Duration::from_secs(5)).unwrap() {
                ReaderMessage::Chunk(bytes) => data.extend(bytes),
                ReaderMessage::Ended(err) => {
                    assert!(err.is_none());
                    break;
                }
            }
        }
        assert_eq!(data, b"23,45,8\n23,45,3\n");
        reader.stop();
    }

    #[test]
    fn stop_releases_blocked_reader() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            // Conexão aberta e silenciosa
            let (conn, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(3));
            drop(conn);
        });

        let reader = spawn_reader(SourceSpec::Tcp(addr)).unwrap();
        let started = std::time::Instant::now();
        reader.stop();
        assert!(started.elapsed() < Duration::from_secs(3));
        server.join().unwrap();
    }
}
