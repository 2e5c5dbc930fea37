//! Fontes de bytes: porta serial USB, UDP, TCP (ponte serial→rede) e
//! replay de arquivo.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Intervalo máximo de uma leitura bloqueada; permite checar cancelamento.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Baud rate do micro:bit.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Tentativas de achar um micro:bit quando a porta não é informada.
pub const SERIAL_DETECT_ATTEMPTS: u32 = 5;

const SERIAL_DETECT_DELAY: Duration = Duration::from_secs(2);

/// VID USB da interface DAPLink (mbed) do micro:bit.
const MICROBIT_VID: u16 = 0x0D28;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(
        "Fonte inválida: '{0}' (use serial://[porta][@baud], udp, tcp://host:porta ou file://caminho)"
    )]
    InvalidSource(String),

    #[error("Porta serial {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Nenhum micro:bit encontrado após {0} tentativas")]
    NoSerialPort(u32),

    #[error("Erro de E/S em {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Conexão encerrada pelo outro lado ({0})")]
    Closed(String),
}

/// De onde vêm os bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `port: None` procura um micro:bit conectado.
    Serial { port: Option<String>, baud: u32 },
    Udp { port: u16, sender_ip: String },
    Tcp(String),
    File(PathBuf),
}

impl SourceSpec {
    /// Interpreta `receiver.source`.
    pub fn parse(source: &str, port: u16, sender_ip: &str) -> Result<Self, TransportError> {
        let source = source.trim();
        if let Some(rest) = source.strip_prefix("serial://") {
            return parse_serial(rest).ok_or_else(|| TransportError::InvalidSource(source.to_string()));
        }
        if source.eq_ignore_ascii_case("udp") {
            return Ok(SourceSpec::Udp {
                port,
                sender_ip: sender_ip.to_string(),
            });
        }
        if let Some(addr) = source.strip_prefix("tcp://") {
            if !addr.is_empty() {
                return Ok(SourceSpec::Tcp(addr.to_string()));
            }
        }
        if let Some(path) = source.strip_prefix("file://") {
            if !path.is_empty() {
                return Ok(SourceSpec::File(PathBuf::from(path)));
            }
        }
        Err(TransportError::InvalidSource(source.to_string()))
    }

    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Serial { port: Some(port), baud } => format!("serial {port} @ {baud} baud"),
            SourceSpec::Serial { port: None, baud } => format!("serial (micro:bit automático) @ {baud} baud"),
            SourceSpec::Udp { port, sender_ip } if sender_ip.is_empty() => {
                format!("UDP 0.0.0.0:{port} (qualquer sender)")
            }
            SourceSpec::Udp { port, sender_ip } => format!("UDP 0.0.0.0:{port} (só {sender_ip})"),
            SourceSpec::Tcp(addr) => format!("TCP {addr}"),
            SourceSpec::File(path) => format!("arquivo {}", path.display()),
        }
    }

    /// Abre a fonte.
    pub fn open(&self) -> Result<Box<dyn ByteSource>, TransportError> {
        let source: Box<dyn ByteSource> = match self {
            SourceSpec::Serial { port, baud } => {
                let port = match port {
                    Some(port) => port.clone(),
                    None => detect_microbit()?,
                };
                Box::new(SerialSource::open(&port, *baud)?)
            }
            SourceSpec::Udp { port, sender_ip } => Box::new(UdpSource::bind(*port, sender_ip)?),
            SourceSpec::Tcp(addr) => Box::new(TcpSource::connect(addr)?),
            SourceSpec::File(path) => Box::new(FileSource::open(path)?),
        };
        info!("Conectado: {}", self.describe());
        Ok(source)
    }
}

/// `[porta][@baud]`; porta vazia ou `auto` liga a detecção.
fn parse_serial(rest: &str) -> Option<SourceSpec> {
    let (port, baud) = match rest.rsplit_once('@') {
        Some((port, baud)) => (port, baud.parse::<u32>().ok().filter(|b| *b > 0)?),
        None => (rest, DEFAULT_BAUD_RATE),
    };
    let port = match port.trim() {
        "" | "auto" => None,
        port => Some(port.to_string()),
    };
    Some(SourceSpec::Serial { port, baud })
}

/// Resultado de uma leitura.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// `n` bytes novos no buffer.
    Data(usize),
    /// Nada chegou dentro do timeout.
    Idle,
    /// Fim normal do stream.
    Eof,
}

/// Stream de bytes com leitura em pedaços.
pub trait ByteSource: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Chunk, TransportError>;
}

fn io_error(target: &str) -> impl FnOnce(io::Error) -> TransportError + '_ {
    move |source| TransportError::Io {
        target: target.to_string(),
        source,
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

// ──────────────────────────────────────────────
// Serial
// ──────────────────────────────────────────────

pub struct SerialSource {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialSource {
    pub fn open(name: &str, baud: u32) -> Result<Self, TransportError> {
        info!("Abrindo {name} a {baud} baud...");
        let port = serialport::new(name, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Serial {
                port: name.to_string(),
                source,
            })?;
        Ok(Self {
            port,
            name: name.to_string(),
        })
    }
}

impl ByteSource for SerialSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Chunk, TransportError> {
        match self.port.read(buf) {
            Ok(0) => Ok(Chunk::Idle),
            Ok(n) => Ok(Chunk::Data(n)),
            Err(ref e) if is_timeout(e) => Ok(Chunk::Idle),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(Chunk::Idle),
            Err(e) => Err(TransportError::Io {
                target: self.name.clone(),
                source: e,
            }),
        }
    }
}

/// Descrição USB típica de um micro:bit.
fn looks_like_microbit(vid: u16, labels: &[Option<&str>]) -> bool {
    vid == MICROBIT_VID
        || labels.iter().flatten().any(|label| {
            let label = label.to_lowercase();
            label.contains("mbed") || label.contains("micro:bit") || label.contains("microbit")
        })
}

fn is_microbit(info: &SerialPortInfo) -> bool {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            looks_like_microbit(usb.vid, &[usb.product.as_deref(), usb.manufacturer.as_deref()])
        }
        _ => false,
    }
}

/// Procura um micro:bit entre as portas seriais, com novas tentativas.
fn detect_microbit() -> Result<String, TransportError> {
    let mut last_seen = Vec::new();
    for attempt in 1..=SERIAL_DETECT_ATTEMPTS {
        info!("Procurando micro:bit... (tentativa {attempt}/{SERIAL_DETECT_ATTEMPTS})");
        match serialport::available_ports() {
            Ok(ports) => {
                if let Some(found) = ports.iter().find(|p| is_microbit(p)) {
                    info!("micro:bit encontrado em {}", found.port_name);
                    return Ok(found.port_name.clone());
                }
                last_seen = ports;
            }
            Err(e) => warn!("Falha ao listar portas seriais: {e}"),
        }
        if attempt < SERIAL_DETECT_ATTEMPTS {
            std::thread::sleep(SERIAL_DETECT_DELAY);
        }
    }

    if last_seen.is_empty() {
        warn!("Nenhuma porta serial encontrada. O micro:bit está conectado?");
    } else {
        let names: Vec<&str> = last_seen.iter().map(|p| p.port_name.as_str()).collect();
        warn!("Portas disponíveis: {}", names.join(", "));
    }
    Err(TransportError::NoSerialPort(SERIAL_DETECT_ATTEMPTS))
}

// ──────────────────────────────────────────────
// UDP
// ──────────────────────────────────────────────

pub struct UdpSource {
    sock: UdpSocket,
    sender_ip_filter: String,
}

impl UdpSource {
    pub fn bind(port: u16, sender_ip: &str) -> Result<Self, TransportError> {
        let addr = format!("0.0.0.0:{port}");
        let sock = UdpSocket::bind(&addr).map_err(io_error(&addr))?;
        sock.set_read_timeout(Some(READ_TIMEOUT)).map_err(io_error(&addr))?;
        Ok(Self {
            sock,
            sender_ip_filter: sender_ip.to_string(),
        })
    }
}

impl ByteSource for UdpSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Chunk, TransportError> {
        match self.sock.recv_from(buf) {
            Ok((size, addr)) => {
                let source = addr.ip().to_string();
                // Filtro de IP se configurado
                if !self.sender_ip_filter.is_empty() && source != self.sender_ip_filter {
                    debug!("Ignorando pacote de {source} (esperado: {})", self.sender_ip_filter);
                    return Ok(Chunk::Idle);
                }
                Ok(Chunk::Data(size))
            }
            Err(ref e) if is_timeout(e) => Ok(Chunk::Idle),
            Err(e) => Err(TransportError::Io {
                target: "UDP".into(),
                source: e,
            }),
        }
    }
}

// ──────────────────────────────────────────────
// TCP
// ──────────────────────────────────────────────

pub struct TcpSource {
    stream: TcpStream,
    addr: String,
}

impl TcpSource {
    pub fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).map_err(io_error(addr))?;
        stream.set_read_timeout(Some(READ_TIMEOUT)).map_err(io_error(addr))?;
        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }
}

impl ByteSource for TcpSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Chunk, TransportError> {
        match self.stream.read(buf) {
            // EOF em TCP é desconexão
            Ok(0) => Err(TransportError::Closed(self.addr.clone())),
            Ok(n) => Ok(Chunk::Data(n)),
            Err(ref e) if is_timeout(e) => Ok(Chunk::Idle),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(Chunk::Idle),
            Err(e) => Err(TransportError::Io {
                target: self.addr.clone(),
                source: e,
            }),
        }
    }
}

// ──────────────────────────────────────────────
// Arquivo
// ──────────────────────────────────────────────

pub struct FileSource {
    file: File,
    path: PathBuf,
}

impl FileSource {
    pub fn open(path: &std::path::Path) -> Result<Self, TransportError> {
        let target = path.display().to_string();
        let file = File::open(path).map_err(io_error(&target))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl ByteSource for FileSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Chunk, TransportError> {
        match self.file.read(buf) {
            Ok(0) => Ok(Chunk::Eof),
            Ok(n) => Ok(Chunk::Data(n)),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(Chunk::Idle),
            Err(e) => Err(TransportError::Io {
                target: self.path.display().to_string(),
                source: e,
            }),
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
    fn parses_sources() {
        assert_eq!(
            SourceSpec::parse("udp", 5005, "").unwrap(),
            SourceSpec::Udp {
                port: 5005,
                sender_ip: String::new()
            }
        );
        assert_eq!(
            SourceSpec::parse("tcp://127.0.0.1:9000", 5005, "").unwrap(),
            SourceSpec::Tcp("127.0.0.1:9000".into())
        );
        assert_eq!(
            SourceSpec::parse("file:///tmp/capture.txt", 5005, "").unwrap(),
            SourceSpec::File(PathBuf::from("/tmp/capture.txt"))
        );
        assert!(matches!(
            SourceSpec::parse("serial", 5005, ""),
            Err(TransportError::InvalidSource(_))
        ));
        assert!(SourceSpec::parse("tcp://", 5005, "").is_err());
    }

    #[test]
    fn parses_serial_sources() {
        assert_eq!(
            SourceSpec::parse("serial:///dev/ttyACM0", 5005, "").unwrap(),
            SourceSpec::Serial {
                port: Some("/dev/ttyACM0".into()),
                baud: DEFAULT_BAUD_RATE
            }
        );
        assert_eq!(
            SourceSpec::parse("serial://COM3@9600", 5005, "").unwrap(),
            SourceSpec::Serial {
                port: Some("COM3".into()),
                baud: 9600
            }
        );
        assert_eq!(
            SourceSpec::parse("serial://", 5005, "").unwrap(),
            SourceSpec::Serial {
                port: None,
                baud: DEFAULT_BAUD_RATE
            }
        );
        assert_eq!(
            SourceSpec::parse("serial://auto@57600", 5005, "").unwrap(),
            SourceSpec::Serial {
                port: None,
                baud: 57600
            }
        );
        assert!(SourceSpec::parse("serial://COM3@fast", 5005, "").is_err());
        assert!(SourceSpec::parse("serial://COM3@0", 5005, "").is_err());
    }

    #[test]
    fn microbit_detection_by_usb_description() {
        assert!(looks_like_microbit(MICROBIT_VID, &[None, None]));
        assert!(looks_like_microbit(0x1234, &[Some("BBC micro:bit CMSIS-DAP"), None]));
        assert!(looks_like_microbit(0x1234, &[None, Some("ARM mbed")]));
        assert!(!looks_like_microbit(0x2341, &[Some("Arduino Uno"), Some("Arduino LLC")]));
    }

    #[test]
    fn missing_serial_port_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("ttyNOPE").display().to_string();
        let result = SourceSpec::Serial {
            port: Some(name),
            baud: DEFAULT_BAUD_RATE,
        }
        .open();
        assert!(matches!(result, Err(TransportError::Serial { .. })));
    }

    #[test]
    fn file_source_reads_until_eof() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"23,45,8\n").unwrap();
        file.flush().unwrap();

        let mut source = SourceSpec::File(file.path().to_path_buf()).open().unwrap();
        let mut buf = [0u8; 4];
        let mut data = Vec::new();
        loop {
            match source.read_chunk(&mut buf).unwrap() {
                Chunk::Data(n) => data.extend_from_slice(&buf[..n]),
                Chunk::Idle => {}
                Chunk::Eof => break,
            }
        }
        assert_eq!(data, b"23,45,8\n");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SourceSpec::File(dir.path().join("nope.txt")).open();
        assert!(matches!(result, Err(TransportError::Io { .. })));
    }

    #[test]
    fn tcp_close_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"7,7\n").unwrap();
        });

        let mut source = TcpSource::connect(&addr).unwrap();
        server.join().unwrap();
        let mut buf = [0u8; 64];
        let mut data = Vec::new();
        let err = loop {
            match source.read_chunk(&mut buf) {
                Ok(Chunk::Data(n)) => data.extend_from_slice(&buf[..n]),
                Ok(_) => {}
                Err(e) => break e,
            }
        };
        assert_eq!(data, b"7,7\n");
        assert!(matches!(err, TransportError::Closed(_)));
    }
}
