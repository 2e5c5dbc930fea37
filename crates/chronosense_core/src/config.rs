//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável, com uma seção para o
//! emissor e outra para o receptor.

use crate::checksum::{ChecksumRegistry, MOD_SUM};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::store::{DEFAULT_DISPLAY_LIMIT, TimeWindow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Erros ao gravar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro de E/S em {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuração do Sender (dispositivo emissor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Modo de envio: "broadcast" ou "unicast"
    pub mode: String,
    /// IP de destino (255.255.255.255 para broadcast)
    pub dest_ip: String,
    /// Porta UDP
    pub port: u16,
    /// Intervalo entre leituras em segundos
    pub interval_secs: f64,
    /// IP local para bind (vazio = auto)
    pub bind_ip: String,
    /// Algoritmo de checksum anexado a cada frame
    pub checksum_method: String,
    /// Falhas seguidas de leitura antes de parar de reenviar a última leitura boa
    pub max_fallback_failures: u32,
}

/// Endereço de broadcast limitado.
pub const BROADCAST_IP: &str = "255.255.255.255";

impl SenderConfig {
    /// Broadcast quando o modo pede ou o destino é o endereço de broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.mode == "broadcast" || self.dest_ip == BROADCAST_IP
    }

    /// Troca o destino; um IP específico passa a ser unicast.
    pub fn set_destination(&mut self, dest_ip: &str) {
        self.dest_ip = dest_ip.trim().to_string();
        self.mode = if self.dest_ip == BROADCAST_IP {
            "broadcast".into()
        } else {
            "unicast".into()
        };
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            mode: "broadcast".into(),
            dest_ip: BROADCAST_IP.into(),
            port: 5005,
            interval_secs: 5.0,
            bind_ip: String::new(),
            checksum_method: MOD_SUM.into(),
            max_fallback_failures: 10,
        }
    }
}

/// Configuração do Receiver (ingestão no host).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Fonte de bytes: "serial://[porta][@baud]", "udp", "tcp://host:porta"
    /// ou "file://caminho"
    pub source: String,
    /// Porta UDP para escutar
    pub port: u16,
    /// IP do sender (vazio = aceita qualquer um)
    pub sender_ip: String,
    /// Algoritmo de checksum usado na validação
    pub checksum_method: String,
    /// Mantém pontos com checksum inválido (marcados)
    pub keep_invalid_data: bool,
    /// Trata a última coluna como checksum
    pub last_column_is_checksum: bool,
    /// Janela exibida: minutos ou "all"
    pub display_time_window: String,
    /// Máximo de linhas visíveis
    pub display_limit: usize,
    /// Exportação automática (minutos, 0 = desligada)
    pub auto_export_interval_minutes: u32,
    /// Diretório dos CSVs exportados
    pub export_dir: String,
    /// Nome da instância (entra no nome do arquivo exportado)
    pub instance_name: String,
    /// Arquivo TOML com os perfis de calibração
    pub calibration_file: String,
    /// Diretório do log CSV gravado durante a ingestão (vazio = desligado)
    pub log_dir: String,
    /// Tamanho máximo de um frame em bytes
    pub max_frame_len: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            source: "udp".into(),
            port: 5005,
            sender_ip: String::new(),
            checksum_method: MOD_SUM.into(),
            keep_invalid_data: true,
            last_column_is_checksum: true,
            display_time_window: "all".into(),
            display_limit: DEFAULT_DISPLAY_LIMIT,
            auto_export_interval_minutes: 0,
            export_dir: "exports".into(),
            instance_name: String::new(),
            calibration_file: "calibration.toml".into(),
            log_dir: "logs".into(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ReceiverConfig {
    /// Janela exibida já interpretada (inválida → "all").
    pub fn time_window(&self) -> TimeWindow {
        self.display_time_window.parse().unwrap_or_else(|e| {
            warn!("{e}; usando \"all\"");
            TimeWindow::All
        })
    }
}

/// Configuração raiz do aplicativo (unifica sender e receiver).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let registry = ChecksumRegistry::with_defaults();

        if self.sender.mode != "broadcast" && self.sender.mode != "unicast" {
            errors.push(format!(
                "Modo do sender inválido: '{}' (broadcast ou unicast)",
                self.sender.mode
            ));
        }
        if self.sender.dest_ip.parse::<std::net::Ipv4Addr>().is_err() {
            errors.push(format!("IP de destino inválido: '{}'", self.sender.dest_ip));
        }
        if self.sender.port == 0 {
            errors.push("Porta do sender não pode ser 0".into());
        }
        if self.sender.interval_secs < 0.1 || self.sender.interval_secs > 3600.0 {
            errors.push(format!(
                "Intervalo do sender inválido: {} (0.1–3600.0)",
                self.sender.interval_secs
            ));
        }
        if !registry.contains(&self.sender.checksum_method) {
            errors.push(format!(
                "Checksum do sender desconhecido: '{}'",
                self.sender.checksum_method
            ));
        }

        let receiver = &self.receiver;
        if receiver.port == 0 {
            errors.push("Porta do receiver não pode ser 0".into());
        }
        if !registry.contains(&receiver.checksum_method) {
            errors.push(format!(
                "Checksum do receiver desconhecido: '{}'",
                receiver.checksum_method
            ));
        }
        if let Err(e) = receiver.display_time_window.parse::<TimeWindow>() {
            errors.push(e);
        }
        if receiver.display_limit == 0 {
            errors.push("display_limit não pode ser 0".into());
        }
        if receiver.max_frame_len < 16 {
            errors.push(format!(
                "max_frame_len muito pequeno: {} (mínimo 16)",
                receiver.max_frame_len
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.sender.port, parsed.sender.port);
        assert_eq!(config.receiver.checksum_method, parsed.receiver.checksum_method);
        assert_eq!(config.receiver.keep_invalid_data, parsed.receiver.keep_invalid_data);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[receiver]
keep_invalid_data = false
display_time_window = "15"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert!(!config.receiver.keep_invalid_data);
        assert_eq!(config.receiver.time_window(), TimeWindow::LastMinutes(15));
        // Outros campos devem ter valor padrão
        assert!(config.receiver.last_column_is_checksum);
        assert_eq!(config.receiver.checksum_method, "modSum");
        assert_eq!(config.sender.port, 5005);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = AppConfig::default();
        config.receiver.checksum_method = "crc32".into();
        config.receiver.display_time_window = "soon".into();
        config.sender.port = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "Erros: {:?}", errors);
    }

    #[test]
    fn sender_mode_and_destination_are_checked() {
        let mut config = AppConfig::default();
        config.sender.mode = "multicast".into();
        config.sender.dest_ip = "10.0.0".into();
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
        assert!(errors[0].contains("multicast"));
    }

    #[test]
    fn specific_destination_means_unicast() {
        let mut sender = SenderConfig::default();
        assert!(sender.is_broadcast());

        sender.set_destination("192.168.0.20");
        assert_eq!(sender.mode, "unicast");
        assert!(!sender.is_broadcast());

        sender.set_destination(BROADCAST_IP);
        assert_eq!(sender.mode, "broadcast");
        assert!(sender.is_broadcast());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.receiver.instance_name = "Bancada 2".into();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.receiver.instance_name, "Bancada 2");
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.receiver.port, 5005);
    }
}
