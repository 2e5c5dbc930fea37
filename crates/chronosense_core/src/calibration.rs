//! Calibração linear por campo.
//!
//! `calibrado = cru · slope + intercept`, sempre a partir do valor cru.
//! Um perfil é derivado por um de dois procedimentos (ponto único ou dois
//! pontos) e vale até ser substituído ou removido. Sem perfil, a
//! transformação é a identidade.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Procedimento usado para derivar o perfil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    SinglePoint,
    TwoPoint,
}

/// Entradas inválidas para calibração. Nenhum perfil é alterado.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("Valor '{0}' não é numérico")]
    NotNumeric(String),

    #[error("Pontos crus iguais ({0}): não é possível calcular a inclinação")]
    EqualRawPoints(f64),

    #[error("Calibração resulta em transformação não finita")]
    Degenerate,

    #[error("Campo '{0}' não existe ou não pode ser calibrado")]
    UnknownField(String),

    #[error("Erro de E/S em {path}: {message}")]
    Io { path: String, message: String },

    #[error("Arquivo de calibração inválido: {0}")]
    Parse(String),
}

/// Transformação linear de um campo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub slope: f64,
    pub intercept: f64,
    pub method: CalibrationMethod,
}

impl CalibrationProfile {
    /// Ponto único: desloca a leitura atual até o valor esperado.
    pub fn single_point(current_reading: f64, expected_value: f64) -> Result<Self, CalibrationError> {
        ensure_numeric(current_reading)?;
        ensure_numeric(expected_value)?;
        Self::checked(1.0, expected_value - current_reading, CalibrationMethod::SinglePoint)
    }

    /// Dois pontos: reta passando por `(low_raw, low_expected)` e
    /// `(high_raw, high_expected)`.
    pub fn two_point(
        low_raw: f64,
        low_expected: f64,
        high_raw: f64,
        high_expected: f64,
    ) -> Result<Self, CalibrationError> {
        for v in [low_raw, low_expected, high_raw, high_expected] {
            ensure_numeric(v)?;
        }
        if low_raw == high_raw {
            return Err(CalibrationError::EqualRawPoints(low_raw));
        }
        let slope = (high_expected - low_expected) / (high_raw - low_raw);
        let intercept = low_expected - slope * low_raw;
        Self::checked(slope, intercept, CalibrationMethod::TwoPoint)
    }

    fn checked(slope: f64, intercept: f64, method: CalibrationMethod) -> Result<Self, CalibrationError> {
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(CalibrationError::Degenerate);
        }
        Ok(Self {
            slope,
            intercept,
            method,
        })
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.intercept
    }
}

fn ensure_numeric(value: f64) -> Result<(), CalibrationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CalibrationError::NotNumeric(value.to_string()))
    }
}

/// Converte texto digitado pelo usuário em número.
pub fn parse_input(text: &str) -> Result<f64, CalibrationError> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CalibrationError::NotNumeric(text.trim().to_string())),
    }
}

/// Pedido de calibração com os valores informados pelo usuário.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationRequest {
    SinglePoint {
        current_reading: f64,
        expected_value: f64,
    },
    TwoPoint {
        low_raw: f64,
        low_expected: f64,
        high_raw: f64,
        high_expected: f64,
    },
}

impl CalibrationRequest {
    pub fn derive(&self) -> Result<CalibrationProfile, CalibrationError> {
        match *self {
            CalibrationRequest::SinglePoint {
                current_reading,
                expected_value,
            } => CalibrationProfile::single_point(current_reading, expected_value),
            CalibrationRequest::TwoPoint {
                low_raw,
                low_expected,
                high_raw,
                high_expected,
            } => CalibrationProfile::two_point(low_raw, low_expected, high_raw, high_expected),
        }
    }
}

/// Perfis ativos, por nome de campo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationEngine {
    profiles: BTreeMap<String, CalibrationProfile>,
}

impl CalibrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&CalibrationProfile> {
        self.profiles.get(field)
    }

    pub fn profiles(&self) -> impl Iterator<Item = (&str, &CalibrationProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Instala um perfil, retornando o anterior.
    pub fn set(&mut self, field: &str, profile: CalibrationProfile) -> Option<CalibrationProfile> {
        info!(
            "Calibração de '{field}': slope={:.4} intercept={:.4} ({:?})",
            profile.slope, profile.intercept, profile.method
        );
        self.profiles.insert(field.to_string(), profile)
    }

    /// Remove o perfil do campo (volta à identidade).
    pub fn remove(&mut self, field: &str) -> Option<CalibrationProfile> {
        self.profiles.remove(field)
    }

    /// Move o perfil de um nome para outro (campo renomeado).
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(profile) = self.profiles.remove(from) {
            self.profiles.insert(to.to_string(), profile);
        }
    }

    /// Valor calibrado de `raw` para o campo; identidade sem perfil.
    pub fn apply(&self, field: &str, raw: f64) -> f64 {
        self.profiles
            .get(field)
            .map_or(raw, |profile| profile.apply(raw))
    }

    /// Carrega perfis de um arquivo TOML. Arquivo ausente = sem perfis.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| CalibrationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let engine: Self =
            toml::from_str(&content).map_err(|e| CalibrationError::Parse(e.to_string()))?;
        for (field, profile) in engine.profiles() {
            if !profile.slope.is_finite() || !profile.intercept.is_finite() {
                warn!("Perfil de '{field}' em {} não é finito", path.display());
                return Err(CalibrationError::Degenerate);
            }
        }
        info!("{} perfis de calibração carregados de {}", engine.len(), path.display());
        Ok(engine)
    }

    /// Salva os perfis em TOML.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CalibrationError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| CalibrationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!("Perfis de calibração salvos em {}", path.display());
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
