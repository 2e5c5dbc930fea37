//! Algoritmos de checksum de um dígito.
//!
//! Cada emissor anexa ao frame um dígito calculado sobre os campos
//! numéricos. O receptor recalcula o mesmo valor e compara. Os algoritmos
//! são selecionados por nome através do [`ChecksumRegistry`], então novos
//! métodos podem ser registrados sem alterar quem os consome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Nome do algoritmo padrão.
pub const MOD_SUM: &str = "modSum";

/// Nome do algoritmo de dois campos (ex.: temperatura/umidade do DHT11).
pub const PAIRWISE_OFFSET_SUM: &str = "pairwiseOffsetSum";

/// Função pura de uma lista ordenada de valores para um checksum.
///
/// `None` na entrada representa um campo não numérico. `None` na saída
/// significa que o algoritmo não consegue produzir um resultado para a
/// entrada dada.
pub trait ChecksumAlgorithm: Send + Sync + fmt::Debug {
    /// Nome pelo qual o algoritmo é registrado.
    fn name(&self) -> &str;

    /// Calcula o checksum.
    fn compute(&self, values: &[Option<f64>]) -> Option<u32>;
}

/// Soma dos dígitos das unidades, módulo 10.
///
/// Para cada valor: `abs(round(v)) mod 10`; soma tudo e reduz mod 10.
/// Campos não numéricos são ignorados.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModSum;

impl ChecksumAlgorithm for ModSum {
    fn name(&self) -> &str {
        MOD_SUM
    }

    fn compute(&self, values: &[Option<f64>]) -> Option<u32> {
        let sum: u64 = values
            .iter()
            .flatten()
            .filter(|v| v.is_finite())
            .map(|&v| ones_digit(v))
            .sum();
        Some((sum % 10) as u32)
    }
}

/// `(primeiro mod 10) + (floor(segundo / 10) mod 10)`, sem redução final.
///
/// Resultado entre 0 e 18. Exige pelo menos dois valores numéricos nas
/// duas primeiras posições. O primeiro valor é arredondado para baixo e os
/// dois restos são euclidianos, então negativos também caem em `0..=9`
/// (`-27 → 3`, `floor(-86 / 10) = -9 → 1`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseOffsetSum;

impl ChecksumAlgorithm for PairwiseOffsetSum {
    fn name(&self) -> &str {
        PAIRWISE_OFFSET_SUM
    }

    fn compute(&self, values: &[Option<f64>]) -> Option<u32> {
        let (first, second) = match values {
            [Some(a), Some(b), ..] if a.is_finite() && b.is_finite() => (*a, *b),
            _ => return None,
        };
        let first_digit = first.floor().rem_euclid(10.0) as u32;
        let second_digit = (second / 10.0).floor().rem_euclid(10.0) as u32;
        Some(first_digit + second_digit)
    }
}

/// Dígito das unidades de `abs(round(v))`.
///
/// Arredonda meio para cima (`-2.5 → -2`), igual aos emissores micro:bit.
fn ones_digit(v: f64) -> u64 {
    let rounded = (v + 0.5).floor().abs();
    (rounded % 10.0) as u64
}

/// Registro de algoritmos por nome.
#[derive(Debug, Clone)]
pub struct ChecksumRegistry {
    algorithms: BTreeMap<String, Arc<dyn ChecksumAlgorithm>>,
}

impl ChecksumRegistry {
    /// Registro vazio.
    pub fn empty() -> Self {
        Self {
            algorithms: BTreeMap::new(),
        }
    }

    /// Registro com `modSum` e `pairwiseOffsetSum`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ModSum));
        registry.register(Arc::new(PairwiseOffsetSum));
        registry
    }

    /// Registra (ou substitui) um algoritmo sob o seu próprio nome.
    pub fn register(&mut self, algorithm: Arc<dyn ChecksumAlgorithm>) {
        self.algorithms
            .insert(algorithm.name().to_string(), algorithm);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChecksumAlgorithm>> {
        self.algorithms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.algorithms.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.algorithms.keys().map(String::as_str)
    }
}

impl Default for ChecksumRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
