//! Validação de checksum.
//!
//! O último campo do registro é o checksum; o algoritmo escolhido é
//! recalculado sobre todos os campos anteriores e comparado. Um checksum
//! divergente não é erro: vira a [`Validity`] do ponto.

use crate::checksum::ChecksumAlgorithm;
use crate::record::{FieldValue, Record};
use std::fmt;
use std::sync::Arc;

/// Motivo de um registro ser considerado inválido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Checksum recalculado difere do recebido.
    Mismatch { expected: u32, received: i64 },
    /// O campo de checksum não é um inteiro.
    ChecksumNotNumeric,
    /// Menos de dois campos no total.
    TooFewFields,
    /// O algoritmo não produz resultado para estes campos.
    ChecksumUnavailable,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Mismatch { expected, received } => {
                write!(f, "checksum {received} ≠ esperado {expected}")
            }
            InvalidReason::ChecksumNotNumeric => write!(f, "checksum não numérico"),
            InvalidReason::TooFewFields => write!(f, "campos insuficientes"),
            InvalidReason::ChecksumUnavailable => write!(f, "checksum indisponível"),
        }
    }
}

/// Resultado da validação de um registro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(InvalidReason),
    /// A última coluna não é tratada como checksum.
    Unchecked,
}

impl Validity {
    /// `false` apenas para registros inválidos.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Validity::Invalid(_))
    }

    /// Rótulo da coluna `checksum_valid` na exportação. Sem coluna de
    /// checksum nada é inválido, então `Unchecked` sai como `valid`.
    pub fn label(&self) -> &'static str {
        match self {
            Validity::Valid | Validity::Unchecked => "valid",
            Validity::Invalid(_) => "invalid",
        }
    }
}

/// Política de validação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Mantém registros inválidos (marcados) em vez de descartá-los.
    pub keep_invalid: bool,
    /// Trata o último campo como checksum.
    pub last_column_is_checksum: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            keep_invalid: true,
            last_column_is_checksum: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChecksumValidator {
    algorithm: Arc<dyn ChecksumAlgorithm>,
    policy: ValidationPolicy,
}

impl ChecksumValidator {
    pub fn new(algorithm: Arc<dyn ChecksumAlgorithm>, policy: ValidationPolicy) -> Self {
        Self { algorithm, policy }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    /// Calcula a validade de um registro.
    pub fn validate(&self, record: &Record) -> Validity {
        if !self.policy.last_column_is_checksum {
            return Validity::Unchecked;
        }

        let Some((checksum, payload)) = record.fields.split_last() else {
            return Validity::Invalid(InvalidReason::TooFewFields);
        };
        if payload.is_empty() {
            return Validity::Invalid(InvalidReason::TooFewFields);
        }

        let Some(received) = parse_checksum(&checksum.value) else {
            return Validity::Invalid(InvalidReason::ChecksumNotNumeric);
        };

        let values: Vec<Option<f64>> = payload.iter().map(|f| f.value.raw()).collect();
        match self.algorithm.compute(&values) {
            Some(expected) if i64::from(expected) == received => Validity::Valid,
            Some(expected) => Validity::Invalid(InvalidReason::Mismatch { expected, received }),
            None => Validity::Invalid(InvalidReason::ChecksumUnavailable),
        }
    }

    /// Decide se um registro com esta validade entra no store.
    pub fn admits(&self, validity: Validity) -> bool {
        validity.is_valid() || self.policy.keep_invalid
    }
}

/// O checksum precisa ser um inteiro exato ("8", não "8.5").
fn parse_checksum(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Numeric { raw, .. } if raw.fract() == 0.0 => Some(*raw as i64),
        _ => None,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{ModSum, PairwiseOffsetSum};
    use crate::record::RecordParser;

    fn record(frame: &str) -> Record {
        RecordParser::new(true).parse(frame).unwrap().record
    }

    fn mod_sum() -> ChecksumValidator {
        ChecksumValidator::new(Arc::new(ModSum), ValidationPolicy::default())
    }

    #[test]
    fn matching_checksum_is_valid() {
        assert_eq!(mod_sum().validate(&record("23,45,8")), Validity::Valid);
    }

    #[test]
    fn corrupted_checksum_is_invalid() {
        assert_eq!(
            mod_sum().validate(&record("23,45,3")),
            Validity::Invalid(InvalidReason::Mismatch {
                expected: 8,
                received: 3
            })
        );
    }

    #[test]
    fn text_fields_do_not_count() {
        // "SUMMARY" ignorado: 2 + 3 = 5
        assert_eq!(mod_sum().validate(&record("SUMMARY,12,23,5")), Validity::Valid);
    }

    #[test]
    fn non_numeric_checksum_is_invalid() {
        assert_eq!(
            mod_sum().validate(&record("23,45,x")),
            Validity::Invalid(InvalidReason::ChecksumNotNumeric)
        );
        assert_eq!(
            mod_sum().validate(&record("23,45,8.5")),
            Validity::Invalid(InvalidReason::ChecksumNotNumeric)
        );
    }

    #[test]
    fn single_field_is_too_few() {
        assert_eq!(
            mod_sum().validate(&record("8")),
            Validity::Invalid(InvalidReason::TooFewFields)
        );
    }

    #[test]
    fn pairwise_algorithm() {
        let v = ChecksumValidator::new(Arc::new(PairwiseOffsetSum), ValidationPolicy::default());
        assert_eq!(v.validate(&record("27,86,15")), Validity::Valid);
        assert_eq!(
            v.validate(&record("27,15")),
            Validity::Invalid(InvalidReason::ChecksumUnavailable)
        );
    }

    #[test]
    fn disabled_checksum_column_is_unchecked() {
        let v = ChecksumValidator::new(
            Arc::new(ModSum),
            ValidationPolicy {
                keep_invalid: true,
                last_column_is_checksum: false,
            },
        );
        let record = RecordParser::new(false).parse("23,45,3").unwrap().record;
        let validity = v.validate(&record);
        assert_eq!(validity, Validity::Unchecked);
        assert!(validity.is_valid());
    }

    #[test]
    fn admission_follows_keep_invalid() {
        let invalid = Validity::Invalid(InvalidReason::TooFewFields);
        let keep = mod_sum();
        assert!(keep.admits(invalid));
        assert!(keep.admits(Validity::Valid));

        let discard = ChecksumValidator::new(
            Arc::new(ModSum),
            ValidationPolicy {
                keep_invalid: false,
                last_column_is_checksum: true,
            },
        );
        assert!(!discard.admits(invalid));
        assert!(discard.admits(Validity::Valid));
    }

    #[test]
    fn labels() {
        assert_eq!(Validity::Valid.label(), "valid");
        assert_eq!(Validity::Invalid(InvalidReason::TooFewFields).label(), "invalid");
        assert_eq!(Validity::Unchecked.label(), "valid");
    }
}
