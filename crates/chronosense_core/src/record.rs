//! Registros, campos e schema inferido.
//!
//! Um frame vira um [`Record`]: campos numéricos ou texto, na ordem em que
//! chegaram. O schema (nome de cada posição) é inferido pela quantidade de
//! campos e pode mudar de um frame para o outro. Cada mudança gera um novo
//! [`Schema`] com identificador próprio; os nomes existentes são mantidos
//! sempre que a posição continua existindo.

use crate::protocol::FIELD_SEPARATOR;
use tracing::info;

/// Máximo de campos aceitos em um frame.
pub const MAX_FIELDS: usize = 64;

/// Identificador de uma versão de schema.
pub type SchemaId = u64;

/// Nome padrão da posição `index` (base zero): `field1`, `field2`, …
pub fn default_field_name(index: usize) -> String {
    format!("field{}", index + 1)
}

/// Valor de um campo.
///
/// Campos numéricos carregam o valor cru (como recebido) e o calibrado.
/// O cru nunca é sobrescrito.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Numeric { raw: f64, calibrated: f64 },
    Text(String),
}

impl FieldValue {
    /// Interpreta o texto de um campo: número finito ou texto opaco.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => FieldValue::Numeric {
                raw: v,
                calibrated: v,
            },
            _ => FieldValue::Text(text.to_string()),
        }
    }

    pub fn raw(&self) -> Option<f64> {
        match self {
            FieldValue::Numeric { raw, .. } => Some(*raw),
            FieldValue::Text(_) => None,
        }
    }

    pub fn calibrated(&self) -> Option<f64> {
        match self {
            FieldValue::Numeric { calibrated, .. } => Some(*calibrated),
            FieldValue::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldValue::Numeric { .. })
    }

    /// Texto para exibição/exportação (valor calibrado quando numérico).
    pub fn display_text(&self) -> String {
        match self {
            FieldValue::Numeric { calibrated, .. } => format!("{calibrated}"),
            FieldValue::Text(text) => text.clone(),
        }
    }
}

/// Papel de um campo dentro do registro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Data,
    Checksum,
}

/// Um campo nomeado.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub role: FieldRole,
    pub value: FieldValue,
}

/// Mapeamento posição → nome, versionado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub id: SchemaId,
    pub names: Vec<String>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Tipo de mudança de schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeKind {
    Initial,
    Grew,
    Shrank,
    Renamed,
}

/// Notificação de mudança de schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChange {
    pub kind: SchemaChangeKind,
    pub previous: Option<Schema>,
    pub current: Schema,
}

/// Registro recém-parseado, ainda sem timestamp nem validade.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub schema_id: SchemaId,
    pub fields: Vec<Field>,
}

impl Record {
    /// Campos de dados (sem o checksum).
    pub fn data_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.role == FieldRole::Data)
    }

    pub fn checksum_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.role == FieldRole::Checksum)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Frame que não pôde virar registro utilizável.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecordError {
    #[error("Frame vazio")]
    Empty,

    #[error("Frame com {count} campos (máximo {max})")]
    TooManyFields { count: usize, max: usize },
}

/// Erros de renomeação de campo.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenameError {
    #[error("Nenhum schema conhecido ainda")]
    NoSchema,

    #[error("Posição {index} fora do schema ({len} campos)")]
    OutOfRange { index: usize, len: usize },

    #[error("Nome de campo vazio")]
    EmptyName,

    #[error("Já existe um campo chamado '{0}'")]
    Duplicate(String),
}

/// Resultado do parse: registro + eventual mudança de schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub record: Record,
    pub schema_change: Option<SchemaChange>,
}

/// Divide frames em campos e acompanha o schema.
#[derive(Debug, Clone)]
pub struct RecordParser {
    schema: Option<Schema>,
    next_id: SchemaId,
    last_column_is_checksum: bool,
}

impl RecordParser {
    pub fn new(last_column_is_checksum: bool) -> Self {
        Self {
            schema: None,
            next_id: 1,
            last_column_is_checksum,
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn last_column_is_checksum(&self) -> bool {
        self.last_column_is_checksum
    }

    /// Converte um frame em registro.
    pub fn parse(&mut self, frame: &str) -> Result<ParsedFrame, MalformedRecordError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(MalformedRecordError::Empty);
        }

        let values: Vec<FieldValue> = frame.split(FIELD_SEPARATOR).map(FieldValue::parse).collect();
        if values.len() > MAX_FIELDS {
            return Err(MalformedRecordError::TooManyFields {
                count: values.len(),
                max: MAX_FIELDS,
            });
        }

        let schema_change = self.adjust_schema(values.len());
        let Some(schema) = self.schema.as_ref() else {
            return Err(MalformedRecordError::Empty);
        };

        let last = values.len() - 1;
        let fields = values
            .into_iter()
            .zip(schema.names.iter())
            .enumerate()
            .map(|(index, (value, name))| Field {
                name: name.clone(),
                role: if self.last_column_is_checksum && index == last {
                    FieldRole::Checksum
                } else {
                    FieldRole::Data
                },
                value,
            })
            .collect();

        Ok(ParsedFrame {
            record: Record {
                schema_id: schema.id,
                fields,
            },
            schema_change,
        })
    }

    /// Ajusta o schema à quantidade de campos recebida.
    ///
    /// Nomes de posições que continuam existindo são preservados; posições
    /// novas recebem nomes padrão e as removidas saem do fim.
    fn adjust_schema(&mut self, count: usize) -> Option<SchemaChange> {
        let (kind, names) = match &self.schema {
            None => (
                SchemaChangeKind::Initial,
                (0..count).map(default_field_name).collect::<Vec<_>>(),
            ),
            Some(current) if current.len() == count => return None,
            Some(current) if count > current.len() => {
                let mut names = current.names.clone();
                for index in current.len()..count {
                    names.push(unique_default_name(&names, index));
                }
                (SchemaChangeKind::Grew, names)
            }
            Some(current) => (SchemaChangeKind::Shrank, current.names[..count].to_vec()),
        };

        let change = self.install(kind, names);
        info!(
            "Schema {:?}: {} campos ({})",
            change.kind,
            change.current.len(),
            change.current.names.join(", ")
        );
        Some(change)
    }

    /// Renomeia a posição `index` do schema atual.
    pub fn rename(&mut self, index: usize, new_name: &str) -> Result<SchemaChange, RenameError> {
        let current = self.schema.as_ref().ok_or(RenameError::NoSchema)?;
        let new_name = new_name.trim();
        if index >= current.len() {
            return Err(RenameError::OutOfRange {
                index,
                len: current.len(),
            });
        }
        if new_name.is_empty() {
            return Err(RenameError::EmptyName);
        }
        if let Some(existing) = current.position_of(new_name) {
            if existing != index {
                return Err(RenameError::Duplicate(new_name.to_string()));
            }
        }

        let mut names = current.names.clone();
        names[index] = new_name.to_string();
        Ok(self.install(SchemaChangeKind::Renamed, names))
    }

    fn install(&mut self, kind: SchemaChangeKind, names: Vec<String>) -> SchemaChange {
        let current = Schema {
            id: self.next_id,
            names,
        };
        self.next_id += 1;
        let previous = self.schema.replace(current.clone());
        SchemaChange {
            kind,
            previous,
            current,
        }
    }
}

/// Nome padrão para `index` que ainda não esteja em uso (um campo
/// renomeado pode ter tomado `fieldN`).
fn unique_default_name(names: &[String], index: usize) -> String {
    let base = default_field_name(index);
    if !names.contains(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !names.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn names(parser: &RecordParser) -> Vec<String> {
        parser.schema().unwrap().names.clone()
    }

    #[test]
    fn first_frame_assigns_default_names() {
        let mut parser = RecordParser::new(true);
        let parsed = parser.parse("23,45,8").unwrap();
        let change = parsed.schema_change.unwrap();
        assert_eq!(change.kind, SchemaChangeKind::Initial);
        assert!(change.previous.is_none());
        assert_eq!(names(&parser), vec!["field1", "field2", "field3"]);

        let record = parsed.record;
        assert_eq!(record.fields.len(), 3);
        assert_eq!(record.data_fields().count(), 2);
        assert_eq!(record.checksum_field().unwrap().value.raw(), Some(8.0));
    }

    #[test]
    fn same_count_keeps_schema() {
        let mut parser = RecordParser::new(true);
        let first = parser.parse("1,2,3").unwrap();
        let second = parser.parse("4,5,9").unwrap();
        assert!(second.schema_change.is_none());
        assert_eq!(first.record.schema_id, second.record.schema_id);
    }

    #[test]
    fn numeric_and_text_fields() {
        let mut parser = RecordParser::new(true);
        let record = parser.parse(" SUMMARY, 12.5 ,-3,abc,5 ").unwrap().record;
        assert_eq!(record.fields[0].value, FieldValue::Text("SUMMARY".into()));
        assert_eq!(record.fields[1].value.raw(), Some(12.5));
        assert_eq!(record.fields[2].value.raw(), Some(-3.0));
        assert_eq!(record.fields[3].value, FieldValue::Text("abc".into()));
    }

    #[test]
    fn non_finite_text_stays_text() {
        assert_eq!(FieldValue::parse("NaN"), FieldValue::Text("NaN".into()));
        assert_eq!(FieldValue::parse("inf"), FieldValue::Text("inf".into()));
        assert_eq!(FieldValue::parse(""), FieldValue::Text(String::new()));
    }

    #[test]
    fn growth_preserves_names_and_appends_defaults() {
        let mut parser = RecordParser::new(true);
        parser.parse("1,2,3").unwrap();
        parser.rename(0, "temp").unwrap();

        let parsed = parser.parse("1,2,3,4,0").unwrap();
        let change = parsed.schema_change.unwrap();
        assert_eq!(change.kind, SchemaChangeKind::Grew);
        assert_eq!(names(&parser), vec!["temp", "field2", "field3", "field4", "field5"]);
        assert_eq!(change.previous.unwrap().len(), 3);
    }

    #[test]
    fn shrink_drops_trailing_names() {
        let mut parser = RecordParser::new(true);
        parser.parse("1,2,3,6").unwrap();
        parser.rename(1, "humidity").unwrap();
        let change = parser.parse("1,2,3").unwrap().schema_change.unwrap();
        assert_eq!(change.kind, SchemaChangeKind::Shrank);
        assert_eq!(names(&parser), vec!["field1", "humidity", "field3"]);
    }

    #[test]
    fn each_change_gets_a_new_schema_id() {
        let mut parser = RecordParser::new(true);
        let a = parser.parse("1,1").unwrap().record.schema_id;
        let b = parser.parse("1,1,2").unwrap().record.schema_id;
        let c = parser.parse("1,1").unwrap().record.schema_id;
        assert!(a < b && b < c);
    }

    #[test]
    fn grown_default_name_avoids_collision() {
        let mut parser = RecordParser::new(true);
        parser.parse("1,1").unwrap();
        parser.rename(0, "field3").unwrap();
        parser.parse("1,2,3").unwrap();
        assert_eq!(names(&parser), vec!["field3", "field2", "field3_2"]);
    }

    #[test]
    fn rename_rejects_bad_input() {
        let mut parser = RecordParser::new(true);
        assert_eq!(parser.rename(0, "x"), Err(RenameError::NoSchema));
        parser.parse("1,2,3").unwrap();
        assert_eq!(
            parser.rename(5, "x"),
            Err(RenameError::OutOfRange { index: 5, len: 3 })
        );
        assert_eq!(parser.rename(0, "  "), Err(RenameError::EmptyName));
        assert_eq!(
            parser.rename(0, "field2"),
            Err(RenameError::Duplicate("field2".into()))
        );
        assert!(parser.rename(0, "field1").is_ok());
    }

    #[test]
    fn without_checksum_column_all_fields_are_data() {
        let mut parser = RecordParser::new(false);
        let record = parser.parse("1,2,3").unwrap().record;
        assert_eq!(record.data_fields().count(), 3);
        assert!(record.checksum_field().is_none());
    }

    #[test]
    fn malformed_frames() {
        let mut parser = RecordParser::new(true);
        assert_eq!(parser.parse("   "), Err(MalformedRecordError::Empty));
        let wide = vec!["1"; MAX_FIELDS + 1].join(",");
        assert_eq!(
            parser.parse(&wide),
            Err(MalformedRecordError::TooManyFields {
                count: MAX_FIELDS + 1,
                max: MAX_FIELDS
            })
        );
        assert!(parser.schema().is_none());
    }
}
