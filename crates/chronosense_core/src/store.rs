//! Série temporal append-only.
//!
//! Pontos entram em ordem de recepção e nunca são reordenados. Depois de
//! inserido, a validade e os valores crus de um ponto não mudam; apenas o
//! valor calibrado é recalculado (a partir do cru) quando um perfil de
//! calibração muda. O recorte exibido ([`DisplayBuffer`]) é limitado e não
//! afeta a sequência completa, que é a exportada.

use crate::calibration::CalibrationProfile;
use crate::record::{Field, FieldRole, FieldValue, Record, SchemaId};
use crate::validator::Validity;
use jiff::Timestamp;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Linhas visíveis por padrão.
pub const DEFAULT_DISPLAY_LIMIT: usize = 100;

/// Posição de recepção (0, 1, 2, …) desde o último `clear`.
pub type Position = u64;

/// Um registro depois da validação.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    position: Position,
    received_at: Timestamp,
    schema_id: SchemaId,
    fields: Vec<Field>,
    validity: Validity,
}

impl TimeSeriesPoint {
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Recalcula o calibrado do campo a partir do cru. Retorna se havia
    /// um campo numérico de dados com esse nome.
    fn recalibrate(&mut self, name: &str, profile: Option<&CalibrationProfile>) -> bool {
        let mut touched = false;
        for field in self.fields.iter_mut() {
            if field.name != name || field.role != FieldRole::Data {
                continue;
            }
            if let FieldValue::Numeric { raw, calibrated } = &mut field.value {
                *calibrated = profile.map_or(*raw, |p| p.apply(*raw));
                touched = true;
            }
        }
        touched
    }
}

/// Janela de tempo para consultas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    #[default]
    All,
    LastMinutes(u32),
}

impl TimeWindow {
    /// `true` se `at` cai dentro da janela terminada em `now`.
    pub fn contains(&self, at: Timestamp, now: Timestamp) -> bool {
        match self {
            TimeWindow::All => true,
            TimeWindow::LastMinutes(minutes) => {
                let age_ms = now.as_millisecond() - at.as_millisecond();
                age_ms <= i64::from(*minutes) * 60 * 1000
            }
        }
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(TimeWindow::All);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("Janela de 0 minutos".into()),
            Ok(minutes) => Ok(TimeWindow::LastMinutes(minutes)),
            Err(_) => Err(format!("Janela inválida: '{s}' (use minutos ou \"all\")")),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::All => write!(f, "all"),
            TimeWindow::LastMinutes(m) => write!(f, "{m}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeSeriesStore {
    points: Vec<TimeSeriesPoint>,
    next_position: Position,
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere um registro validado. Retorna a posição atribuída.
    pub fn append(&mut self, record: Record, validity: Validity, received_at: Timestamp) -> Position {
        let position = self.next_position;
        self.next_position += 1;
        self.points.push(TimeSeriesPoint {
            position,
            received_at,
            schema_id: record.schema_id,
            fields: record.fields,
            validity,
        });
        position
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&TimeSeriesPoint> {
        self.points.last()
    }

    pub fn get(&self, position: Position) -> Option<&TimeSeriesPoint> {
        // Posições são contíguas desde o último clear
        let first = self.points.first()?.position;
        let index = usize::try_from(position.checked_sub(first)?).ok()?;
        self.points.get(index)
    }

    /// Pontos dentro da janela, em ordem de recepção.
    pub fn window(&self, window: TimeWindow, now: Timestamp) -> impl Iterator<Item = &TimeSeriesPoint> {
        self.points
            .iter()
            .filter(move |p| window.contains(p.received_at, now))
    }

    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.validity.is_valid()).count()
    }

    /// Recalcula o campo em todos os pontos. Retorna quantos mudaram.
    pub fn recalibrate(&mut self, field: &str, profile: Option<&CalibrationProfile>) -> usize {
        let mut changed = 0;
        for point in self.points.iter_mut() {
            if point.recalibrate(field, profile) {
                changed += 1;
            }
        }
        changed
    }

    /// Renomeia a posição `index` em todos os pontos em que ela ainda se
    /// chama `from`, de qualquer schema (o parser carrega os nomes por
    /// posição quando o schema cresce ou encolhe). O nome é rótulo; cru,
    /// calibrado e validade não mudam.
    ///
    /// Pontos que já usam `to` em outra posição ficam como estão.
    pub fn rename_field(&mut self, index: usize, from: &str, to: &str) -> usize {
        let mut renamed = 0;
        for point in self.points.iter_mut() {
            if point.fields.get(index).is_none_or(|f| f.name != from) {
                continue;
            }
            if point.fields.iter().any(|f| f.name == to) {
                debug!("Ponto {} já tem '{to}'; renomeação ignorada", point.position);
                continue;
            }
            point.fields[index].name = to.to_string();
            renamed += 1;
        }
        renamed
    }

    /// Move os pontos de um schema para o identificador que o substituiu.
    pub fn retag_schema(&mut self, from: SchemaId, to: SchemaId) {
        for point in self.points.iter_mut().filter(|p| p.schema_id == from) {
            point.schema_id = to;
        }
    }

    /// Remove todos os pontos e reinicia as posições.
    pub fn clear(&mut self) {
        self.points.clear();
        self.next_position = 0;
    }
}

/// Recorte exibido: as `limit` posições mais recentes.
#[derive(Debug, Clone)]
pub struct DisplayBuffer {
    rows: VecDeque<Position>,
    limit: usize,
}

impl Default for DisplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_LIMIT)
    }
}

impl DisplayBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, position: Position) {
        if self.rows.len() >= self.limit {
            self.rows.pop_front();
        }
        self.rows.push_back(position);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Linhas visíveis, mais recente primeiro, filtradas pela janela.
    pub fn rows<'a>(
        &'a self,
        store: &'a TimeSeriesStore,
        window: TimeWindow,
        now: Timestamp,
    ) -> impl Iterator<Item = &'a TimeSeriesPoint> {
        self.rows
            .iter()
            .rev()
            .filter_map(move |&position| store.get(position))
            .filter(move |p| window.contains(p.received_at(), now))
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordParser;
    use crate::validator::InvalidReason;

    fn at(seconds: i64) -> Timestamp {
        Timestamp::from_second(1_700_000_000 + seconds).unwrap()
    }

    fn record(parser: &mut RecordParser, frame: &str) -> Record {
        parser.parse(frame).unwrap().record
    }

    #[test]
    fn appends_in_receipt_order() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        let a = store.append(record(&mut parser, "1,1"), Validity::Valid, at(0));
        let b = store.append(record(&mut parser, "2,2"), Validity::Valid, at(0));
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().fields()[0].value.raw(), Some(2.0));
    }

    #[test]
    fn window_filters_by_age() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        store.append(record(&mut parser, "1,1"), Validity::Valid, at(0));
        store.append(record(&mut parser, "2,2"), Validity::Valid, at(240));
        store.append(record(&mut parser, "3,3"), Validity::Valid, at(600));

        let now = at(600);
        assert_eq!(store.window(TimeWindow::All, now).count(), 3);
        assert_eq!(store.window(TimeWindow::LastMinutes(10), now).count(), 3);
        assert_eq!(store.window(TimeWindow::LastMinutes(6), now).count(), 2);
        assert_eq!(store.window(TimeWindow::LastMinutes(1), now).count(), 1);
    }

    #[test]
    fn recalibration_uses_raw_values() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        store.append(record(&mut parser, "10,0"), Validity::Valid, at(0));
        store.append(record(&mut parser, "20,0"), Validity::Valid, at(1));

        let p1 = CalibrationProfile::single_point(10.0, 15.0).unwrap();
        assert_eq!(store.recalibrate("field1", Some(&p1)), 2);
        let p2 = CalibrationProfile::single_point(10.0, 11.0).unwrap();
        store.recalibrate("field1", Some(&p2));

        let values: Vec<_> = store
            .points()
            .iter()
            .map(|p| p.field("field1").unwrap().value.clone())
            .collect();
        assert_eq!(
            values,
            vec![
                FieldValue::Numeric { raw: 10.0, calibrated: 11.0 },
                FieldValue::Numeric { raw: 20.0, calibrated: 21.0 },
            ]
        );

        store.recalibrate("field1", None);
        assert_eq!(store.points()[1].field("field1").unwrap().value.calibrated(), Some(20.0));
    }

    #[test]
    fn recalibration_skips_checksum_and_text() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        store.append(record(&mut parser, "abc,5"), Validity::Valid, at(0));
        let p = CalibrationProfile::single_point(0.0, 100.0).unwrap();
        assert_eq!(store.recalibrate("field1", Some(&p)), 0);
        assert_eq!(store.recalibrate("field2", Some(&p)), 0);
        assert_eq!(store.points()[0].fields()[1].value.calibrated(), Some(5.0));
    }

    #[test]
    fn validity_is_kept() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        let invalid = Validity::Invalid(InvalidReason::ChecksumNotNumeric);
        store.append(record(&mut parser, "1,x"), invalid, at(0));
        store.append(record(&mut parser, "1,1"), Validity::Valid, at(0));
        assert_eq!(store.points()[0].validity(), invalid);
        assert_eq!(store.valid_count(), 1);
    }

    #[test]
    fn rename_follows_position_across_schemas() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        let old = record(&mut parser, "1,1");
        let old_schema = old.schema_id;
        store.append(old, Validity::Valid, at(0));
        store.append(record(&mut parser, "1,2,3"), Validity::Valid, at(0));

        assert_eq!(store.rename_field(0, "field1", "temp"), 2);
        assert!(store.points()[0].field("temp").is_some());
        assert!(store.points()[1].field("temp").is_some());
        // Outras posições não mudam
        assert_eq!(store.rename_field(2, "field2", "x"), 0);

        let newer = store.points()[1].schema_id();
        store.retag_schema(old_schema, newer);
        assert_eq!(store.points()[0].schema_id(), newer);
    }

    #[test]
    fn rename_skips_points_that_already_use_the_name() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        store.append(record(&mut parser, "1,2,3,4"), Validity::Valid, at(0));
        store.append(record(&mut parser, "1,2"), Validity::Valid, at(0));

        // O ponto antigo ainda tem `field4` na posição 3
        assert_eq!(store.rename_field(0, "field1", "field4"), 1);
        assert!(store.points()[0].field("field1").is_some());
        assert_eq!(store.points()[1].fields()[0].name, "field4");
    }

    #[test]
    fn clear_resets_positions() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        store.append(record(&mut parser, "1,1"), Validity::Valid, at(0));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.append(record(&mut parser, "1,1"), Validity::Valid, at(0)), 0);
    }

    #[test]
    fn display_buffer_is_bounded_but_store_is_not() {
        let mut parser = RecordParser::new(true);
        let mut store = TimeSeriesStore::new();
        let mut display = DisplayBuffer::new(3);
        for i in 0..5 {
            let pos = store.append(record(&mut parser, &format!("{i},{i}")), Validity::Valid, at(i));
            display.push(pos);
        }
        assert_eq!(store.len(), 5);
        assert_eq!(display.len(), 3);

        let visible: Vec<Position> = display
            .rows(&store, TimeWindow::All, at(5))
            .map(|p| p.position())
            .collect();
        assert_eq!(visible, vec![4, 3, 2]);
    }

    #[test]
    fn time_window_parsing() {
        assert_eq!("all".parse::<TimeWindow>(), Ok(TimeWindow::All));
        assert_eq!(" 15 ".parse::<TimeWindow>(), Ok(TimeWindow::LastMinutes(15)));
        assert!("0".parse::<TimeWindow>().is_err());
        assert!("soon".parse::<TimeWindow>().is_err());
        assert_eq!(TimeWindow::LastMinutes(5).to_string(), "5");
    }
}
