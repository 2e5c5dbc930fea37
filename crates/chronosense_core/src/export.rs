//! Exportação CSV do store completo e log CSV contínuo.
//!
//! Cabeçalho: `timestamp,date,time,day_of_week,month_of_year,hour,minute,
//! <campos...>,checksum_valid`. Valores numéricos saem calibrados. Linhas
//! de um schema com outra quantidade de campos são completadas com células
//! vazias ou truncadas para caber no cabeçalho atual.

use crate::store::{TimeSeriesPoint, TimeSeriesStore};
use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Colunas de tempo que antecedem os campos.
pub const TIME_COLUMNS: [&str; 7] = [
    "timestamp",
    "date",
    "time",
    "day_of_week",
    "month_of_year",
    "hour",
    "minute",
];

/// Última coluna.
pub const VALIDITY_COLUMN: &str = "checksum_valid";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Nenhum dado para exportar")]
    NoData,

    #[error("Erro de E/S ao exportar: {0}")]
    Io(#[from] std::io::Error),
}

/// Escreve o CSV de todos os pontos do store.
///
/// `field_names` é o cabeçalho de campos (normalmente o schema atual).
pub fn write_csv<W: Write>(
    writer: &mut W,
    store: &TimeSeriesStore,
    field_names: &[String],
    tz: &TimeZone,
) -> Result<usize, ExportError> {
    writeln!(writer, "{}", header_line(field_names))?;

    for point in store.points() {
        writeln!(writer, "{}", csv_row(point, field_names.len(), tz).join(","))?;
    }
    writer.flush()?;
    Ok(store.len())
}

fn header_line(field_names: &[String]) -> String {
    let header: Vec<String> = TIME_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(field_names.iter().map(|n| escape(n)))
        .chain(std::iter::once(VALIDITY_COLUMN.to_string()))
        .collect();
    header.join(",")
}

fn csv_row(point: &TimeSeriesPoint, width: usize, tz: &TimeZone) -> Vec<String> {
    let local = point.received_at().to_zoned(tz.clone());
    let mut row = vec![
        point.received_at().to_string(),
        local.strftime("%d-%m-%Y").to_string(),
        local.strftime("%H:%M:%S").to_string(),
        local.strftime("%A").to_string(),
        local.strftime("%b").to_string(),
        local.strftime("%H").to_string(),
        local.strftime("%M").to_string(),
    ];

    let mut cells: Vec<String> = point
        .fields()
        .iter()
        .map(|f| escape(&f.value.display_text()))
        .collect();
    cells.resize(width, String::new());
    row.extend(cells);

    row.push(point.validity().label().to_string());
    row
}

/// Aspas quando o valor contém vírgula, aspas ou quebra de linha.
fn escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Nome do arquivo: `chronosense-data[-instancia]-<timestamp>.csv`.
pub fn export_filename(instance_name: &str, now: Timestamp) -> String {
    stamped_filename("chronosense-data", instance_name, now)
}

/// Nome do log contínuo: `chronosense-log[-instancia]-<timestamp>.csv`.
pub fn log_filename(instance_name: &str, now: Timestamp) -> String {
    stamped_filename("chronosense-log", instance_name, now)
}

fn stamped_filename(prefix: &str, instance_name: &str, now: Timestamp) -> String {
    let stamp = now.to_string().replace([':', '.'], "-");
    let instance = sanitize_instance(instance_name);
    if instance.is_empty() {
        format!("{prefix}-{stamp}.csv")
    } else {
        format!("{prefix}-{instance}-{stamp}.csv")
    }
}

/// Minúsculas; sequências não alfanuméricas viram um único `-`.
fn sanitize_instance(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_gap = false;
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push('-');
            in_gap = true;
        }
    }
    out
}

/// Exporta o store para um arquivo novo em `dir`.
pub fn export_to_dir(
    dir: &Path,
    instance_name: &str,
    store: &TimeSeriesStore,
    field_names: &[String],
    tz: &TimeZone,
    now: Timestamp,
) -> Result<PathBuf, ExportError> {
    if store.is_empty() {
        return Err(ExportError::NoData);
    }
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_filename(instance_name, now));
    let file = std::fs::File::create(&path)?;
    let mut writer = std::io::BufWriter::new(file);
    let rows = write_csv(&mut writer, store, field_names, tz)?;
    info!("{rows} pontos exportados para {}", path.display());
    Ok(path)
}

// ──────────────────────────────────────────────
// Log contínuo
// ──────────────────────────────────────────────

/// Log CSV gravado durante a ingestão. Cada linha vai para o disco assim
/// que o ponto chega; quando o cabeçalho muda o arquivo é reescrito
/// inteiro com as mesmas regras da exportação.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    file: File,
    field_names: Vec<String>,
    rows: usize,
}

impl CsvLog {
    /// Cria o log em `dir` já com o conteúdo atual do store.
    pub fn create(
        dir: &Path,
        instance_name: &str,
        store: &TimeSeriesStore,
        field_names: &[String],
        tz: &TimeZone,
        now: Timestamp,
    ) -> Result<Self, ExportError> {
        std::fs::create_dir_all(dir)?;
        let base = log_filename(instance_name, now);
        let mut path = dir.join(&base);
        // Nunca sobrescreve um log anterior com o mesmo carimbo
        let mut n = 2;
        while path.exists() {
            path = dir.join(base.replace(".csv", &format!("-{n}.csv")));
            n += 1;
        }
        let (file, rows) = write_fresh(&path, store, field_names, tz)?;
        info!("Gravando log em {}", path.display());
        Ok(Self {
            path,
            file,
            field_names: field_names.to_vec(),
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Linhas de dados no arquivo.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Acrescenta um ponto no fim do arquivo.
    pub fn append(&mut self, point: &TimeSeriesPoint, tz: &TimeZone) -> Result<(), ExportError> {
        let mut line = csv_row(point, self.field_names.len(), tz).join(",");
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Reescreve o arquivo com um novo cabeçalho e todos os pontos.
    pub fn rewrite(
        &mut self,
        store: &TimeSeriesStore,
        field_names: &[String],
        tz: &TimeZone,
    ) -> Result<usize, ExportError> {
        let (file, rows) = write_fresh(&self.path, store, field_names, tz)?;
        self.file = file;
        self.field_names = field_names.to_vec();
        self.rows = rows;
        debug!("Log reescrito: {rows} linhas em {}", self.path.display());
        Ok(rows)
    }
}

/// Trunca `path` e grava cabeçalho e pontos. O arquivo volta posicionado
/// no fim, pronto para `append`.
fn write_fresh(
    path: &Path,
    store: &TimeSeriesStore,
    field_names: &[String],
    tz: &TimeZone,
) -> Result<(File, usize), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let rows = write_csv(&mut writer, store, field_names, tz)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    Ok((file, rows))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
