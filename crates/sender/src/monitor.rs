//! Sensores do host via `sysinfo`.
//!
//! Campos do frame, nesta ordem:
//! 1. uso de CPU (%), uma casa decimal
//! 2. uso de RAM (%), uma casa decimal
//! 3. temperatura da CPU (°C), inteira, só quando algum sensor responde
//!
//! Sem sensor térmico o frame fica com um campo a menos; o receptor trata
//! a mudança de schema.

use chronosense_core::device::{DeviceState, PeriodicTask, SensorReadError};
use chronosense_core::protocol::Reading;
use std::time::Duration;
use sysinfo::{Components, CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, info};

/// Temperaturas acima disso são lixo do driver.
const MAX_PLAUSIBLE_TEMP: f32 = 150.0;

pub struct HostSensors {
    sys: System,
    components: Components,
}

impl HostSensors {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        let components = Components::new_with_refreshed_list();
        if components.is_empty() {
            info!("✗ Nenhum sensor térmico visível; frames sem temperatura");
        } else {
            info!("✓ {} sensores térmicos detectados", components.len());
        }
        Self { sys, components }
    }

    /// Lê os sensores e monta as leituras do frame.
    pub fn read(&mut self) -> Result<Vec<Reading>, SensorReadError> {
        self.sys.refresh_cpu_all();
        self.sys.refresh_memory();
        self.components.refresh(true);

        let total = self.sys.total_memory() as f64;
        if total <= 0.0 {
            return Err(SensorReadError("memória total indisponível".into()));
        }
        let cpu = f64::from(self.sys.global_cpu_usage());
        let ram = self.sys.used_memory() as f64 / total * 100.0;

        let mut readings = vec![Reading::decimals(cpu, 1), Reading::decimals(ram, 1)];
        if let Some(temp) = self.cpu_temp() {
            readings.push(Reading::integer(f64::from(temp)));
        }
        debug!("Leituras: CPU {cpu:.1}% RAM {ram:.1}% ({} campos)", readings.len());
        Ok(readings)
    }

    fn cpu_temp(&self) -> Option<f32> {
        self.components
            .iter()
            .filter(|comp| {
                let label = comp.label().to_lowercase();
                ["cpu", "tctl", "tdie", "package", "core"]
                    .iter()
                    .any(|key| label.contains(key))
            })
            .filter_map(|comp| comp.temperature())
            .filter(|t| *t > 0.0 && *t < MAX_PLAUSIBLE_TEMP)
            .reduce(f32::max)
    }
}

/// Tarefa periódica de leitura.
pub struct SensorTask {
    sensors: HostSensors,
    period: Duration,
}

impl SensorTask {
    pub fn new(sensors: HostSensors, period: Duration) -> Self {
        Self { sensors, period }
    }
}

impl PeriodicTask for SensorTask {
    fn name(&self) -> &str {
        "sensors"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn run(&mut self, state: &mut DeviceState) {
        let reading = self.sensors.read();
        state.record_reading(reading);
    }
}
