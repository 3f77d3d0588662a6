use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::completion::StepRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "equipment_kind", rename_all = "lowercase")]
pub enum EquipmentKind {
    Motor,
    Transformer,
    Esp,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Equipment {
    pub id: Uuid,
    pub tag: String,
    pub name: String,
    pub kind: EquipmentKind,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEquipment {
    pub tag: String,
    pub name: String,
    pub kind: EquipmentKind,
    #[serde(default)]
    pub location: String,
}

impl NewEquipment {
    pub fn validate(&self) -> Result<(), String> {
        if self.tag.trim().is_empty() {
            return Err("tag must not be blank".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name must not be blank".to_string());
        }
        Ok(())
    }
}

/// One reading in a wear history.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MeasurementPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CarbonBrushMeasurement {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub measured_at: DateTime<Utc>,
    pub brush_position: String,
    pub thickness_mm: f64,
    pub inspector: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCarbonBrushMeasurement {
    pub measured_at: Option<DateTime<Utc>>,
    pub brush_position: String,
    pub thickness_mm: f64,
    pub inspector: Option<String>,
    pub note: Option<String>,
}

impl NewCarbonBrushMeasurement {
    pub fn validate(&self) -> Result<(), String> {
        if self.brush_position.trim().is_empty() {
            return Err("brush_position must not be blank".to_string());
        }
        if !self.thickness_mm.is_finite() || self.thickness_mm < 0.0 {
            return Err("thickness_mm must be a non-negative number".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WindingResistanceRecord {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub measured_at: DateTime<Utc>,
    pub phase_uv_ohm: f64,
    pub phase_vw_ohm: f64,
    pub phase_wu_ohm: f64,
    pub insulation_mohm: Option<f64>,
    pub ambient_temp_c: Option<f64>,
    pub note: Option<String>,
}

impl WindingResistanceRecord {
    /// Spread between the highest and lowest phase, as a percentage of the mean.
    pub fn imbalance_percent(&self) -> f64 {
        let phases = [self.phase_uv_ohm, self.phase_vw_ohm, self.phase_wu_ohm];
        let max = phases.iter().copied().fold(f64::MIN, f64::max);
        let min = phases.iter().copied().fold(f64::MAX, f64::min);
        let mean = phases.iter().sum::<f64>() / phases.len() as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        (max - min) / mean * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindingResistanceView {
    #[serde(flatten)]
    pub record: WindingResistanceRecord,
    pub imbalance_percent: f64,
}

impl From<WindingResistanceRecord> for WindingResistanceView {
    fn from(record: WindingResistanceRecord) -> Self {
        let imbalance_percent = record.imbalance_percent();
        Self {
            record,
            imbalance_percent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWindingResistance {
    pub measured_at: Option<DateTime<Utc>>,
    pub phase_uv_ohm: f64,
    pub phase_vw_ohm: f64,
    pub phase_wu_ohm: f64,
    pub insulation_mohm: Option<f64>,
    pub ambient_temp_c: Option<f64>,
    pub note: Option<String>,
}

impl NewWindingResistance {
    pub fn validate(&self) -> Result<(), String> {
        let phases = [self.phase_uv_ohm, self.phase_vw_ohm, self.phase_wu_ohm];
        if phases.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err("phase resistances must be non-negative numbers".to_string());
        }
        if matches!(self.insulation_mohm, Some(v) if !v.is_finite() || v < 0.0) {
            return Err("insulation_mohm must be a non-negative number".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalSeverity {
    Normal,
    Attention,
    Serious,
    Critical,
}

impl ThermalSeverity {
    pub fn from_rise(rise_c: f64) -> Self {
        match rise_c {
            r if r < 10.0 => Self::Normal,
            r if r < 20.0 => Self::Attention,
            r if r < 40.0 => Self::Serious,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ThermographyRecord {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub measured_at: DateTime<Utc>,
    pub component: String,
    pub max_temp_c: f64,
    pub ambient_temp_c: f64,
    pub note: Option<String>,
}

impl ThermographyRecord {
    pub fn temperature_rise(&self) -> f64 {
        self.max_temp_c - self.ambient_temp_c
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermographyView {
    #[serde(flatten)]
    pub record: ThermographyRecord,
    pub temperature_rise_c: f64,
    pub severity: ThermalSeverity,
}

impl From<ThermographyRecord> for ThermographyView {
    fn from(record: ThermographyRecord) -> Self {
        let temperature_rise_c = record.temperature_rise();
        Self {
            record,
            temperature_rise_c,
            severity: ThermalSeverity::from_rise(temperature_rise_c),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewThermography {
    pub measured_at: Option<DateTime<Utc>>,
    pub component: String,
    pub max_temp_c: f64,
    pub ambient_temp_c: f64,
    pub note: Option<String>,
}

impl NewThermography {
    pub fn validate(&self) -> Result<(), String> {
        if self.component.trim().is_empty() {
            return Err("component must not be blank".to_string());
        }
        if !self.max_temp_c.is_finite() || !self.ambient_temp_c.is_finite() {
            return Err("temperatures must be numbers".to_string());
        }
        Ok(())
    }
}

/// Readings that show a transformer step was actually measured. The relay
/// status is a state flag and is left out.
pub const ESP_MEANINGFUL_FIELDS: &[&str] = &[
    "primary_voltage_v",
    "primary_current_a",
    "secondary_voltage_kv",
    "secondary_current_ma",
    "hotspot_temp_c",
];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EspSession {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub inspected_at: DateTime<Utc>,
    pub inspector: Option<String>,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EspReading {
    pub step_index: i32,
    pub primary_voltage_v: Option<f64>,
    pub primary_current_a: Option<f64>,
    pub secondary_voltage_kv: Option<f64>,
    pub secondary_current_ma: Option<f64>,
    pub hotspot_temp_c: Option<f64>,
    pub relay_status: Option<bool>,
}

impl EspReading {
    pub fn to_step(&self) -> StepRecord {
        StepRecord::new(self.step_index)
            .with("primary_voltage_v", self.primary_voltage_v)
            .with("primary_current_a", self.primary_current_a)
            .with("secondary_voltage_kv", self.secondary_voltage_kv)
            .with("secondary_current_ma", self.secondary_current_ma)
            .with("hotspot_temp_c", self.hotspot_temp_c)
            .with("relay_status", self.relay_status.map(|on| if on { 1.0 } else { 0.0 }))
    }
}

/// Step indexes must be unique and lie in `1..=total_steps`.
pub fn validate_readings(readings: &[EspReading], total_steps: i32) -> Result<(), String> {
    let mut seen = HashSet::new();
    for reading in readings {
        if reading.step_index < 1 || reading.step_index > total_steps {
            return Err(format!(
                "step_index {} is outside 1..={total_steps}",
                reading.step_index
            ));
        }
        if !seen.insert(reading.step_index) {
            return Err(format!("step_index {} appears more than once", reading.step_index));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEspSession {
    pub equipment_id: Uuid,
    pub inspected_at: Option<DateTime<Utc>>,
    pub inspector: Option<String>,
    pub total_steps: Option<i32>,
    #[serde(default)]
    pub readings: Vec<EspReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEspSession {
    pub inspector: Option<String>,
    #[serde(default)]
    pub readings: Vec<EspReading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EspSessionDetail {
    #[serde(flatten)]
    pub session: EspSession,
    pub readings: Vec<EspReading>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::compute_completion;

    fn reading(step_index: i32) -> EspReading {
        EspReading {
            step_index,
            primary_voltage_v: None,
            primary_current_a: None,
            secondary_voltage_kv: None,
            secondary_current_ma: None,
            hotspot_temp_c: None,
            relay_status: None,
        }
    }

    #[test]
    fn relay_status_alone_does_not_complete_a_step() {
        let readings = vec![
            EspReading {
                hotspot_temp_c: Some(62.5),
                ..reading(1)
            },
            EspReading {
                relay_status: Some(true),
                ..reading(2)
            },
        ];
        let steps: Vec<_> = readings.iter().map(EspReading::to_step).collect();

        let state = compute_completion(&steps, 2, ESP_MEANINGFUL_FIELDS);
        assert_eq!(state.completed_steps, 1);
        assert!(!state.is_complete);
    }

    #[test]
    fn readings_must_fit_the_session() {
        assert!(validate_readings(&[reading(1), reading(4)], 4).is_ok());
        assert!(validate_readings(&[reading(0)], 4).is_err());
        assert!(validate_readings(&[reading(5)], 4).is_err());
        assert!(validate_readings(&[reading(2), reading(2)], 4).is_err());
    }

    #[test]
    fn imbalance_uses_spread_over_mean() {
        let record = WindingResistanceRecord {
            id: Uuid::new_v4(),
            equipment_id: Uuid::new_v4(),
            measured_at: Utc::now(),
            phase_uv_ohm: 0.9,
            phase_vw_ohm: 1.0,
            phase_wu_ohm: 1.1,
            insulation_mohm: Some(500.0),
            ambient_temp_c: None,
            note: None,
        };
        assert!((record.imbalance_percent() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn thermal_severity_bands() {
        assert_eq!(ThermalSeverity::from_rise(4.0), ThermalSeverity::Normal);
        assert_eq!(ThermalSeverity::from_rise(10.0), ThermalSeverity::Attention);
        assert_eq!(ThermalSeverity::from_rise(25.0), ThermalSeverity::Serious);
        assert_eq!(ThermalSeverity::from_rise(40.0), ThermalSeverity::Critical);
    }

    #[test]
    fn blank_equipment_tag_is_rejected() {
        let equipment = NewEquipment {
            tag: "  ".to_string(),
            name: "Kiln fan motor".to_string(),
            kind: EquipmentKind::Motor,
            location: String::new(),
        };
        assert!(equipment.validate().is_err());
    }
}
