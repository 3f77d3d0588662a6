use serde::Serialize;

use crate::models::{CarbonBrushMeasurement, Equipment};

#[derive(Serialize)]
struct CarbonBrushRow<'a> {
    tag: &'a str,
    equipment: &'a str,
    measured_at: String,
    brush_position: &'a str,
    thickness_mm: f64,
    inspector: &'a str,
    note: &'a str,
}

/// Renders a carbon-brush history as a CSV sheet, one row per brush reading.
pub fn carbon_brush_csv(
    equipment: &Equipment,
    measurements: &[CarbonBrushMeasurement],
) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for measurement in measurements {
        writer.serialize(CarbonBrushRow {
            tag: &equipment.tag,
            equipment: &equipment.name,
            measured_at: measurement.measured_at.format("%Y-%m-%d %H:%M").to_string(),
            brush_position: &measurement.brush_position,
            thickness_mm: measurement.thickness_mm,
            inspector: measurement.inspector.as_deref().unwrap_or(""),
            note: measurement.note.as_deref().unwrap_or(""),
        })?;
    }

    if measurements.is_empty() {
        writer.write_record([
            "tag",
            "equipment",
            "measured_at",
            "brush_position",
            "thickness_mm",
            "inspector",
            "note",
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV: {}", e.error()))
}

pub fn export_file_name(equipment: &Equipment) -> String {
    let tag: String = equipment
        .tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{tag}-carbon-brush.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EquipmentKind;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn motor() -> Equipment {
        Equipment {
            id: Uuid::new_v4(),
            tag: "MTR 101".to_string(),
            name: "Kiln ID fan motor".to_string(),
            kind: EquipmentKind::Motor,
            location: "Kiln line 1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let equipment = motor();
        let rows = vec![CarbonBrushMeasurement {
            id: Uuid::new_v4(),
            equipment_id: equipment.id,
            measured_at: Utc.with_ymd_and_hms(2026, 2, 4, 9, 30, 0).unwrap(),
            brush_position: "A1".to_string(),
            thickness_mm: 41.5,
            inspector: Some("R. Tanaka".to_string()),
            note: Some("slight sparking, commutator ok".to_string()),
        }];

        let csv = String::from_utf8(carbon_brush_csv(&equipment, &rows).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("tag,equipment,measured_at,brush_position,thickness_mm,inspector,note")
        );
        assert_eq!(
            lines.next(),
            Some("MTR 101,Kiln ID fan motor,2026-02-04 09:30,A1,41.5,R. Tanaka,\"slight sparking, commutator ok\"")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_history_still_has_header() {
        let csv = String::from_utf8(carbon_brush_csv(&motor(), &[]).unwrap()).unwrap();
        assert!(csv.starts_with("tag,equipment,measured_at"));
    }

    #[test]
    fn file_name_is_safe() {
        assert_eq!(export_file_name(&motor()), "MTR_101-carbon-brush.csv");
    }
}
