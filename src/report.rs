use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::export;
use crate::forecast::{self, ForecastResult, MIN_SAFE_VALUE};
use crate::models::{CarbonBrushMeasurement, Equipment, EspSession, MeasurementPoint};

/// Forecast view of one piece of equipment.
#[derive(Debug, Clone, Serialize)]
pub struct EquipmentOutlook {
    pub equipment: Equipment,
    pub latest_value: Option<f64>,
    pub forecast: Option<ForecastResult>,
}

impl EquipmentOutlook {
    pub fn from_history(equipment: Equipment, history: &[MeasurementPoint], now: DateTime<Utc>) -> Self {
        let latest_value = history
            .iter()
            .max_by_key(|point| point.timestamp)
            .map(|point| point.value);

        Self {
            equipment,
            latest_value,
            forecast: forecast::forecast_at(history, now),
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.latest_value, Some(value) if value <= MIN_SAFE_VALUE)
    }

    pub fn due_within(&self, months: f64) -> bool {
        self.is_critical()
            || matches!(&self.forecast, Some(f) if f.months_remaining <= months)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub equipment_count: usize,
    pub forecasts: Vec<EquipmentOutlook>,
    pub critical: Vec<EquipmentOutlook>,
    pub open_sessions: Vec<EspSession>,
}

/// Builds the dashboard from freshly fetched records. Equipment with a
/// forecast comes first, soonest replacement on top.
pub fn build_dashboard(
    equipment: Vec<Equipment>,
    histories: &BTreeMap<Uuid, Vec<MeasurementPoint>>,
    sessions: Vec<EspSession>,
    now: DateTime<Utc>,
) -> Dashboard {
    let equipment_count = equipment.len();
    let mut forecasts = Vec::new();
    let mut critical = Vec::new();

    for item in equipment {
        let Some(history) = histories.get(&item.id) else {
            continue;
        };
        let outlook = EquipmentOutlook::from_history(item, history, now);
        if outlook.is_critical() {
            critical.push(outlook);
        } else {
            forecasts.push(outlook);
        }
    }

    forecasts.sort_by(|a, b| {
        let left = a.forecast.as_ref().map_or(f64::INFINITY, |f| f.months_remaining);
        let right = b.forecast.as_ref().map_or(f64::INFINITY, |f| f.months_remaining);
        left.total_cmp(&right)
            .then_with(|| a.equipment.tag.cmp(&b.equipment.tag))
    });
    critical.sort_by(|a, b| a.equipment.tag.cmp(&b.equipment.tag));

    Dashboard {
        equipment_count,
        forecasts,
        critical,
        open_sessions: sessions.into_iter().filter(|s| !s.is_complete).collect(),
    }
}

pub fn build_report(dashboard: &Dashboard, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Equipment Maintenance Report");
    let _ = writeln!(
        output,
        "Generated {} covering {} pieces of equipment",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        dashboard.equipment_count
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Replace Now");

    if dashboard.critical.is_empty() {
        let _ = writeln!(output, "No carbon brushes at or below {MIN_SAFE_VALUE} mm.");
    } else {
        for outlook in dashboard.critical.iter() {
            let _ = writeln!(
                output,
                "- {} ({}, {}) latest {:.1} mm",
                outlook.equipment.tag,
                outlook.equipment.name,
                outlook.equipment.location,
                outlook.latest_value.unwrap_or_default()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Carbon Brush Forecasts");

    if dashboard.forecasts.is_empty() {
        let _ = writeln!(output, "No equipment with carbon-brush history.");
    } else {
        for outlook in dashboard.forecasts.iter() {
            match &outlook.forecast {
                Some(f) => {
                    let _ = writeln!(
                        output,
                        "- {} ({}) {:.1} months left at {:.2} mm/month, due {} (confidence {:.0}%)",
                        outlook.equipment.tag,
                        outlook.equipment.name,
                        f.months_remaining,
                        f.wear_rate_per_month,
                        f.predicted_date.format("%Y-%m-%d"),
                        f.confidence
                    );
                }
                None => {
                    let _ = writeln!(
                        output,
                        "- {} ({}) not enough data",
                        outlook.equipment.tag, outlook.equipment.name
                    );
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open ESP Thermography Sessions");

    if dashboard.open_sessions.is_empty() {
        let _ = writeln!(output, "All sessions complete.");
    } else {
        for session in dashboard.open_sessions.iter() {
            let _ = writeln!(
                output,
                "- {} inspected {}: step {} of {}",
                session.id,
                session.inspected_at.format("%Y-%m-%d"),
                session.completed_steps,
                session.total_steps
            );
        }
    }

    output
}

/// Email-ready replacement notice with the measurement sheet attached.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

/// Returns `None` when the equipment is not due within `horizon_months`.
pub fn build_notification(
    outlook: &EquipmentOutlook,
    measurements: &[CarbonBrushMeasurement],
    horizon_months: f64,
) -> anyhow::Result<Option<Notification>> {
    if !outlook.due_within(horizon_months) {
        return Ok(None);
    }

    let equipment = &outlook.equipment;
    let mut body = String::new();
    let _ = writeln!(body, "Equipment: {} ({})", equipment.name, equipment.tag);
    let _ = writeln!(body, "Location: {}", equipment.location);
    if let Some(latest) = outlook.latest_value {
        let _ = writeln!(body, "Latest carbon-brush thickness: {latest:.1} mm");
    }

    let subject = match &outlook.forecast {
        Some(f) if !outlook.is_critical() => {
            let _ = writeln!(
                body,
                "Forecast: {:.1} months remaining at {:.2} mm/month, replacement by {} (confidence {:.0}%)",
                f.months_remaining,
                f.wear_rate_per_month,
                f.predicted_date.format("%Y-%m-%d"),
                f.confidence
            );
            format!("Carbon brush replacement due soon: {}", equipment.tag)
        }
        _ => {
            let _ = writeln!(body, "At or below the {MIN_SAFE_VALUE} mm replacement threshold.");
            format!("Carbon brush replacement required: {}", equipment.tag)
        }
    };
    let _ = writeln!(body);
    let _ = writeln!(body, "Measurement history attached.");

    Ok(Some(Notification {
        subject,
        body,
        attachment_name: export::export_file_name(equipment),
        attachment: export::carbon_brush_csv(equipment, measurements)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EquipmentKind;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn equipment(tag: &str) -> Equipment {
        Equipment {
            id: Uuid::new_v4(),
            tag: tag.to_string(),
            name: format!("{tag} motor"),
            kind: EquipmentKind::Motor,
            location: "Raw mill".to_string(),
            created_at: now(),
        }
    }

    fn history(values: &[f64]) -> Vec<MeasurementPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| MeasurementPoint {
                timestamp: now() - Duration::days(30 * (values.len() - i) as i64),
                value: *value,
            })
            .collect()
    }

    fn session(is_complete: bool) -> EspSession {
        EspSession {
            id: Uuid::new_v4(),
            equipment_id: Uuid::new_v4(),
            inspected_at: now(),
            inspector: None,
            total_steps: 4,
            completed_steps: if is_complete { 4 } else { 2 },
            is_complete,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn dashboard_orders_by_soonest_replacement() {
        let slow = equipment("MTR-1");
        let fast = equipment("MTR-2");
        let worn = equipment("MTR-3");
        let idle = equipment("TRF-1");

        let mut histories = BTreeMap::new();
        histories.insert(slow.id, history(&[50.0, 49.0]));
        histories.insert(fast.id, history(&[50.0, 40.0]));
        histories.insert(worn.id, history(&[24.0, 19.5]));

        let dashboard = build_dashboard(
            vec![slow, fast, worn, idle],
            &histories,
            vec![session(true), session(false)],
            now(),
        );

        assert_eq!(dashboard.equipment_count, 4);
        let tags: Vec<_> = dashboard.forecasts.iter().map(|o| o.equipment.tag.as_str()).collect();
        assert_eq!(tags, vec!["MTR-2", "MTR-1"]);
        assert_eq!(dashboard.critical.len(), 1);
        assert_eq!(dashboard.critical[0].equipment.tag, "MTR-3");
        assert_eq!(dashboard.open_sessions.len(), 1);
    }

    #[test]
    fn report_lists_every_section() {
        let motor = equipment("MTR-2");
        let mut histories = BTreeMap::new();
        histories.insert(motor.id, history(&[50.0, 40.0]));
        let dashboard = build_dashboard(vec![motor], &histories, vec![], now());

        let report = build_report(&dashboard, now());
        assert!(report.contains("# Equipment Maintenance Report"));
        assert!(report.contains("No carbon brushes at or below 20 mm."));
        assert!(report.contains("- MTR-2 (MTR-2 motor) 2.0 months left at 10.00 mm/month"));
        assert!(report.contains("All sessions complete."));
    }

    #[test]
    fn notification_only_when_due() {
        let outlook = EquipmentOutlook::from_history(equipment("MTR-2"), &history(&[50.0, 40.0]), now());
        assert!(build_notification(&outlook, &[], 1.0).unwrap().is_none());

        let notice = build_notification(&outlook, &[], 3.0).unwrap().unwrap();
        assert_eq!(notice.subject, "Carbon brush replacement due soon: MTR-2");
        assert_eq!(notice.attachment_name, "MTR-2-carbon-brush.csv");
        assert!(notice.body.contains("2.0 months remaining"));
    }

    #[test]
    fn critical_equipment_always_notifies() {
        let outlook = EquipmentOutlook::from_history(equipment("MTR-3"), &history(&[24.0, 19.5]), now());
        assert!(outlook.forecast.is_none());

        let notice = build_notification(&outlook, &[], 0.0).unwrap().unwrap();
        assert_eq!(notice.subject, "Carbon brush replacement required: MTR-3");
    }
}
