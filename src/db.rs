use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::completion::CompletionState;
use crate::models::{
    CarbonBrushMeasurement, Equipment, EquipmentKind, EspReading, EspSession, EspSessionDetail,
    MeasurementPoint, NewCarbonBrushMeasurement, NewEquipment, NewThermography,
    NewWindingResistance, ThermographyRecord, WindingResistanceRecord,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("record store unavailable: {0}")]
    Unavailable(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("record"),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound("referenced record")
            }
            other => StoreError::Unavailable(other),
        }
    }
}

const EQUIPMENT_COLUMNS: &str = "id, tag, name, kind, location, created_at";
const ESP_SESSION_COLUMNS: &str = "id, equipment_id, inspected_at, inspector, total_steps, \
     completed_steps, is_complete, created_at, updated_at";
const ESP_READING_COLUMNS: &str = "step_index, primary_voltage_v, primary_current_a, \
     secondary_voltage_kv, secondary_current_ma, hotspot_temp_c, relay_status";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let equipment = vec![
        ("MTR-101", "Kiln ID fan motor", EquipmentKind::Motor, "Kiln line 1"),
        ("MTR-205", "Raw mill drive motor", EquipmentKind::Motor, "Raw mill"),
        ("TRF-010", "Main step-down transformer", EquipmentKind::Transformer, "Substation A"),
        ("ESP-001", "Kiln electrostatic precipitator", EquipmentKind::Esp, "Kiln line 1"),
    ];

    let mut ids = BTreeMap::new();
    for (tag, name, kind, location) in equipment {
        let saved = upsert_equipment(
            pool,
            &NewEquipment {
                tag: tag.to_string(),
                name: name.to_string(),
                kind,
                location: location.to_string(),
            },
        )
        .await?;
        ids.insert(tag, saved.id);
    }

    let start = Utc
        .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .single()
        .context("invalid seed date")?;
    let brushes = vec![
        ("MTR-101", [48.0, 44.5, 41.0, 37.0]),
        ("MTR-205", [35.0, 33.8, 32.1, 31.0]),
    ];

    for (tag, thicknesses) in brushes {
        let equipment_id = *ids.get(tag).context("seed equipment missing")?;
        for (month, thickness) in thicknesses.iter().enumerate() {
            for (position, offset) in [("A1", 0.0), ("A2", 0.6)] {
                let source_key = format!("seed-{tag}-{month}-{position}");
                insert_carbon_brush_keyed(
                    pool,
                    equipment_id,
                    &NewCarbonBrushMeasurement {
                        measured_at: Some(start + Duration::days(30 * month as i64)),
                        brush_position: position.to_string(),
                        thickness_mm: thickness + offset,
                        inspector: Some("R. Tanaka".to_string()),
                        note: None,
                    },
                    &source_key,
                )
                .await?;
            }
        }
    }

    Ok(())
}

/// Returns how many rows were inserted; rows whose `source_key` was already
/// imported are skipped.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        tag: String,
        name: String,
        kind: EquipmentKind,
        location: String,
        measured_at: DateTime<Utc>,
        brush_position: String,
        thickness_mm: f64,
        inspector: Option<String>,
        note: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid row {}", line + 1))?;
        let equipment = upsert_equipment(
            pool,
            &NewEquipment {
                tag: row.tag,
                name: row.name,
                kind: row.kind,
                location: row.location,
            },
        )
        .await?;

        let measurement = NewCarbonBrushMeasurement {
            measured_at: Some(row.measured_at),
            brush_position: row.brush_position,
            thickness_mm: row.thickness_mm,
            inspector: row.inspector,
            note: row.note,
        };
        measurement
            .validate()
            .map_err(|reason| anyhow::anyhow!("row {}: {reason}", line + 1))?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_carbon_brush_keyed(pool, equipment.id, &measurement, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn list_equipment(pool: &PgPool) -> StoreResult<Vec<Equipment>> {
    let equipment = sqlx::query_as::<_, Equipment>(&format!(
        "SELECT {EQUIPMENT_COLUMNS} FROM maintenance.equipment ORDER BY tag"
    ))
    .fetch_all(pool)
    .await?;
    Ok(equipment)
}

pub async fn get_equipment(pool: &PgPool, id: Uuid) -> StoreResult<Equipment> {
    sqlx::query_as::<_, Equipment>(&format!(
        "SELECT {EQUIPMENT_COLUMNS} FROM maintenance.equipment WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("equipment"))
}

pub async fn find_equipment_by_tag(pool: &PgPool, tag: &str) -> StoreResult<Equipment> {
    sqlx::query_as::<_, Equipment>(&format!(
        "SELECT {EQUIPMENT_COLUMNS} FROM maintenance.equipment WHERE tag = $1"
    ))
    .bind(tag)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("equipment"))
}

/// Creates the equipment or refreshes its details when the tag already exists.
pub async fn upsert_equipment(pool: &PgPool, equipment: &NewEquipment) -> StoreResult<Equipment> {
    let saved = sqlx::query_as::<_, Equipment>(&format!(
        r#"
        INSERT INTO maintenance.equipment (id, tag, name, kind, location)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tag) DO UPDATE
        SET name = EXCLUDED.name, kind = EXCLUDED.kind, location = EXCLUDED.location
        RETURNING {EQUIPMENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(equipment.tag.trim())
    .bind(equipment.name.trim())
    .bind(equipment.kind)
    .bind(&equipment.location)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

pub async fn list_carbon_brush(
    pool: &PgPool,
    equipment_id: Uuid,
) -> StoreResult<Vec<CarbonBrushMeasurement>> {
    let rows = sqlx::query_as::<_, CarbonBrushMeasurement>(
        r#"
        SELECT id, equipment_id, measured_at, brush_position, thickness_mm, inspector, note
        FROM maintenance.carbon_brush_measurements
        WHERE equipment_id = $1
        ORDER BY measured_at DESC, brush_position
        "#,
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_carbon_brush(
    pool: &PgPool,
    equipment_id: Uuid,
    measurement: &NewCarbonBrushMeasurement,
) -> StoreResult<CarbonBrushMeasurement> {
    let saved = sqlx::query_as::<_, CarbonBrushMeasurement>(
        r#"
        INSERT INTO maintenance.carbon_brush_measurements
        (id, equipment_id, measured_at, brush_position, thickness_mm, inspector, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, equipment_id, measured_at, brush_position, thickness_mm, inspector, note
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(equipment_id)
    .bind(measurement.measured_at.unwrap_or_else(Utc::now))
    .bind(measurement.brush_position.trim())
    .bind(measurement.thickness_mm)
    .bind(&measurement.inspector)
    .bind(&measurement.note)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

async fn insert_carbon_brush_keyed(
    pool: &PgPool,
    equipment_id: Uuid,
    measurement: &NewCarbonBrushMeasurement,
    source_key: &str,
) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO maintenance.carbon_brush_measurements
        (id, equipment_id, measured_at, brush_position, thickness_mm, inspector, note, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(equipment_id)
    .bind(measurement.measured_at.unwrap_or_else(Utc::now))
    .bind(measurement.brush_position.trim())
    .bind(measurement.thickness_mm)
    .bind(&measurement.inspector)
    .bind(&measurement.note)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// One point per inspection: the thinnest brush measured at that instant.
pub async fn wear_history(pool: &PgPool, equipment_id: Uuid) -> StoreResult<Vec<MeasurementPoint>> {
    let points = sqlx::query_as::<_, MeasurementPoint>(
        r#"
        SELECT measured_at AS timestamp, MIN(thickness_mm) AS value
        FROM maintenance.carbon_brush_measurements
        WHERE equipment_id = $1
        GROUP BY measured_at
        ORDER BY measured_at
        "#,
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await?;
    Ok(points)
}

/// Wear histories for every equipment that has carbon-brush readings.
pub async fn all_wear_histories(pool: &PgPool) -> StoreResult<BTreeMap<Uuid, Vec<MeasurementPoint>>> {
    let rows = sqlx::query(
        r#"
        SELECT equipment_id, measured_at, MIN(thickness_mm) AS value
        FROM maintenance.carbon_brush_measurements
        GROUP BY equipment_id, measured_at
        ORDER BY equipment_id, measured_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut histories: BTreeMap<Uuid, Vec<MeasurementPoint>> = BTreeMap::new();
    for row in rows {
        histories
            .entry(row.try_get("equipment_id")?)
            .or_default()
            .push(MeasurementPoint {
                timestamp: row.try_get("measured_at")?,
                value: row.try_get("value")?,
            });
    }
    Ok(histories)
}

pub async fn list_winding_resistance(
    pool: &PgPool,
    equipment_id: Uuid,
) -> StoreResult<Vec<WindingResistanceRecord>> {
    let rows = sqlx::query_as::<_, WindingResistanceRecord>(
        r#"
        SELECT id, equipment_id, measured_at, phase_uv_ohm, phase_vw_ohm, phase_wu_ohm,
               insulation_mohm, ambient_temp_c, note
        FROM maintenance.winding_resistance_records
        WHERE equipment_id = $1
        ORDER BY measured_at DESC
        "#,
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_winding_resistance(
    pool: &PgPool,
    equipment_id: Uuid,
    record: &NewWindingResistance,
) -> StoreResult<WindingResistanceRecord> {
    let saved = sqlx::query_as::<_, WindingResistanceRecord>(
        r#"
        INSERT INTO maintenance.winding_resistance_records
        (id, equipment_id, measured_at, phase_uv_ohm, phase_vw_ohm, phase_wu_ohm,
         insulation_mohm, ambient_temp_c, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, equipment_id, measured_at, phase_uv_ohm, phase_vw_ohm, phase_wu_ohm,
                  insulation_mohm, ambient_temp_c, note
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(equipment_id)
    .bind(record.measured_at.unwrap_or_else(Utc::now))
    .bind(record.phase_uv_ohm)
    .bind(record.phase_vw_ohm)
    .bind(record.phase_wu_ohm)
    .bind(record.insulation_mohm)
    .bind(record.ambient_temp_c)
    .bind(&record.note)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

pub async fn list_thermography(
    pool: &PgPool,
    equipment_id: Uuid,
) -> StoreResult<Vec<ThermographyRecord>> {
    let rows = sqlx::query_as::<_, ThermographyRecord>(
        r#"
        SELECT id, equipment_id, measured_at, component, max_temp_c, ambient_temp_c, note
        FROM maintenance.thermography_records
        WHERE equipment_id = $1
        ORDER BY measured_at DESC
        "#,
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_thermography(
    pool: &PgPool,
    equipment_id: Uuid,
    record: &NewThermography,
) -> StoreResult<ThermographyRecord> {
    let saved = sqlx::query_as::<_, ThermographyRecord>(
        r#"
        INSERT INTO maintenance.thermography_records
        (id, equipment_id, measured_at, component, max_temp_c, ambient_temp_c, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, equipment_id, measured_at, component, max_temp_c, ambient_temp_c, note
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(equipment_id)
    .bind(record.measured_at.unwrap_or_else(Utc::now))
    .bind(record.component.trim())
    .bind(record.max_temp_c)
    .bind(record.ambient_temp_c)
    .bind(&record.note)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

pub async fn list_esp_sessions(pool: &PgPool) -> StoreResult<Vec<EspSession>> {
    let sessions = sqlx::query_as::<_, EspSession>(&format!(
        "SELECT {ESP_SESSION_COLUMNS} FROM maintenance.esp_sessions ORDER BY inspected_at DESC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(sessions)
}

pub async fn get_esp_session(pool: &PgPool, id: Uuid) -> StoreResult<EspSessionDetail> {
    let session = sqlx::query_as::<_, EspSession>(&format!(
        "SELECT {ESP_SESSION_COLUMNS} FROM maintenance.esp_sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("ESP session"))?;

    let readings = sqlx::query_as::<_, EspReading>(&format!(
        "SELECT {ESP_READING_COLUMNS} FROM maintenance.esp_readings \
         WHERE session_id = $1 ORDER BY step_index"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(EspSessionDetail { session, readings })
}

pub struct EspSessionInsert<'a> {
    pub equipment_id: Uuid,
    pub inspected_at: DateTime<Utc>,
    pub inspector: Option<&'a str>,
    pub total_steps: i32,
    pub readings: &'a [EspReading],
    pub completion: CompletionState,
}

pub async fn create_esp_session(
    pool: &PgPool,
    insert: EspSessionInsert<'_>,
) -> StoreResult<EspSessionDetail> {
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO maintenance.esp_sessions
        (id, equipment_id, inspected_at, inspector, total_steps, completed_steps, is_complete)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(insert.equipment_id)
    .bind(insert.inspected_at)
    .bind(insert.inspector)
    .bind(insert.total_steps)
    .bind(insert.completion.completed_steps)
    .bind(insert.completion.is_complete)
    .execute(&mut *tx)
    .await?;

    insert_readings(&mut tx, id, insert.readings).await?;
    tx.commit().await?;

    get_esp_session(pool, id).await
}

/// Replaces every reading of the session and stores the recomputed completion.
pub async fn replace_esp_readings(
    pool: &PgPool,
    id: Uuid,
    inspector: Option<&str>,
    readings: &[EspReading],
    completion: CompletionState,
) -> StoreResult<EspSessionDetail> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE maintenance.esp_sessions
        SET inspector = COALESCE($2, inspector),
            completed_steps = $3,
            is_complete = $4,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(inspector)
    .bind(completion.completed_steps)
    .bind(completion.is_complete)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound("ESP session"));
    }

    sqlx::query("DELETE FROM maintenance.esp_readings WHERE session_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    insert_readings(&mut tx, id, readings).await?;
    tx.commit().await?;

    get_esp_session(pool, id).await
}

async fn insert_readings(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    session_id: Uuid,
    readings: &[EspReading],
) -> StoreResult<()> {
    for reading in readings {
        sqlx::query(
            r#"
            INSERT INTO maintenance.esp_readings
            (session_id, step_index, primary_voltage_v, primary_current_a,
             secondary_voltage_kv, secondary_current_ma, hotspot_temp_c, relay_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session_id)
        .bind(reading.step_index)
        .bind(reading.primary_voltage_v)
        .bind(reading.primary_current_a)
        .bind(reading.secondary_voltage_kv)
        .bind(reading.secondary_current_ma)
        .bind(reading.hotspot_temp_c)
        .bind(reading.relay_status)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn delete_esp_session(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM maintenance.esp_sessions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("ESP session"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_is_not_found() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }
}
