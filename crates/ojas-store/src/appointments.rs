//! CRUD operations for [`Appointment`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use ojas_shared::models::{Appointment, AppointmentStatus};
use ojas_shared::{AppointmentId, UserId};

use crate::codec::{parse_col, ts, ts_col};
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};

const APPOINTMENT_COLUMNS: &str = "id, patient_id, practitioner_id, therapy, starts_at,
    duration_minutes, status, notes, created_at, updated_at";

/// Fields that may change after booking.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub starts_at: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

impl Database {
    pub fn insert_appointment(&self, appointment: &Appointment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO appointments (id, patient_id, practitioner_id, therapy, starts_at,
                 duration_minutes, status, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                appointment.id.to_string(),
                appointment.patient_id.as_str(),
                appointment.practitioner_id.as_str(),
                appointment.therapy,
                ts(&appointment.starts_at),
                appointment.duration_minutes,
                appointment.status.as_str(),
                appointment.notes,
                ts(&appointment.created_at),
                ts(&appointment.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_appointment(&self, id: AppointmentId) -> Result<Appointment> {
        self.conn()
            .query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                params![id.to_string()],
                row_to_appointment,
            )
            .map_err(not_found)
    }

    /// Appointments where the user is patient or practitioner, soonest first.
    pub fn list_appointments_for_user(&self, user: &UserId) -> Result<Vec<Appointment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE patient_id = ?1 OR practitioner_id = ?1
             ORDER BY starts_at ASC"
        ))?;

        let rows = stmt.query_map(params![user.as_str()], row_to_appointment)?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?);
        }
        Ok(appointments)
    }

    /// Apply `changes` and bump `updated_at`. Returns the updated record.
    pub fn update_appointment(
        &self,
        id: AppointmentId,
        changes: &AppointmentChanges,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let affected = self.conn().execute(
            "UPDATE appointments
             SET starts_at  = COALESCE(?2, starts_at),
                 status     = COALESCE(?3, status),
                 notes      = COALESCE(?4, notes),
                 updated_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                changes.starts_at.as_ref().map(ts),
                changes.status.map(|s| s.as_str()),
                changes.notes,
                ts(&now),
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_appointment(id)
    }
}

fn row_to_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: parse_col(row, 0)?,
        patient_id: parse_col(row, 1)?,
        practitioner_id: parse_col(row, 2)?,
        therapy: row.get(3)?,
        starts_at: ts_col(row, 4)?,
        duration_minutes: row.get(5)?,
        status: parse_col(row, 6)?,
        notes: row.get(7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}
