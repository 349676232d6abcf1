//! Appointment booking and the notifications that follow it.

use chrono::Duration;
use tracing::{debug, info};

use ojas_shared::api::{CreateAppointmentRequest, UpdateAppointmentRequest};
use ojas_shared::clock;
use ojas_shared::constants::PRE_REMINDER_OFFSET_HOURS;
use ojas_shared::models::{
    Appointment, AppointmentStatus, Notification, NotificationKind, ReminderPhase, User,
    UserRole,
};
use ojas_shared::AppointmentId;
use ojas_store::AppointmentChanges;

use crate::api::AppState;
use crate::error::{NotFoundExt, ServerError};
use crate::notifications;

fn can_manage(user: &User, appointment: &Appointment) -> bool {
    user.role == UserRole::Admin || appointment.involves(&user.id)
}

pub async fn list(state: &AppState, user: &User) -> Result<Vec<Appointment>, ServerError> {
    Ok(state.db.lock().await.list_appointments_for_user(&user.id)?)
}

/// Book an appointment and notify both participants.
///
/// Also queues the pre-appointment reminder when the session is more than
/// a day away, and a precaution notice for the patient when given.
pub async fn create(
    state: &AppState,
    caller: &User,
    req: CreateAppointmentRequest,
) -> Result<Appointment, ServerError> {
    if req.therapy.trim().is_empty() {
        return Err(ServerError::Validation("Therapy is required".into()));
    }
    if req.duration_minutes == 0 {
        return Err(ServerError::Validation("Duration must be positive".into()));
    }
    if req.patient_id == req.practitioner_id {
        return Err(ServerError::Validation(
            "Patient and practitioner must differ".into(),
        ));
    }

    let now = clock::now();
    let appointment = Appointment {
        id: AppointmentId::new(),
        patient_id: req.patient_id,
        practitioner_id: req.practitioner_id,
        therapy: req.therapy.trim().to_string(),
        starts_at: req.starts_at,
        duration_minutes: req.duration_minutes,
        status: AppointmentStatus::Scheduled,
        notes: req.notes,
        created_at: now,
        updated_at: now,
    };
    if !can_manage(caller, &appointment) {
        return Err(ServerError::Forbidden(
            "Only participants can book this appointment".into(),
        ));
    }

    {
        let db = state.db.lock().await;
        let patient = db.get_user(&appointment.patient_id).or_not_found("Patient")?;
        let practitioner = db
            .get_user(&appointment.practitioner_id)
            .or_not_found("Practitioner")?;
        if patient.role != UserRole::Patient || practitioner.role != UserRole::Practitioner {
            return Err(ServerError::Validation(
                "Appointment needs a patient and a practitioner".into(),
            ));
        }
        db.insert_appointment(&appointment)?;
    }

    info!(
        appointment = %appointment.id,
        patient = %appointment.patient_id,
        practitioner = %appointment.practitioner_id,
        "Appointment booked"
    );

    let mut batch: Vec<Notification> = notifications::appointment_scheduled(&appointment, now).into();
    if appointment.starts_at - now > Duration::hours(PRE_REMINDER_OFFSET_HOURS) {
        batch.extend(notifications::appointment_reminders(
            &appointment,
            ReminderPhase::Pre,
            now,
        ));
    }
    if let Some(instructions) = req.precautions.as_deref().map(str::trim) {
        if !instructions.is_empty() {
            batch.push(notifications::procedure_precaution(&appointment, instructions, now));
        }
    }
    notifications::publish(state, batch).await?;

    Ok(appointment)
}

/// Apply changes and notify both participants.
///
/// Cancelling drops the appointment's undelivered reminders. Moving the
/// start time rebuilds them for the new time; phases whose new time has
/// already passed are dropped.
pub async fn update(
    state: &AppState,
    caller: &User,
    id: AppointmentId,
    req: UpdateAppointmentRequest,
) -> Result<Appointment, ServerError> {
    let changes = AppointmentChanges {
        starts_at: req.starts_at,
        status: req.status,
        notes: req.notes,
    };

    let (updated, requeue) = {
        let db = state.db.lock().await;
        let current = db.get_appointment(id).or_not_found("Appointment")?;
        if !can_manage(caller, &current) {
            return Err(ServerError::NotFound("Appointment"));
        }
        let updated = db.update_appointment(id, &changes, clock::now())?;

        let cancelled = updated.status == AppointmentStatus::Cancelled;
        let mut requeue = Vec::new();
        if cancelled || updated.starts_at != current.starts_at {
            for n in db.pending_appointment_reminders(id)? {
                if let NotificationKind::AppointmentReminder { phase, .. } = n.kind {
                    if !requeue.contains(&phase) {
                        requeue.push(phase);
                    }
                }
            }
            let dropped = db.delete_pending_appointment_reminders(id)?;
            debug!(appointment = %id, dropped, "Pending reminders withdrawn");
            if cancelled {
                requeue.clear();
            }
        }
        (updated, requeue)
    };

    info!(appointment = %id, status = %updated.status, "Appointment updated");
    let now = clock::now();
    let mut batch: Vec<Notification> = notifications::appointment_updated(&updated, now).into();
    for phase in requeue {
        if notifications::reminder_time(updated.starts_at, phase) > now {
            batch.extend(notifications::appointment_reminders(&updated, phase, now));
        }
    }
    notifications::publish(state, batch).await?;
    Ok(updated)
}

/// Create the reminder pair for `phase`, due at the phase's offset.
pub async fn schedule_reminder(
    state: &AppState,
    caller: &User,
    id: AppointmentId,
    phase: ReminderPhase,
) -> Result<Vec<Notification>, ServerError> {
    let appointment = state
        .db
        .lock()
        .await
        .get_appointment(id)
        .or_not_found("Appointment")?;
    if !can_manage(caller, &appointment) {
        return Err(ServerError::NotFound("Appointment"));
    }

    let pair = notifications::appointment_reminders(&appointment, phase, clock::now());
    notifications::publish(state, pair.into()).await
}
