//! Notification generation and delivery.
//!
//! Builders produce [`Notification`] values for each clinic event. Every
//! write goes through [`publish`], which stamps due notifications as
//! delivered, stores the batch atomically and pushes due ones to online
//! owners. Future-dated notifications are left for [`sweep_due`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ojas_shared::api::{NotificationPage, Pagination};
use ojas_shared::clock;
use ojas_shared::constants::{POST_REMINDER_OFFSET_HOURS, PRE_REMINDER_OFFSET_HOURS};
use ojas_shared::models::{
    Appointment, Message, Notification, NotificationKind, Priority, ReminderPhase, User,
};
use ojas_shared::protocol::{NotificationPayload, ServerEvent};
use ojas_shared::{NotificationId, UserId};

use crate::api::AppState;
use crate::error::{NotFoundExt, ServerError};

/// Upper bound on notifications handled per sweep tick.
const SWEEP_BATCH: u32 = 500;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn welcome(user: &User, now: DateTime<Utc>) -> Notification {
    Notification::new(
        user.id.clone(),
        NotificationKind::Welcome,
        "Welcome to Ojas",
        format!(
            "Namaste {}, your account is ready. You can message your care team and follow your appointments here.",
            user.name
        ),
        Priority::Low,
        now,
        now,
    )
}

/// When a reminder of `phase` fires for an appointment starting at `starts_at`.
pub fn reminder_time(starts_at: DateTime<Utc>, phase: ReminderPhase) -> DateTime<Utc> {
    match phase {
        ReminderPhase::Pre => starts_at - chrono::Duration::hours(PRE_REMINDER_OFFSET_HOURS),
        ReminderPhase::Post => starts_at + chrono::Duration::hours(POST_REMINDER_OFFSET_HOURS),
    }
}

/// The reminder pair for an appointment: patient first, then practitioner.
pub fn appointment_reminders(
    appointment: &Appointment,
    phase: ReminderPhase,
    now: DateTime<Utc>,
) -> [Notification; 2] {
    let at = reminder_time(appointment.starts_at, phase);
    let when = appointment.starts_at.format("%d %b %Y, %H:%M UTC");
    let therapy = &appointment.therapy;
    let kind = NotificationKind::AppointmentReminder {
        appointment_id: appointment.id,
        phase,
    };

    let (priority, title, patient_text, practitioner_text) = match phase {
        ReminderPhase::Pre => (
            Priority::High,
            "Upcoming appointment",
            format!(
                "Your {therapy} session is tomorrow ({when}). Please follow your pre-procedure guidelines."
            ),
            format!("You have a {therapy} session tomorrow ({when})."),
        ),
        ReminderPhase::Post => (
            Priority::Medium,
            "Post-therapy care",
            format!(
                "We hope your {therapy} session went well. Rest, stay warm and follow your post-procedure care instructions."
            ),
            format!("Please record your notes for the {therapy} session of {when}."),
        ),
    };

    [
        Notification::new(
            appointment.patient_id.clone(),
            kind.clone(),
            title,
            patient_text,
            priority,
            at,
            now,
        ),
        Notification::new(
            appointment.practitioner_id.clone(),
            kind,
            title,
            practitioner_text,
            priority,
            at,
            now,
        ),
    ]
}

pub fn appointment_scheduled(appointment: &Appointment, now: DateTime<Utc>) -> [Notification; 2] {
    let when = appointment.starts_at.format("%d %b %Y, %H:%M UTC");
    let text = format!("{} booked for {when}.", appointment.therapy);
    let kind = NotificationKind::AppointmentScheduled {
        appointment_id: appointment.id,
    };
    to_both(appointment, kind, "Appointment scheduled", &text, Priority::Medium, now)
}

pub fn appointment_updated(appointment: &Appointment, now: DateTime<Utc>) -> [Notification; 2] {
    let when = appointment.starts_at.format("%d %b %Y, %H:%M UTC");
    let text = format!(
        "{} on {when} is now {}.",
        appointment.therapy, appointment.status
    );
    let kind = NotificationKind::AppointmentUpdated {
        appointment_id: appointment.id,
        status: appointment.status,
    };
    to_both(appointment, kind, "Appointment updated", &text, Priority::Medium, now)
}

pub fn procedure_precaution(
    appointment: &Appointment,
    instructions: &str,
    now: DateTime<Utc>,
) -> Notification {
    Notification::new(
        appointment.patient_id.clone(),
        NotificationKind::ProcedurePrecaution {
            appointment_id: appointment.id,
            instructions: instructions.to_string(),
        },
        format!("Before your {} session", appointment.therapy),
        instructions,
        Priority::High,
        now,
        now,
    )
}

/// Tells an offline receiver that a message is waiting.
pub fn message_received(message: &Message, sender_name: &str, now: DateTime<Utc>) -> Notification {
    Notification::new(
        message.receiver_id.clone(),
        NotificationKind::Message {
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
        },
        "New message",
        format!("{sender_name} sent you a message."),
        Priority::Low,
        now,
        now,
    )
}

fn to_both(
    appointment: &Appointment,
    kind: NotificationKind,
    title: &str,
    text: &str,
    priority: Priority,
    now: DateTime<Utc>,
) -> [Notification; 2] {
    [
        Notification::new(
            appointment.patient_id.clone(),
            kind.clone(),
            title,
            text,
            priority,
            now,
            now,
        ),
        Notification::new(
            appointment.practitioner_id.clone(),
            kind,
            title,
            text,
            priority,
            now,
            now,
        ),
    ]
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Store a batch atomically and push the due ones to their online owners.
pub async fn publish(
    state: &AppState,
    mut notifications: Vec<Notification>,
) -> Result<Vec<Notification>, ServerError> {
    let now = clock::now();
    for n in notifications.iter_mut() {
        if n.is_due(now) {
            n.delivered_at = Some(now);
        }
    }

    state.db.lock().await.insert_notifications(&notifications)?;

    for n in notifications.iter().filter(|n| n.delivered_at.is_some()) {
        push(state, n).await;
    }

    debug!(count = notifications.len(), "Notifications published");
    Ok(notifications)
}

async fn push(state: &AppState, notification: &Notification) {
    let event = ServerEvent::NewNotification(NotificationPayload {
        notification: notification.clone(),
    });
    let delivered = state
        .registry
        .send_to_user(&notification.user_id, event)
        .await;
    debug!(
        notification = %notification.id,
        user = %notification.user_id,
        connections = delivered,
        "Notification pushed"
    );
}

/// Deliver notifications that became due since the last sweep.
/// Returns how many were delivered.
pub async fn sweep_due(state: &AppState) -> Result<usize, ServerError> {
    let now = clock::now();
    let mut delivered = Vec::new();
    {
        let db = state.db.lock().await;
        for mut n in db.pending_due_notifications(now, SWEEP_BATCH)? {
            if db.mark_notification_delivered(n.id, now)? {
                n.delivered_at = Some(now);
                delivered.push(n);
            }
        }
    }

    for n in &delivered {
        push(state, n).await;
    }
    if !delivered.is_empty() {
        info!(count = delivered.len(), "Delivered due notifications");
    }
    Ok(delivered.len())
}

/// Run [`sweep_due`] forever at a fixed interval.
pub async fn run_sweeper(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = sweep_due(&state).await {
            warn!(error = %e, "Notification sweep failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub async fn list_for_user(
    state: &AppState,
    user: &UserId,
    unread_only: bool,
    page: u32,
    limit: u32,
) -> Result<NotificationPage, ServerError> {
    let now = clock::now();
    let offset = Pagination::offset(page, limit);

    let db = state.db.lock().await;
    let notifications = db.list_notifications(user, unread_only, limit, offset, now)?;
    let total = db.count_notifications(user, unread_only, now)?;
    let unread_count = db.count_notifications(user, true, now)?;

    Ok(NotificationPage {
        notifications,
        pagination: Pagination::new(page, limit, total),
        unread_count,
    })
}

pub async fn mark_read(
    state: &AppState,
    user: &UserId,
    id: NotificationId,
) -> Result<Notification, ServerError> {
    let db = state.db.lock().await;
    db.mark_notification_read(id, user, clock::now())
        .or_not_found("Notification")
}

pub async fn mark_all_read(state: &AppState, user: &UserId) -> Result<u64, ServerError> {
    let db = state.db.lock().await;
    Ok(db.mark_all_notifications_read(user, clock::now())? as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{test_state, user_with_role};
    use chrono::Duration as ChronoDuration;
    use ojas_shared::models::{AppointmentStatus, UserRole};
    use ojas_shared::{AppointmentId, ConnectionId};
    use tokio::sync::mpsc;

    fn appointment(patient: &User, practitioner: &User, starts_at: DateTime<Utc>) -> Appointment {
        let now = clock::now();
        Appointment {
            id: AppointmentId::new(),
            patient_id: patient.id.clone(),
            practitioner_id: practitioner.id.clone(),
            therapy: "Shirodhara".into(),
            starts_at,
            duration_minutes: 45,
            status: AppointmentStatus::Scheduled,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reminder_times() {
        let start = clock::now();
        assert_eq!(
            reminder_time(start, ReminderPhase::Pre),
            start - ChronoDuration::hours(24)
        );
        assert_eq!(
            reminder_time(start, ReminderPhase::Post),
            start + ChronoDuration::hours(1)
        );
    }

    #[tokio::test]
    async fn test_reminder_pair_goes_to_both_participants() {
        let state = test_state();
        let patient = user_with_role(&state, "Asha", UserRole::Patient).await;
        let doctor = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await;
        let appt = appointment(&patient, &doctor, clock::now() + ChronoDuration::days(3));

        let [for_patient, for_doctor] =
            appointment_reminders(&appt, ReminderPhase::Pre, clock::now());
        assert_eq!(for_patient.user_id, patient.id);
        assert_eq!(for_doctor.user_id, doctor.id);
        assert_eq!(for_patient.priority, Priority::High);
        assert_eq!(for_patient.scheduled_for, appt.starts_at - ChronoDuration::hours(24));

        let [post, _] = appointment_reminders(&appt, ReminderPhase::Post, clock::now());
        assert_eq!(post.priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_publish_pushes_due_to_online_owner() {
        let state = test_state();
        let user = user_with_role(&state, "Asha", UserRole::Patient).await;
        let (tx, mut rx) = mpsc::channel(8);
        state
            .registry
            .register(ConnectionId::new(), user.summary(), tx)
            .await;

        let stored = publish(&state, vec![welcome(&user, clock::now())])
            .await
            .unwrap();
        assert!(stored[0].delivered_at.is_some());

        match rx.recv().await {
            Some(ServerEvent::NewNotification(p)) => assert_eq!(p.notification.id, stored[0].id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_future_notification_waits_for_sweep() {
        let state = test_state();
        let user = user_with_role(&state, "Asha", UserRole::Patient).await;

        let mut later = welcome(&user, clock::now());
        later.scheduled_for = clock::now() + ChronoDuration::hours(2);
        let mut due_soon = welcome(&user, clock::now());
        due_soon.scheduled_for = clock::now() - ChronoDuration::seconds(1);
        due_soon.delivered_at = None;

        // Store directly so the second one is due but undelivered.
        state
            .db
            .lock()
            .await
            .insert_notifications(&[later.clone(), due_soon.clone()])
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        state
            .registry
            .register(ConnectionId::new(), user.summary(), tx)
            .await;

        assert_eq!(sweep_due(&state).await.unwrap(), 1);
        match rx.recv().await {
            Some(ServerEvent::NewNotification(p)) => assert_eq!(p.notification.id, due_soon.id),
            other => panic!("unexpected event: {other:?}"),
        }

        // Exactly once.
        assert_eq!(sweep_due(&state).await.unwrap(), 0);

        let page = list_for_user(&state, &user.id, false, 1, 20).await.unwrap();
        assert_eq!(page.notifications.len(), 1);
        assert_eq!(page.pagination.total, 1);
    }

    #[tokio::test]
    async fn test_list_and_mark_read() {
        let state = test_state();
        let user = user_with_role(&state, "Asha", UserRole::Patient).await;
        let other = user_with_role(&state, "Vikram", UserRole::Patient).await;
        let t0 = clock::now() - ChronoDuration::minutes(5);

        let mut batch = Vec::new();
        for i in 0..3 {
            let mut n = welcome(&user, t0);
            n.created_at = t0 + ChronoDuration::seconds(i);
            n.scheduled_for = n.created_at;
            batch.push(n);
        }
        let stored = publish(&state, batch).await.unwrap();

        let page = list_for_user(&state, &user.id, false, 1, 2).await.unwrap();
        assert_eq!(page.notifications.len(), 2);
        assert_eq!(page.notifications[0].id, stored[2].id);
        assert_eq!(page.pagination.pages, 2);
        assert_eq!(page.unread_count, 3);

        assert!(matches!(
            mark_read(&state, &other.id, stored[0].id).await,
            Err(ServerError::NotFound("Notification"))
        ));
        mark_read(&state, &user.id, stored[0].id).await.unwrap();

        let unread = list_for_user(&state, &user.id, true, 1, 20).await.unwrap();
        assert_eq!(unread.notifications.len(), 2);
        assert_eq!(unread.unread_count, 2);

        assert_eq!(mark_all_read(&state, &user.id).await.unwrap(), 2);
        let after = list_for_user(&state, &user.id, false, 1, 20).await.unwrap();
        assert_eq!(after.unread_count, 0);
        assert_eq!(after.pagination.total, 3);
    }
}
