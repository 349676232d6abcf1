//! Client-side notification list kept live by relay events.

use std::sync::Arc;

use tracing::debug;

use ojas_shared::api::Pagination;
use ojas_shared::constants::DEFAULT_NOTIFICATION_PAGE_LIMIT;
use ojas_shared::models::Notification;
use ojas_shared::protocol::ServerEvent;
use ojas_shared::NotificationId;

use crate::api::ClinicApi;
use crate::error::Result;
use crate::pending::{run_optimistic, Command};

/// Loaded notifications, newest first, with the server's unread count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationList {
    pub items: Vec<Notification>,
    pub unread_count: u64,
    pub pagination: Option<Pagination>,
}

impl NotificationList {
    fn find_mut(&mut self, id: NotificationId) -> Option<&mut Notification> {
        self.items.iter_mut().find(|n| n.id == id)
    }

    /// Insert a pushed notification unless it is already listed.
    /// Returns `false` for duplicates.
    fn prepend(&mut self, notification: Notification) -> bool {
        if self.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.items.insert(0, notification);
        true
    }
}

/// Optimistically flag one notification read.
struct MarkRead {
    id: NotificationId,
    changed: bool,
}

impl Command<NotificationList> for MarkRead {
    fn name(&self) -> &'static str {
        "mark_notification_read"
    }

    fn apply(&mut self, list: &mut NotificationList) {
        if let Some(n) = list.find_mut(self.id) {
            if !n.is_read {
                n.is_read = true;
                list.unread_count = list.unread_count.saturating_sub(1);
                self.changed = true;
            }
        }
    }

    fn undo(&mut self, list: &mut NotificationList) {
        if !self.changed {
            return;
        }
        if let Some(n) = list.find_mut(self.id) {
            n.is_read = false;
        }
        list.unread_count += 1;
        self.changed = false;
    }
}

/// Optimistically flag everything read.
#[derive(Default)]
struct MarkAllRead {
    flipped: Vec<NotificationId>,
    unread_before: u64,
}

impl Command<NotificationList> for MarkAllRead {
    fn name(&self) -> &'static str {
        "mark_all_notifications_read"
    }

    fn apply(&mut self, list: &mut NotificationList) {
        self.unread_before = list.unread_count;
        for n in list.items.iter_mut().filter(|n| !n.is_read) {
            n.is_read = true;
            self.flipped.push(n.id);
        }
        list.unread_count = 0;
    }

    fn undo(&mut self, list: &mut NotificationList) {
        for id in self.flipped.drain(..) {
            if let Some(n) = list.find_mut(id) {
                n.is_read = false;
            }
        }
        list.unread_count = self.unread_before;
    }
}

pub struct NotificationState<A: ClinicApi> {
    api: Arc<A>,
    list: NotificationList,
}

impl<A: ClinicApi> NotificationState<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            list: NotificationList::default(),
        }
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.list.items
    }

    pub fn unread_count(&self) -> u64 {
        self.list.unread_count
    }

    pub fn list(&self) -> &NotificationList {
        &self.list
    }

    /// Replace local state with the first page from the server.
    pub async fn load(&mut self) -> Result<()> {
        let page = self
            .api
            .notifications(1, DEFAULT_NOTIFICATION_PAGE_LIMIT, false)
            .await?;
        self.list = NotificationList {
            items: page.notifications,
            unread_count: page.unread_count,
            pagination: Some(page.pagination),
        };
        Ok(())
    }

    /// Append the next page, skipping anything already listed.
    /// Returns `false` when there is nothing more to load.
    pub async fn load_more(&mut self) -> Result<bool> {
        let Some(current) = self.list.pagination else {
            self.load().await?;
            return Ok(true);
        };
        if u64::from(current.page) >= current.pages {
            return Ok(false);
        }

        let page = self
            .api
            .notifications(current.page + 1, current.limit, false)
            .await?;
        for n in page.notifications {
            if !self.list.items.iter().any(|have| have.id == n.id) {
                self.list.items.push(n);
            }
        }
        self.list.unread_count = page.unread_count;
        self.list.pagination = Some(page.pagination);
        Ok(true)
    }

    /// Merge a relay event. Returns `true` if it changed the list.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::NewNotification(payload) => self.list.prepend(payload.notification.clone()),
            _ => false,
        }
    }

    /// Flag one notification read. An id outside the loaded pages has no
    /// local row to flip, so the badge is refreshed from the server instead.
    pub async fn mark_read(&mut self, id: NotificationId) -> Result<()> {
        let listed = self.list.items.iter().any(|n| n.id == id);
        let command = MarkRead { id, changed: false };
        let api = Arc::clone(&self.api);
        run_optimistic(&mut self.list, command, async move {
            api.mark_notification_read(id).await
        })
        .await?;

        if !listed {
            let page = self.api.notifications(1, 1, true).await?;
            debug!(notification = %id, unread = page.unread_count, "Refreshed unread count");
            self.list.unread_count = page.unread_count;
        }
        Ok(())
    }

    pub async fn mark_all_read(&mut self) -> Result<()> {
        let api = Arc::clone(&self.api);
        run_optimistic(&mut self.list, MarkAllRead::default(), async move {
            api.mark_all_notifications_read().await
        })
        .await?;
        Ok(())
    }
}
