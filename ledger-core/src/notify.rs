//! Best-effort notifications
//!
//! Committed operations hand a [`Notification`] to the [`NotificationDispatcher`],
//! which queues it on a bounded channel. A single background worker drains the
//! queue and calls the injected [`Notifier`]. Delivery never feeds back into the
//! operation that produced it: a full queue drops the message, a failed
//! delivery is logged.
//!
//! ```text
//!  Ledger / Settlement ──dispatch()──► mpsc (bounded) ──► NotificationWorker ──► Notifier
//!        (after commit)                try_send, drop                            (email, log, ...)
//!                                      when full
//! ```

use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Funds deposited
    Deposit,
    /// Funds withdrawn
    Withdrawal,
    /// Funds sent to another account
    Transfer,
    /// Card payment booked
    CardPayment,
    /// Credit issued and principal credited
    CreditIssued,
    /// Installment collected
    InstallmentPaid,
    /// Installment could not be collected
    InstallmentOverdue,
}

/// A message for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Who should hear about it
    pub recipient: UserId,

    /// Event type
    pub kind: NotificationKind,

    /// Free-form payload (amounts, ids)
    pub details: serde_json::Value,

    /// When the underlying operation committed
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification stamped now
    pub fn new(recipient: UserId, kind: NotificationKind, details: serde_json::Value) -> Self {
        Self {
            recipient,
            kind,
            details,
            created_at: Utc::now(),
        }
    }
}

/// Delivery failure reported by a [`Notifier`]
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Transport rejected or lost the message
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notification channel (email, push, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that writes every message to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            kind = ?notification.kind,
            details = %notification.details,
            "Notification"
        );
        Ok(())
    }
}

/// Notifier that keeps messages in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl MemoryNotifier {
    /// Recording notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier that records and then reports every delivery as failed
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Snapshot of everything received so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Messages of one kind
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        if self.fail {
            return Err(NotifyError::Delivery("memory notifier set to fail".to_string()));
        }
        Ok(())
    }
}

/// Message sent to the notification worker
enum DispatchMessage {
    /// Deliver a notification
    Deliver(Notification),

    /// Reply once everything queued before this message was handled
    Flush(oneshot::Sender<()>),

    /// Stop the worker
    Shutdown,
}

/// Background task that drains the notification queue
struct NotificationWorker {
    notifier: Arc<dyn Notifier>,
    mailbox: mpsc::Receiver<DispatchMessage>,
}

impl NotificationWorker {
    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                DispatchMessage::Deliver(notification) => {
                    if let Err(e) = self.notifier.notify(&notification).await {
                        tracing::warn!(
                            recipient = %notification.recipient,
                            kind = ?notification.kind,
                            error = %e,
                            "Notification delivery failed"
                        );
                    }
                }
                DispatchMessage::Flush(response) => {
                    let _ = response.send(());
                }
                DispatchMessage::Shutdown => break,
            }
        }
        tracing::debug!("Notification worker stopped");
    }
}

/// Handle for queueing notifications
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::Sender<DispatchMessage>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("capacity", &self.sender.capacity())
            .finish()
    }
}

impl NotificationDispatcher {
    /// Spawn the worker on the current runtime
    pub fn spawn(notifier: Arc<dyn Notifier>, queue_capacity: usize) -> Self {
        let (sender, mailbox) = mpsc::channel(queue_capacity.max(1));
        let worker = NotificationWorker { notifier, mailbox };

        tokio::spawn(async move {
            worker.run().await;
        });

        Self { sender }
    }

    /// Queue a notification without waiting; drops it if the queue is full
    pub fn dispatch(&self, notification: Notification) {
        match self.sender.try_send(DispatchMessage::Deliver(notification)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(DispatchMessage::Deliver(n))) => {
                tracing::warn!(
                    recipient = %n.recipient,
                    kind = ?n.kind,
                    "Notification queue full, dropping message"
                );
            }
            Err(_) => {
                tracing::warn!("Notification worker is gone, dropping message");
            }
        }
    }

    /// Wait until everything queued so far has been handed to the notifier
    pub async fn flush(&self) -> crate::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchMessage::Flush(tx))
            .await
            .map_err(|_| crate::Error::Concurrency("Notification queue closed".to_string()))?;
        rx.await
            .map_err(|_| crate::Error::Concurrency("Flush response dropped".to_string()))
    }

    /// Stop the worker after the messages already queued
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.sender
            .send(DispatchMessage::Shutdown)
            .await
            .map_err(|_| crate::Error::Concurrency("Notification queue closed".to_string()))
    }
}
