/// Module quản lý thông báo dạng toast cho tiến trình bridge
///
/// `NotificationCenter` là store được truyền vào qua dependency injection,
/// không dùng state toàn cục. Nó theo dõi `EventBus` và chuyển mỗi
/// `BridgeUpdate` thành toast tương ứng.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::bridge_types::{BridgePhase, BridgeUpdate};

use crate::events::EventBus;

/// Default lifetime of a non-loading toast (ms)
pub const DEFAULT_DURATION_MS: i64 = 5000;

/// Lifetime of a success toast (ms)
pub const SUCCESS_DURATION_MS: i64 = 3000;

/// Các loại toast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
    /// Never expires on its own
    Loading,
}

/// One notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub id: String,
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    /// Auto-dismiss after this many ms; ignored for loading toasts
    pub duration_ms: i64,
    pub shown_at: DateTime<Utc>,
}

impl Toast {
    fn new(kind: ToastKind, title: &str, message: &str, duration_ms: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            duration_ms: duration_ms.unwrap_or(DEFAULT_DURATION_MS),
            shown_at: Utc::now(),
        }
    }

    fn replace(&mut self, kind: ToastKind, title: &str, message: &str, duration_ms: Option<i64>) {
        self.kind = kind;
        self.title = title.to_string();
        self.message = message.to_string();
        self.duration_ms = duration_ms.unwrap_or(DEFAULT_DURATION_MS);
        self.shown_at = Utc::now();
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.kind != ToastKind::Loading && now - self.shown_at >= Duration::milliseconds(self.duration_ms)
    }
}

#[derive(Debug, Default)]
struct State {
    toasts: Vec<Toast>,
    /// bridge operation id -> toast id, only while the operation is running
    operations: HashMap<String, String>,
}

impl State {
    /// Drop operations whose toast is gone
    fn prune_operations(&mut self) {
        let toasts = &self.toasts;
        self.operations
            .retain(|_, toast_id| toasts.iter().any(|t| &t.id == toast_id));
    }
}

/// Toast store
#[derive(Debug, Default)]
pub struct NotificationCenter {
    state: RwLock<State>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a toast and return its id
    pub async fn show(&self, kind: ToastKind, title: &str, message: &str, duration_ms: Option<i64>) -> String {
        let toast = Toast::new(kind, title, message, duration_ms);
        let id = toast.id.clone();

        info!("[toast:{:?}] {}: {}", kind, title, message);
        self.state.write().await.toasts.push(toast);
        id
    }

    /// Replace a toast's content and restart its timer. Returns false if it is gone.
    pub async fn update(
        &self,
        id: &str,
        kind: ToastKind,
        title: &str,
        message: &str,
        duration_ms: Option<i64>,
    ) -> bool {
        let mut state = self.state.write().await;
        match state.toasts.iter_mut().find(|t| t.id == id) {
            Some(toast) => {
                info!("[toast:{:?}] {}: {}", kind, title, message);
                toast.replace(kind, title, message, duration_ms);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.toasts.len();
        state.toasts.retain(|t| t.id != id);
        state.prune_operations();
        state.toasts.len() != before
    }

    /// Toasts still on screen at `now`; expired ones are dropped
    pub async fn active_at(&self, now: DateTime<Utc>) -> Vec<Toast> {
        let mut state = self.state.write().await;
        state.toasts.retain(|t| !t.is_expired(now));
        state.prune_operations();
        state.toasts.clone()
    }

    pub async fn active(&self) -> Vec<Toast> {
        self.active_at(Utc::now()).await
    }

    /// Map one bridge update onto the operation's toast
    pub async fn apply(&self, update: &BridgeUpdate) {
        let (kind, title, duration) = match update.phase {
            BridgePhase::Idle => return,
            BridgePhase::Approving => (ToastKind::Loading, "Approving Token", None),
            BridgePhase::Bridging => (ToastKind::Loading, "Bridging Asset", None),
            BridgePhase::Success => (ToastKind::Success, "Bridge Successful!", Some(SUCCESS_DURATION_MS)),
            BridgePhase::Error => (ToastKind::Error, "Bridge Failed", Some(DEFAULT_DURATION_MS)),
        };

        info!("[toast:{:?}] {}: {}", kind, title, update.message);
        let mut state = self.state.write().await;

        // success/error kết thúc operation, bỏ mapping
        let terminal = update.phase.is_terminal();
        let existing = if terminal {
            state.operations.remove(&update.operation_id)
        } else {
            state.operations.get(&update.operation_id).cloned()
        };

        if let Some(id) = existing {
            if let Some(toast) = state.toasts.iter_mut().find(|t| t.id == id) {
                toast.replace(kind, title, &update.message, duration);
                return;
            }
        }

        let toast = Toast::new(kind, title, &update.message, duration);
        if !terminal {
            state
                .operations
                .insert(update.operation_id.clone(), toast.id.clone());
        }
        state.toasts.push(toast);
    }

    /// Follow the bus until it closes
    pub fn follow(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => self.apply(&update).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Notification center lagged, skipped {} updates", skipped)
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, notification center stops");
                        break;
                    }
                }
            }
        })
    }
}
