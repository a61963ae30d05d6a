//! User-facing alerts and toasts.

use std::fmt;

use crate::formatter::MapFormatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

/// Short transient message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub detail: Option<String>,
}

impl Toast {
    pub fn success(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            title: title.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            title: title.into(),
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for Toast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.title, detail),
            None => write!(f, "{}", self.title),
        }
    }
}

/// Surface for messages the user must see.
pub trait UserNotifier: Send + Sync {
    /// Blocking-style alert (permission problems and the like)
    fn alert(&self, title: &str, message: &str);

    fn toast(&self, toast: Toast);
}

/// Notifier for the terminal client: logs and prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl UserNotifier for ConsoleNotifier {
    fn alert(&self, title: &str, message: &str) {
        tracing::warn!("[alert] {}: {}", title, message);
        print!("{}", MapFormatter::format_alert(title, message));
    }

    fn toast(&self, toast: Toast) {
        match toast.kind {
            ToastKind::Error => tracing::warn!("[toast] {}", toast),
            ToastKind::Success | ToastKind::Info => tracing::info!("[toast] {}", toast),
        }
        print!("{}", MapFormatter::format_toast(&toast));
    }
}
