use crate::dashboard::scheduler::{TaskKey, TaskScheduler};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const TOAST_DISPLAY_MS: u64 = 5_000;
pub const TOAST_EXIT_MS: u64 = 300;
pub const MAX_VISIBLE_TOASTS: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToastView {
    pub id: u64,
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ToastPatch {
    Show { toast: ToastView },
    Pause { id: u64, remaining_ms: u64 },
    Resume { id: u64, remaining_ms: u64 },
    BeginExit { id: u64, duration_ms: u64 },
    Remove { id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToastPhase {
    Counting { deadline: Instant },
    Paused { remaining: Duration },
    Exiting,
}

#[derive(Debug)]
struct ToastEntry {
    id: u64,
    kind: ToastKind,
    message: String,
    phase: ToastPhase,
}

/// Ephemeral notification queue. Timers live in the shared runtime scheduler.
#[derive(Debug, Default)]
pub struct ToastCenter {
    entries: VecDeque<ToastEntry>,
    next_id: u64,
}

impl ToastCenter {
    pub fn push(
        &mut self,
        kind: ToastKind,
        title: impl Into<String>,
        message: impl Into<String>,
        now: Instant,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Vec<ToastPatch> {
        let mut patches = Vec::new();

        while self.entries.len() >= MAX_VISIBLE_TOASTS {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            scheduler.cancel(&TaskKey::ToastExpire(oldest.id));
            scheduler.cancel(&TaskKey::ToastRemove(oldest.id));
            patches.push(ToastPatch::Remove { id: oldest.id });
        }

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        let message = message.into();
        let deadline = now + Duration::from_millis(TOAST_DISPLAY_MS);
        scheduler.schedule(TaskKey::ToastExpire(id), deadline);
        self.entries.push_back(ToastEntry {
            id,
            kind,
            message: message.clone(),
            phase: ToastPhase::Counting { deadline },
        });

        patches.push(ToastPatch::Show {
            toast: ToastView {
                id,
                kind,
                title: title.into(),
                message,
                duration_ms: TOAST_DISPLAY_MS,
            },
        });
        patches
    }

    /// True while a toast with this kind and message is on screen and not leaving.
    pub fn is_showing(&self, kind: ToastKind, message: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry.kind == kind && entry.message == message && entry.phase != ToastPhase::Exiting
        })
    }

    pub fn hover(
        &mut self,
        id: u64,
        now: Instant,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Vec<ToastPatch> {
        let Some(entry) = self.entry_mut(id) else {
            return Vec::new();
        };
        let ToastPhase::Counting { deadline } = entry.phase else {
            return Vec::new();
        };

        scheduler.cancel(&TaskKey::ToastExpire(id));
        let remaining = deadline.saturating_duration_since(now);
        entry.phase = ToastPhase::Paused { remaining };
        vec![ToastPatch::Pause {
            id,
            remaining_ms: duration_ms(remaining),
        }]
    }

    pub fn leave(
        &mut self,
        id: u64,
        now: Instant,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Vec<ToastPatch> {
        let Some(entry) = self.entry_mut(id) else {
            return Vec::new();
        };
        let ToastPhase::Paused { remaining } = entry.phase else {
            return Vec::new();
        };

        let deadline = now + remaining;
        scheduler.schedule(TaskKey::ToastExpire(id), deadline);
        entry.phase = ToastPhase::Counting { deadline };
        vec![ToastPatch::Resume {
            id,
            remaining_ms: duration_ms(remaining),
        }]
    }

    /// Starts the exit transition. Also the expiry path.
    pub fn dismiss(
        &mut self,
        id: u64,
        now: Instant,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Vec<ToastPatch> {
        let Some(entry) = self.entry_mut(id) else {
            return Vec::new();
        };
        if entry.phase == ToastPhase::Exiting {
            return Vec::new();
        }

        entry.phase = ToastPhase::Exiting;
        scheduler.cancel(&TaskKey::ToastExpire(id));
        scheduler.schedule(
            TaskKey::ToastRemove(id),
            now + Duration::from_millis(TOAST_EXIT_MS),
        );
        vec![ToastPatch::BeginExit {
            id,
            duration_ms: TOAST_EXIT_MS,
        }]
    }

    pub fn finish_exit(&mut self, id: u64) -> Vec<ToastPatch> {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                vec![ToastPatch::Remove { id }]
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: u64) -> Option<&mut ToastEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
