use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Category of a captured output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    /// `console.log` and other plain output.
    Log,
    /// `console.error` or a run-ending failure.
    Error,
    /// `console.warn`.
    Warn,
    /// `console.info` and timer results.
    Info,
    /// Value of the final top-level expression.
    Result,
    /// Synthesized marker for a silent successful run.
    Success,
}

/// One captured line of program output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub kind: EntryKind,
    pub content: String,
    /// Milliseconds since the Unix epoch at capture time.
    pub timestamp_ms: u64,
}

impl OutputEntry {
    pub fn new(kind: EntryKind, content: String) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            kind,
            content,
            timestamp_ms,
        }
    }
}

/// Overall outcome of a sandboxed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Success,
    Error,
    /// A fuel, wall-clock, or cancellation budget ended the run.
    TimedOut,
}

/// Everything a run produced, in emission order.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub entries: Vec<OutputEntry>,
    pub duration: Duration,
    pub status: RunStatus,
}

impl ExecutionReport {
    /// Plain-text form of the output, one entry per line.
    pub fn clipboard_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Presentation slot a renderer maps to a concrete color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRole {
    Normal,
    Error,
    Warning,
    Info,
    Accent,
    Muted,
}

/// How a renderer should draw entries of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub glyph: &'static str,
    pub label: &'static str,
    pub color_role: ColorRole,
}

const DESCRIPTORS: &[(EntryKind, EntryDescriptor)] = &[
    (
        EntryKind::Log,
        EntryDescriptor {
            glyph: "›",
            label: "log",
            color_role: ColorRole::Normal,
        },
    ),
    (
        EntryKind::Error,
        EntryDescriptor {
            glyph: "✕",
            label: "error",
            color_role: ColorRole::Error,
        },
    ),
    (
        EntryKind::Warn,
        EntryDescriptor {
            glyph: "⚠",
            label: "warn",
            color_role: ColorRole::Warning,
        },
    ),
    (
        EntryKind::Info,
        EntryDescriptor {
            glyph: "ℹ",
            label: "info",
            color_role: ColorRole::Info,
        },
    ),
    (
        EntryKind::Result,
        EntryDescriptor {
            glyph: "←",
            label: "result",
            color_role: ColorRole::Accent,
        },
    ),
    (
        EntryKind::Success,
        EntryDescriptor {
            glyph: "✓",
            label: "success",
            color_role: ColorRole::Muted,
        },
    ),
];

const DEFAULT_DESCRIPTOR: EntryDescriptor = EntryDescriptor {
    glyph: "•",
    label: "output",
    color_role: ColorRole::Normal,
};

impl EntryKind {
    /// Table lookup with a fallback so renderers keep working if kinds are
    /// added ahead of their descriptors.
    pub fn descriptor(self) -> EntryDescriptor {
        DESCRIPTORS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, descriptor)| *descriptor)
            .unwrap_or(DEFAULT_DESCRIPTOR)
    }
}

/// Ordered sink the interpreter's console natives write into.
#[derive(Debug, Default)]
pub struct ConsoleRecorder {
    entries: Vec<OutputEntry>,
}

impl ConsoleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EntryKind, content: String) {
        self.entries.push(OutputEntry::new(kind, content));
    }

    pub fn take(&mut self) -> Vec<OutputEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
