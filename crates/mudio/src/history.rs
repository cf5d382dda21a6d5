//! Bounded per-connection input history with a recall cursor.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct History {
    lines: VecDeque<String>,
    cap: usize,
    /// Index into `lines` while recalling; `None` means "at the live line".
    cursor: Option<usize>,
}

impl History {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            lines: VecDeque::with_capacity(cap.min(256)),
            cap,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Record a submitted line. Empty lines and repeats of the newest entry are skipped.
    pub fn push(&mut self, line: &str) {
        self.cursor = None;
        if line.is_empty() || self.lines.back().is_some_and(|l| l == line) {
            return;
        }
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Step towards older entries. Stays on the oldest entry once reached.
    pub fn recall_older(&mut self) -> Option<&str> {
        if self.lines.is_empty() {
            return None;
        }
        let i = match self.cursor {
            None => self.lines.len() - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(i);
        self.lines.get(i).map(String::as_str)
    }

    /// Step towards newer entries; `None` once past the newest (back at the live line).
    pub fn recall_newer(&mut self) -> Option<&str> {
        let i = self.cursor? + 1;
        if i >= self.lines.len() {
            self.cursor = None;
            return None;
        }
        self.cursor = Some(i);
        self.lines.get(i).map(String::as_str)
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.cursor = None;
    }
}
