use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Width of the filled/unfilled bar, in characters.
pub const BAR_WIDTH: usize = 20;
const FILLED: char = '█';
const UNFILLED: char = '░';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub label: String,
    /// `None` while the size is unknown
    pub total: Option<u64>,
    pub completed: u64,
}

struct Entry {
    id: u64,
    state: TransferProgress,
    bar: ProgressBar,
    finished: bool,
}

struct Inner {
    multi: MultiProgress,
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    clear_finished: AtomicBool,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Inner>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            inner: Arc::new(Inner {
                multi: MultiProgress::with_draw_target(target),
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                clear_finished: AtomicBool::new(false),
            }),
        }
    }

    /// Remove lines as soon as their handle is finished instead of keeping
    /// them until [`complete`](Self::complete).
    pub fn clear_finished(self) -> Self {
        self.inner.clear_finished.store(true, Ordering::Relaxed);
        self
    }

    pub fn create(&self, label: impl Into<String>) -> ProgressHandle {
        let label = label.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.inner.entries();
        let bar = self.inner.multi.add(ProgressBar::new(1));
        bar.set_style(determinate_style());
        bar.set_message(label.clone());
        entries.push(Entry {
            id,
            state: TransferProgress {
                label,
                total: Some(1),
                completed: 0,
            },
            bar,
            finished: false,
        });
        render(&entries);

        ProgressHandle {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Plain-text rendering of every current line, in creation order.
    pub fn frame(&self) -> String {
        frame_of(&self.inner.entries())
    }

    pub fn snapshot(&self) -> Vec<TransferProgress> {
        self.inner.entries().iter().map(|e| e.state.clone()).collect()
    }

    /// Freeze the display: every bar keeps its final state and the terminal
    /// is released for normal output.
    pub fn complete(&self) {
        let mut entries = self.inner.entries();
        for entry in entries.iter_mut().filter(|e| !e.finished) {
            entry.bar.finish();
            entry.finished = true;
        }
        tracing::debug!(lines = entries.len(), "progress scope complete\n{}", frame_of(&entries));
    }

    /// Print a line above the bars without corrupting them.
    pub fn println(&self, line: impl AsRef<str>) {
        let _guard = self.inner.entries();
        if self.inner.multi.println(line.as_ref()).is_err() {
            eprintln!("{}", line.as_ref());
        }
    }
}

/// One line of a [`ProgressReporter`].
pub struct ProgressHandle {
    inner: Arc<Inner>,
    id: u64,
}

impl ProgressHandle {
    /// Set the size and cumulative progress. `total` is at least 1;
    /// `completed` is clamped into `[0, total]`.
    pub fn update(&self, total: u64, completed: i64) {
        let total = total.max(1);
        let completed = (completed.max(0) as u64).min(total);
        self.mutate(|state| {
            state.total = Some(total);
            state.completed = completed;
        });
    }

    /// Progress for a transfer whose size is not known.
    pub fn update_unknown_total(&self, completed: u64) {
        self.mutate(|state| {
            state.total = None;
            state.completed = completed;
        });
    }

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.mutate(|state| state.label = label);
    }

    /// The transfer reached a terminal state.
    pub fn finish(self) {
        let mut entries = self.inner.entries();
        let Some(pos) = entries.iter().position(|e| e.id == self.id) else {
            return;
        };
        if self.inner.clear_finished.load(Ordering::Relaxed) {
            let entry = entries.remove(pos);
            entry.bar.finish_and_clear();
            self.inner.multi.remove(&entry.bar);
        } else {
            let entry = &mut entries[pos];
            entry.bar.finish();
            entry.finished = true;
        }
        render(&entries);
    }

    pub fn snapshot(&self) -> Option<TransferProgress> {
        self.inner
            .entries()
            .iter()
            .find(|e| e.id == self.id)
            .map(|e| e.state.clone())
    }

    fn mutate(&self, f: impl FnOnce(&mut TransferProgress)) {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.iter_mut().find(|e| e.id == self.id) else {
            return;
        };
        let was_known = entry.state.total.is_some();
        f(&mut entry.state);

        let bar = &entry.bar;
        if entry.state.total.is_some() != was_known {
            bar.set_style(match entry.state.total {
                Some(_) => determinate_style(),
                None => indeterminate_style(),
            });
        }
        if let Some(total) = entry.state.total {
            bar.set_length(total);
        }
        bar.set_position(entry.state.completed);
        bar.set_message(entry.state.label.clone());
        render(&entries);
    }
}

/// Called with the entry lock held, which is what serializes redraws.
fn render(entries: &[Entry]) {
    for entry in entries.iter().filter(|e| !e.finished) {
        entry.bar.tick();
    }
}

fn frame_of(entries: &[Entry]) -> String {
    entries
        .iter()
        .map(|e| render_line(&e.state))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `██████████░░░░░░░░░░ | label | 5/10`
pub fn render_line(progress: &TransferProgress) -> String {
    match progress.total {
        Some(total) => format!(
            "{} | {} | {}/{}",
            bar_string(progress.completed as f64 / total as f64, BAR_WIDTH),
            progress.label,
            progress.completed,
            total
        ),
        None => format!(
            "{} | {} | {}/?",
            bar_string(0.0, BAR_WIDTH),
            progress.label,
            progress.completed
        ),
    }
}

/// Filled/unfilled bar for a ratio, clamped to `[0, 1]`.
pub fn bar_string(ratio: f64, width: usize) -> String {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let filled = (ratio * width as f64).floor() as usize;
    let mut bar = String::with_capacity(width * FILLED.len_utf8());
    bar.extend(std::iter::repeat(FILLED).take(filled));
    bar.extend(std::iter::repeat(UNFILLED).take(width - filled));
    bar
}

fn determinate_style() -> ProgressStyle {
    ProgressStyle::with_template("{bar:20} | {msg} | {pos}/{len}")
        .map(|s| s.progress_chars("█░"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn indeterminate_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} | {msg} | {bytes} of unknown size")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
