//! CLI progress rendering.
//!
//! Provides an indicatif-backed implementation of the library's
//! [`ProgressCallback`] for interactive terminals and a plain line-printing
//! fallback for pipes and logs.

use fwflash_lib::progress::{ProgressCallback, ProgressId, ProgressKind};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct IndicatifProgressCallback {
    multi_progress: MultiProgress,
    bars: Mutex<HashMap<u64, ProgressBar>>,
    next_id: AtomicU64,
}

impl IndicatifProgressCallback {
    pub fn new() -> Self {
        Self {
            multi_progress: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ProgressCallback for IndicatifProgressCallback {
    fn start(&self, kind: ProgressKind, message: String) -> ProgressId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let bar = match kind {
            ProgressKind::Spinner => {
                let spinner = self.multi_progress.add(ProgressBar::new_spinner());
                spinner.enable_steady_tick(Duration::from_millis(100));
                spinner.set_style(
                    ProgressStyle::with_template("{spinner} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                spinner
            }
            ProgressKind::Bar { total } => {
                let bar = self.multi_progress.add(ProgressBar::new(total));
                bar.set_style(
                    ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} {percent_precise}%")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
                bar
            }
        };
        bar.set_message(message);

        self.bars.lock().unwrap().insert(id, bar);
        ProgressId(id)
    }

    fn update_message(&self, id: ProgressId, message: String) {
        if let Some(bar) = self.bars.lock().unwrap().get(&id.0) {
            bar.set_message(message);
        }
    }

    fn increment(&self, id: ProgressId, delta: u64) {
        if let Some(bar) = self.bars.lock().unwrap().get(&id.0) {
            bar.inc(delta);
        }
    }

    fn finish(&self, id: ProgressId, message: String) {
        if let Some(bar) = self.bars.lock().unwrap().remove(&id.0) {
            bar.finish_with_message(message);
        }
    }
}

/// Line-per-update progress for non-terminal stdout.
pub struct PlainProgressCallback {
    next_id: AtomicU64,
}

impl PlainProgressCallback {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    fn print_line(line: &str) {
        let mut stdout = io::stdout();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

impl ProgressCallback for PlainProgressCallback {
    fn start(&self, _kind: ProgressKind, message: String) -> ProgressId {
        Self::print_line(&message);
        ProgressId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn update_message(&self, _id: ProgressId, message: String) {
        Self::print_line(&message);
    }

    fn increment(&self, _id: ProgressId, _delta: u64) {}

    fn finish(&self, _id: ProgressId, message: String) {
        Self::print_line(&message);
    }
}

pub fn create_progress_callback() -> Arc<dyn ProgressCallback> {
    if io::stdout().is_terminal() {
        Arc::new(IndicatifProgressCallback::new())
    } else {
        Arc::new(PlainProgressCallback::new())
    }
}
