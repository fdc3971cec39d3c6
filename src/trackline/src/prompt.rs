//! Consent prompt rendered on the terminal.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use clap::ValueEnum;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use trackline_web_sdk::{PromptChoice, PromptSurface};

/// How the prompt gets answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConsentMode {
    /// Answer "accept" without asking.
    Accept,
    /// Answer "decline" without asking.
    Decline,
    /// Ask on stdin.
    Ask,
}

pub struct TerminalPrompt {
    mode: ConsentMode,
    open: AtomicBool,
}

impl TerminalPrompt {
    pub fn new(mode: ConsentMode) -> Self {
        Self {
            mode,
            open: AtomicBool::new(false),
        }
    }
}

/// `y`/`yes` accepts, `n`/`no` declines, anything else leaves it unanswered.
pub fn parse_answer(line: &str) -> Option<PromptChoice> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(PromptChoice::Accept),
        "n" | "no" => Some(PromptChoice::Decline),
        _ => None,
    }
}

const QUESTION: &str = "Allow behavioral tracking for this session? [y/n] ";

/// Print the question; returns false if the terminal rejected it.
fn show_question<W: Write>(out: &mut W) -> bool {
    if let Err(e) = write!(out, "{QUESTION}") {
        debug!(error = %e, "failed to print consent question");
        return false;
    }
    if let Err(e) = out.flush() {
        debug!(error = %e, "failed to flush consent question");
        return false;
    }
    true
}

fn ask() -> Option<PromptChoice> {
    show_question(&mut io::stdout());

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => parse_answer(&line),
        Err(e) => {
            warn!(error = %e, "failed to read consent answer");
            None
        }
    }
}

impl PromptSurface for TerminalPrompt {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open(&self) -> oneshot::Receiver<PromptChoice> {
        let (tx, rx) = oneshot::channel();
        self.open.store(true, Ordering::SeqCst);

        match self.mode {
            ConsentMode::Accept => {
                let _ = tx.send(PromptChoice::Accept);
            }
            ConsentMode::Decline => {
                let _ = tx.send(PromptChoice::Decline);
            }
            ConsentMode::Ask => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || {
                        if let Some(choice) = ask() {
                            let _ = tx.send(choice);
                        }
                    });
                }
                Err(_) => warn!("no async runtime, consent prompt left unanswered"),
            },
        }
        rx
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("consent prompt closed");
        }
    }
}
