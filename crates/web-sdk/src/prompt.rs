//! The binary accept/decline prompt surface. Rendering belongs to the host;
//! the pipeline only opens, observes and closes it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// The user's answer to the consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptChoice {
    Accept,
    Decline,
}

/// Host-rendered consent prompt.
pub trait PromptSurface: Send + Sync {
    /// Whether the prompt is currently visible.
    fn is_open(&self) -> bool;

    /// Show the prompt. The user's answer is delivered on the returned
    /// receiver; dropping the sender means the prompt went away unanswered.
    fn open(&self) -> oneshot::Receiver<PromptChoice>;

    /// Remove the prompt from view.
    fn close(&self);
}

/// Prompt driven from code: answers immediately with a preset choice, or
/// waits for [`ScriptedPrompt::respond`].
#[derive(Default)]
pub struct ScriptedPrompt {
    preset: Option<PromptChoice>,
    open: AtomicBool,
    opened: AtomicUsize,
    pending: Mutex<Option<oneshot::Sender<PromptChoice>>>,
}

impl ScriptedPrompt {
    /// A prompt that stays open until [`ScriptedPrompt::respond`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A prompt the user answers with `choice` as soon as it appears.
    pub fn answering(choice: PromptChoice) -> Self {
        Self {
            preset: Some(choice),
            ..Self::default()
        }
    }

    /// Deliver the user's answer to the open prompt. Returns false when no
    /// prompt is waiting.
    pub fn respond(&self, choice: PromptChoice) -> bool {
        match self.pending.lock().take() {
            Some(tx) => tx.send(choice).is_ok(),
            None => false,
        }
    }

    /// How many times the prompt has been shown.
    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl PromptSurface for ScriptedPrompt {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open(&self) -> oneshot::Receiver<PromptChoice> {
        let (tx, rx) = oneshot::channel();
        self.open.store(true, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        match self.preset {
            Some(choice) => {
                let _ = tx.send(choice);
            }
            None => *self.pending.lock() = Some(tx),
        }
        rx
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.pending.lock().take();
    }
}
