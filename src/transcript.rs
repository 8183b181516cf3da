//! Transcript aggregation.
//!
//! Transcription text arrives as incremental fragments for both the user's
//! speech and the model's replies. Fragments accumulate in pending buffers
//! and become history entries only when the service signals turn completion.

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    User,
    Model,
}

/// A finalized transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub author: Author,
    pub text: String,
}

/// Accumulates transcription fragments and finalizes them on turn boundaries.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    pending_user: String,
    pending_model: String,
    history: Vec<TranscriptEntry>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment to the pending buffer for `author`.
    pub fn push_fragment(&mut self, author: Author, text: &str) {
        match author {
            Author::User => self.pending_user.push_str(text),
            Author::Model => self.pending_model.push_str(text),
        }
    }

    /// Finalize the current turn: trim both pending buffers, append the
    /// non-empty ones to history (user before model), and reset the buffers.
    /// Returns the entries that were appended.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        let mut appended = Vec::new();
        let user = self.pending_user.trim();
        if !user.is_empty() {
            appended.push(TranscriptEntry {
                author: Author::User,
                text: user.to_string(),
            });
        }
        let model = self.pending_model.trim();
        if !model.is_empty() {
            appended.push(TranscriptEntry {
                author: Author::Model,
                text: model.to_string(),
            });
        }
        self.pending_user.clear();
        self.pending_model.clear();
        self.history.extend(appended.iter().cloned());
        appended
    }

    /// Discard pending fragments without touching history.
    pub fn reset_pending(&mut self) {
        self.pending_user.clear();
        self.pending_model.clear();
    }

    /// Current unfinalized text for `author`.
    pub fn interim(&self, author: Author) -> &str {
        match author {
            Author::User => &self.pending_user,
            Author::Model => &self.pending_model,
        }
    }

    /// Finalized entries, oldest first.
    pub fn history(&self) -> &[TranscriptEntry] {
        &self.history
    }
}
