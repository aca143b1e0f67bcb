//! Live caption relay and translation.
//!
//! DESIGN
//! ======
//! [`CaptionProducer`] is the speaking side: it publishes interim fragments
//! as recognition revises them and a final fragment when an utterance
//! settles. [`CaptionConsumer`] is the viewing side: it shows the newest
//! fragment immediately in the source language and, when a target language
//! is selected, asks the server for a translation.
//!
//! Interim fragments arrive many times a second while someone speaks, so
//! translation requests for them ride a trailing debounce: each new interim
//! fragment restarts a short timer, and only the fragment still current
//! when the timer fires is sent for translation. Final fragments skip the
//! debounce and translate immediately. A fragment that already carries a
//! translation for the selected language (attached upstream by the speaker)
//! is used as is, with no round trip.
//!
//! Results are matched by target language only. If the viewer switches
//! languages while a request is in flight, the late result no longer
//! matches and is dropped rather than shown in the wrong language.

use std::sync::Arc;
use std::time::Duration;

use protocol::{CaptionFragment, ClientMessage, SessionCode};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionError, ConnectionManager};

pub const TRANSLATION_DEBOUNCE: Duration = Duration::from_millis(300);

/// What the caption area currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptionText {
    pub original: String,
    pub translated: Option<String>,
    /// Inline translation failure, shown alongside the untranslated text.
    pub error: Option<String>,
    pub is_final: bool,
}

// =============================================================================
// PRODUCER
// =============================================================================

/// Publishes this client's speech fragments into the session.
#[derive(Clone)]
pub struct CaptionProducer {
    connection: ConnectionManager,
    code: SessionCode,
    source_language: String,
}

impl CaptionProducer {
    #[must_use]
    pub fn new(
        connection: ConnectionManager,
        code: SessionCode,
        source_language: impl Into<String>,
    ) -> Self {
        Self { connection, code, source_language: source_language.into() }
    }

    /// Publish an in-progress fragment that later fragments will revise.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down; interim text
    /// lost this way is superseded by the next fragment anyway.
    pub async fn interim(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.publish(self.fragment(text.into(), false)).await
    }

    /// Publish the settled form of an utterance.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down.
    pub async fn finalize(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.publish(self.fragment(text.into(), true)).await
    }

    /// Publish a fully assembled fragment, translations attached and all.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down.
    pub async fn publish(&self, fragment: CaptionFragment) -> Result<(), ConnectionError> {
        self.connection
            .send(ClientMessage::Caption { code: self.code.clone(), fragment })
            .await
    }

    fn fragment(&self, text: String, is_final: bool) -> CaptionFragment {
        CaptionFragment {
            text,
            source_language: self.source_language.clone(),
            is_final,
            translations: std::collections::BTreeMap::new(),
        }
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

/// Receives caption fragments and keeps the displayed text current,
/// requesting translations when a target language is selected.
#[derive(Clone)]
pub struct CaptionConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    connection: ConnectionManager,
    display_tx: watch::Sender<CaptionText>,
    state: Mutex<State>,
}

struct State {
    target_language: Option<String>,
    last: Option<CaptionFragment>,
    debounce: Option<JoinHandle<()>>,
}

impl CaptionConsumer {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        let (display_tx, _) = watch::channel(CaptionText::default());
        Self {
            inner: Arc::new(Inner {
                connection,
                display_tx,
                state: Mutex::new(State { target_language: None, last: None, debounce: None }),
            }),
        }
    }

    /// Watch the displayed caption text.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CaptionText> {
        self.inner.display_tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> CaptionText {
        self.inner.display_tx.borrow().clone()
    }

    /// Select the language translations are requested into, or `None` to
    /// show source text only. The newest fragment is re-translated right
    /// away so the switch takes effect without waiting for more speech.
    pub async fn set_language(&self, target: Option<String>) {
        let request = {
            let mut state = self.inner.state.lock().await;
            if let Some(handle) = state.debounce.take() {
                handle.abort();
            }
            state.target_language = target;
            state.last.clone().zip(state.target_language.clone())
        };

        if let Some((fragment, target)) = request {
            self.render_and_translate(&fragment, Some(&target), true).await;
        }
    }

    /// Feed one fragment from the session into the display.
    pub async fn handle_fragment(&self, fragment: CaptionFragment) {
        let target = {
            let mut state = self.inner.state.lock().await;
            state.last = Some(fragment.clone());
            state.target_language.clone()
        };
        self.render_and_translate(&fragment, target.as_deref(), false).await;
    }

    /// Feed a translation result from the session. Results for a language
    /// other than the currently selected one are stale and dropped.
    pub async fn handle_translation(&self, text: String, target_language: &str) {
        let state = self.inner.state.lock().await;
        if state.target_language.as_deref() != Some(target_language) {
            return;
        }
        drop(state);
        self.inner.display_tx.send_modify(|display| {
            display.translated = Some(text);
            display.error = None;
        });
    }

    /// Feed a translation failure. The source text stays up with the error
    /// inline; the next fragment clears it.
    pub fn handle_translation_failure(&self, message: String) {
        self.inner.display_tx.send_modify(|display| {
            display.error = Some(message);
        });
    }

    async fn render_and_translate(
        &self,
        fragment: &CaptionFragment,
        target: Option<&str>,
        immediate: bool,
    ) {
        let mut display = CaptionText {
            original: fragment.text.clone(),
            translated: None,
            error: None,
            is_final: fragment.is_final,
        };

        let Some(target) = target else {
            self.inner.display_tx.send_replace(display);
            return;
        };

        // Attached translation or same language: nothing to request.
        if let Some(carried) = fragment.translation_for(target) {
            display.translated = Some(carried.to_owned());
            self.inner.display_tx.send_replace(display);
            return;
        }
        if fragment.source_language == target {
            self.inner.display_tx.send_replace(display);
            return;
        }

        self.inner.display_tx.send_replace(display);

        if fragment.is_final || immediate {
            self.cancel_debounce().await;
            let _ = self
                .inner
                .connection
                .send(ClientMessage::RequestTranslation {
                    text: fragment.text.clone(),
                    source_language: fragment.source_language.clone(),
                    target_language: target.to_owned(),
                })
                .await;
        } else {
            self.restart_debounce().await;
        }
    }

    async fn cancel_debounce(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(handle) = state.debounce.take() {
            handle.abort();
        }
    }

    /// Trailing debounce: each interim fragment restarts the timer, and
    /// only the fragment still current when it fires gets translated.
    async fn restart_debounce(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(handle) = state.debounce.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(TRANSLATION_DEBOUNCE).await;
            let request = {
                let state = inner.state.lock().await;
                state.last.clone().zip(state.target_language.clone())
            };
            if let Some((fragment, target)) = request {
                let _ = inner
                    .connection
                    .send(ClientMessage::RequestTranslation {
                        text: fragment.text,
                        source_language: fragment.source_language,
                        target_language: target,
                    })
                    .await;
            }
        }));
    }
}

#[cfg(test)]
#[path = "captions_test.rs"]
mod tests;
