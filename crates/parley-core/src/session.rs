//! Conversation session owning the dialogue history.
//!
//! A session is seeded with the system instruction at construction and then
//! grows by one user/assistant pair per successful prompt. Every request
//! carries the whole history, since the upstream model keeps no memory
//! between calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::Mutex;
use tracing::info;

use parley_types::config::{DEFAULT_API_TIMEOUT, DEFAULT_MODEL, InstructionSource};
use parley_types::error::SessionError;
use parley_types::llm::{CompletionRequest, DialogueTurn};

use crate::llm::box_source::BoxCompletionSource;
use crate::relay::{Exchange, Relayed, StreamRelay};

/// Gauge holding the number of committed dialogue turns.
pub const HISTORY_TURNS_GAUGE: &str = "parley_history_turns";

/// Settings needed to build a [`ConversationSession`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// File holding the system instruction. Ignored when text is given.
    pub instruction_file_path: Option<PathBuf>,
    /// Literal system instruction.
    pub instruction_text: Option<String>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Overall deadline for one upstream call.
    pub api_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            instruction_file_path: None,
            instruction_text: None,
            model: DEFAULT_MODEL.to_string(),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

/// The process-wide conversation.
///
/// History mutations are serialized: a prompt holds the history lock from
/// appending the user turn until its relay task commits or rolls back, so
/// concurrent callers queue instead of interleaving turns.
pub struct ConversationSession {
    source: BoxCompletionSource,
    model: String,
    relay: StreamRelay,
    history: Arc<Mutex<Vec<DialogueTurn>>>,
}

impl ConversationSession {
    /// Build a session, reading the instruction file if one is configured.
    ///
    /// Fails with [`SessionError::MissingInstruction`] when neither an
    /// instruction path nor text is set. No network call is made here.
    pub fn new(source: BoxCompletionSource, settings: SessionSettings) -> Result<Self, SessionError> {
        let instruction = InstructionSource::from_parts(
            settings.instruction_file_path,
            settings.instruction_text,
        )
        .map_err(|_| SessionError::MissingInstruction)?;

        let instruction = match instruction {
            InstructionSource::Text(text) => text,
            InstructionSource::File(path) => std::fs::read_to_string(&path)
                .map_err(|source| SessionError::InstructionRead { path, source })?,
        };

        info!(
            source = source.name(),
            model = %settings.model,
            instruction_chars = instruction.chars().count(),
            "conversation session ready"
        );

        gauge!(HISTORY_TURNS_GAUGE).set(1.0);

        Ok(Self {
            source,
            model: settings.model,
            relay: StreamRelay::new(settings.api_timeout),
            history: Arc::new(Mutex::new(vec![DialogueTurn::system(instruction)])),
        })
    }

    /// Send `question` upstream with the full history and start relaying
    /// the answer.
    ///
    /// Waits for any in-flight prompt to finish first. The assistant turn is
    /// appended by the relay task once the stream completes.
    pub async fn prompt(&self, question: &str) -> Result<Relayed, SessionError> {
        let history = self.history.clone().lock_owned().await;
        let exchange = Exchange::begin(history, question);
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: exchange.turns().to_vec(),
            stream: true,
        };

        Ok(self.relay.relay(&self.source, request, exchange).await?)
    }

    /// Snapshot of the dialogue history.
    ///
    /// Waits for an in-flight prompt to commit, so the snapshot is always
    /// a sequence of complete exchanges.
    pub async fn history(&self) -> Vec<DialogueTurn> {
        self.history.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parley_types::llm::{Fragment, Role, UpstreamError};

    use super::*;
    use crate::llm::source::{CompletionSource, DeltaStream};

    /// Answers the n-th prompt with `answers[n]`, recording what it was sent.
    struct CannedSource {
        answers: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
        requests: Arc<std::sync::Mutex<Vec<CompletionRequest>>>,
    }

    impl CannedSource {
        fn new(answers: Vec<&'static str>) -> Self {
            Self {
                answers,
                calls: Arc::new(AtomicUsize::new(0)),
                requests: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    impl CompletionSource for CannedSource {
        fn name(&self) -> &str {
            "canned"
        }

        async fn open_stream(&self, request: CompletionRequest) -> Result<DeltaStream, UpstreamError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let answer = self.answers[n].to_string();
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(answer)])))
        }
    }

    fn text_settings(text: &str) -> SessionSettings {
        SessionSettings {
            instruction_text: Some(text.to_string()),
            ..SessionSettings::default()
        }
    }

    async fn drain(relayed: Relayed) -> String {
        let Relayed { mut fragments, task } = relayed;
        let mut out = String::new();
        while let Some(fragment) = fragments.recv().await {
            match fragment {
                Fragment::Delta(text) => out.push_str(&text),
                Fragment::EndOfStream => break,
                Fragment::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
        task.await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_history_accumulates_in_order() {
        let source = CannedSource::new(vec!["A1", "A2"]);
        let requests = source.requests.clone();
        let session =
            ConversationSession::new(BoxCompletionSource::new(source), text_settings("S")).unwrap();

        assert_eq!(drain(session.prompt("Q1").await.unwrap()).await, "A1");
        assert_eq!(drain(session.prompt("Q2").await.unwrap()).await, "A2");

        assert_eq!(
            session.history().await,
            vec![
                DialogueTurn::system("S"),
                DialogueTurn::user("Q1"),
                DialogueTurn::assistant("A1"),
                DialogueTurn::user("Q2"),
                DialogueTurn::assistant("A2"),
            ]
        );

        // Each request threads the full history, ending with the new question.
        let requests = requests.lock().unwrap();
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[3], DialogueTurn::user("Q2"));
        assert!(requests.iter().all(|r| r.stream && r.model == DEFAULT_MODEL));
    }

    /// Never answers its first call; answers later calls with "A".
    struct StalledFirstSource {
        calls: Arc<AtomicUsize>,
        requests: Arc<std::sync::Mutex<Vec<CompletionRequest>>>,
    }

    impl CompletionSource for StalledFirstSource {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn open_stream(&self, request: CompletionRequest) -> Result<DeltaStream, UpstreamError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            if n == 0 {
                std::future::pending::<()>().await;
            }
            Ok(Box::pin(futures_util::stream::iter(vec![Ok("A".to_string())])))
        }
    }

    #[tokio::test]
    async fn test_cancelled_prompt_leaves_no_orphan_user_turn() {
        let source = StalledFirstSource {
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let requests = source.requests.clone();
        let session =
            ConversationSession::new(BoxCompletionSource::new(source), text_settings("S")).unwrap();

        // The caller gives up while the upstream call is still being established.
        let abandoned = tokio::time::timeout(Duration::from_millis(50), session.prompt("Q1")).await;
        assert!(abandoned.is_err());
        assert_eq!(session.history().await, vec![DialogueTurn::system("S")]);

        assert_eq!(drain(session.prompt("Q2").await.unwrap()).await, "A");
        let requests = requests.lock().unwrap();
        assert_eq!(
            requests[1].messages,
            vec![DialogueTurn::system("S"), DialogueTurn::user("Q2")]
        );
    }

    #[tokio::test]
    async fn test_missing_instruction_fails_before_any_call() {
        let source = CannedSource::new(vec![]);
        let calls = source.calls.clone();
        let settings = SessionSettings {
            instruction_file_path: Some(PathBuf::new()),
            instruction_text: Some(String::new()),
            ..SessionSettings::default()
        };

        let result = ConversationSession::new(BoxCompletionSource::new(source), settings);
        assert!(matches!(result, Err(SessionError::MissingInstruction)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_instruction_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "You answer in one word.").unwrap();

        let settings = SessionSettings {
            instruction_file_path: Some(file.path().to_path_buf()),
            ..SessionSettings::default()
        };
        let session =
            ConversationSession::new(BoxCompletionSource::new(CannedSource::new(vec![])), settings)
                .unwrap();

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "You answer in one word.");
    }

    #[test]
    fn test_unreadable_instruction_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = SessionSettings {
            instruction_file_path: Some(dir.path().join("missing.txt")),
            ..SessionSettings::default()
        };
        let result =
            ConversationSession::new(BoxCompletionSource::new(CannedSource::new(vec![])), settings);
        assert!(matches!(result, Err(SessionError::InstructionRead { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_prompts_keep_exchanges_paired() {
        let session = Arc::new(
            ConversationSession::new(
                BoxCompletionSource::new(CannedSource::new(vec!["first", "second"])),
                text_settings("S"),
            )
            .unwrap(),
        );

        let a = tokio::spawn({
            let session = session.clone();
            async move { drain(session.prompt("qa").await.unwrap()).await }
        });
        let b = tokio::spawn({
            let session = session.clone();
            async move { drain(session.prompt("qb").await.unwrap()).await }
        });
        a.await.unwrap();
        b.await.unwrap();

        let history = session.history().await;
        assert_eq!(history.len(), 5);
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }
}
