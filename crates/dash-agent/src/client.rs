//! Streaming chat client: runs one turn at a time against the chat service

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dash_ai::{ChatRequest, ChatTransport, Error, LineEvent, Result, frame_lines, parse_line};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::store::ConversationStore;

/// The turn currently in flight
struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
}

/// Sends messages and applies the streamed reply to a [`ConversationStore`].
///
/// Only one turn is in flight at a time: sending a new message cancels the
/// previous turn, which then stops without touching the store again.
pub struct StreamingChatClient {
    store: Arc<ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    active: Mutex<Option<ActiveTurn>>,
    next_turn: AtomicU64,
}

impl StreamingChatClient {
    /// Create a client that applies replies to `store`
    pub fn new(store: Arc<ConversationStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            store,
            transport,
            active: Mutex::new(None),
            next_turn: AtomicU64::new(0),
        }
    }

    /// The store this client writes to
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Whether a turn is in flight
    pub fn is_streaming(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Send a user message and stream the assistant's reply into the store.
    ///
    /// Failures are reported as an error message in the conversation, never
    /// returned. Resolves once the turn has finished or been cancelled.
    pub async fn send_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.cancel_request();

        let turn = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.active.lock() = Some(ActiveTurn {
            id: turn,
            cancel: cancel.clone(),
        });

        self.store.add_user_message(message.clone());
        self.store.start_assistant_message();
        self.store.set_connected(true);

        let request = ChatRequest {
            message,
            history: self.store.snapshot().history(),
        };
        tracing::debug!(turn, history = request.history.len(), "turn started");

        let result = self.run_turn(&request, &cancel).await;

        // Whoever cancelled this turn has already cleaned up after it.
        if cancel.is_cancelled() {
            tracing::debug!(turn, "turn cancelled");
            return;
        }

        if let Err(e) = result {
            if e.is_transport() {
                tracing::error!(turn, error = %e, "chat request failed");
            } else {
                tracing::warn!(turn, error = %e, "chat service reported an error");
            }
            self.store.add_error_message(&e.to_string());
        }

        self.store.complete_streaming();
        self.store.set_connected(false);

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|t| t.id == turn) {
            *active = None;
        }
        tracing::debug!(turn, "turn finished");
    }

    /// Cancel the turn in flight, if any.
    ///
    /// The partial reply is finalized and the connection flag cleared. Safe to
    /// call when idle.
    pub fn cancel_request(&self) {
        let Some(turn) = self.active.lock().take() else {
            return;
        };
        tracing::debug!(turn = turn.id, "cancelling turn");
        turn.cancel.cancel();
        self.store.complete_streaming();
        self.store.set_connected(false);
    }

    /// Reset the conversation to the greeting
    pub fn clear_conversation(&self) {
        self.store.clear_messages();
    }

    async fn run_turn(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<()> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            response = self.transport.send(request) => response?,
        };

        if !response.is_success() {
            return Err(Error::status(response.status, response.reason));
        }
        let body = response.body.ok_or(Error::MissingBody)?;

        let mut lines = frame_lines(body);
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Aborted),
                line = lines.next() => line,
            };
            match line {
                Some(line) => self.apply_line(&line?)?,
                None => return Ok(()),
            }
        }
    }

    fn apply_line(&self, line: &str) -> Result<()> {
        match parse_line(line) {
            LineEvent::Blank => {}
            LineEvent::Malformed => {
                tracing::warn!(line, "discarding malformed stream line");
            }
            LineEvent::Text(text) => self.store.append_streaming_content(&text),
            LineEvent::Record(record) => {
                if let Some(error) = record.error_message() {
                    return Err(Error::Protocol(error.to_string()));
                }
                if let Some(content) = record.content() {
                    self.store.append_streaming_content(content);
                }
                if record.is_complete() {
                    self.store.complete_streaming();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dash_ai::{ByteStream, ChatResponse, Role};
    use tokio::sync::{Notify, mpsc};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use crate::store::ERROR_PREFIX;

    enum Reply {
        Chunks(Vec<Vec<u8>>),
        Status(u16, &'static str),
        NoBody,
        Live(mpsc::UnboundedReceiver<Result<Vec<u8>>>),
        Fail,
    }

    /// Transport that hands out scripted replies in order
    struct MockTransport {
        replies: Mutex<Vec<Reply>>,
        requests: Mutex<Vec<ChatRequest>>,
        sent: Notify,
    }

    impl MockTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
                sent: Notify::new(),
            })
        }

        fn lines(lines: &[&str]) -> Arc<Self> {
            let body = lines.iter().map(|l| format!("{}\n", l)).collect::<String>();
            Self::new(vec![Reply::Chunks(vec![body.into_bytes()])])
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
            self.requests.lock().push(request.clone());
            let reply = self.replies.lock().remove(0);
            self.sent.notify_one();

            let body: Option<ByteStream> = match reply {
                Reply::Chunks(chunks) => Some(Box::pin(futures::stream::iter(
                    chunks.into_iter().map(Ok),
                ))),
                Reply::Status(status, reason) => {
                    return Ok(ChatResponse {
                        status,
                        reason: reason.to_string(),
                        body: None,
                    });
                }
                Reply::NoBody => None,
                Reply::Live(rx) => Some(Box::pin(UnboundedReceiverStream::new(rx))),
                Reply::Fail => return Err(Error::Protocol("connection refused".into())),
            };
            Ok(ChatResponse {
                status: 200,
                reason: "OK".to_string(),
                body,
            })
        }
    }

    fn client(transport: Arc<MockTransport>) -> StreamingChatClient {
        StreamingChatClient::new(Arc::new(ConversationStore::in_memory()), transport)
    }

    fn assistant_contents(client: &StreamingChatClient) -> Vec<String> {
        client
            .store()
            .snapshot()
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .collect()
    }

    fn assert_idle(client: &StreamingChatClient) {
        let state = client.store().snapshot();
        assert!(!client.is_streaming());
        assert!(!state.is_streaming);
        assert!(!state.is_connected);
        assert_eq!(state.streaming_id, None);
        assert!(state.messages.iter().all(|m| !m.streaming));
    }

    #[tokio::test]
    async fn test_streams_content_into_store() {
        let client = client(MockTransport::lines(&[
            r#"{"content":"Hello"}"#,
            r#"{"content":", world"}"#,
            r#"{"complete":true}"#,
        ]));
        client.send_message("hi").await;

        let state = client.store().snapshot();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[0].content, "hi");
        assert_eq!(state.messages[1].content, "Hello, world");
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_split_chunks_match_single_chunk() {
        let input = "{\"content\":\"AB\"}\n{\"content\":\"CD\"}\n".as_bytes();
        for split in [1, 7, 16, 17, 20] {
            let transport = MockTransport::new(vec![Reply::Chunks(vec![
                input[..split].to_vec(),
                input[split..].to_vec(),
            ])]);
            let client = client(transport);
            client.send_message("go").await;
            assert_eq!(assistant_contents(&client), vec!["ABCD"], "split at {}", split);
        }
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        let input = "{\"content\":\"naïve\"}\n".as_bytes();
        let split = input.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let transport = MockTransport::new(vec![Reply::Chunks(vec![
            input[..split].to_vec(),
            input[split..].to_vec(),
        ])]);
        let client = client(transport);
        client.send_message("go").await;
        assert_eq!(assistant_contents(&client), vec!["naïve"]);
    }

    #[tokio::test]
    async fn test_history_includes_user_message_not_placeholder() {
        let transport = MockTransport::new(vec![
            Reply::Chunks(vec![b"{\"content\":\"first\"}\n".to_vec()]),
            Reply::Chunks(vec![b"{\"content\":\"second\"}\n".to_vec()]),
        ]);
        let client = client(transport.clone());
        client.send_message("one").await;
        client.send_message("two").await;

        let requests = transport.requests.lock();
        assert_eq!(requests[0].message, "one");
        assert_eq!(
            requests[0].history,
            vec![dash_ai::HistoryEntry::new(Role::User, "one")]
        );
        assert_eq!(requests[1].message, "two");
        let roles: Vec<_> = requests[1].history.iter().map(|h| h.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(requests[1].history[1].content, "first");
    }

    #[tokio::test]
    async fn test_error_line_halts_stream() {
        let client = client(MockTransport::lines(&[
            r#"{"content":"partial"}"#,
            r#"{"error":"boom"}"#,
            r#"{"content":"never"}"#,
        ]));
        client.send_message("hi").await;

        let contents = assistant_contents(&client);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0], "partial");
        assert_eq!(contents[1], format!("{}boom", ERROR_PREFIX));
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_error_line_with_mistyped_field_still_halts() {
        let client = client(MockTransport::lines(&[
            r#"{"content":"partial"}"#,
            r#"{"error":"boom","complete":1}"#,
            r#"{"content":" more"}"#,
        ]));
        client.send_message("hi").await;

        let contents = assistant_contents(&client);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0], "partial");
        assert_eq!(contents[1], format!("{}boom", ERROR_PREFIX));
    }

    #[tokio::test]
    async fn test_plain_text_appended_verbatim() {
        let client = client(MockTransport::lines(&["hello world"]));
        client.send_message("hi").await;
        assert_eq!(assistant_contents(&client), vec!["hello world"]);
    }

    #[tokio::test]
    async fn test_malformed_structured_line_discarded() {
        let client = client(MockTransport::lines(&[
            r#"{"content":"a"}"#,
            r#"{"content":"trunc"#,
            "",
            "   ",
            r#"{"content":"b"}"#,
        ]));
        client.send_message("hi").await;
        assert_eq!(assistant_contents(&client), vec!["ab"]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let transport = MockTransport::new(vec![Reply::Chunks(vec![
            b"{\"content\":\"a\"}\n{\"content\":".to_vec(),
            b"\"b\"}".to_vec(),
        ])]);
        let client = client(transport);
        client.send_message("hi").await;
        assert_eq!(assistant_contents(&client), vec!["ab"]);
    }

    #[tokio::test]
    async fn test_content_after_complete_is_dropped() {
        let client = client(MockTransport::lines(&[
            r#"{"content":"done","complete":true}"#,
            r#"{"content":" extra"}"#,
        ]));
        client.send_message("hi").await;
        assert_eq!(assistant_contents(&client), vec!["done"]);
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_http_status_failure() {
        let client = client(MockTransport::new(vec![Reply::Status(
            500,
            "Internal Server Error",
        )]));
        client.send_message("hi").await;

        let contents = assistant_contents(&client);
        assert_eq!(contents[0], "");
        assert_eq!(
            contents[1],
            format!("{}HTTP 500: Internal Server Error", ERROR_PREFIX)
        );
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_missing_body_failure() {
        let client = client(MockTransport::new(vec![Reply::NoBody]));
        client.send_message("hi").await;
        let contents = assistant_contents(&client);
        assert_eq!(
            contents.last().unwrap(),
            &format!("{}No response body received", ERROR_PREFIX)
        );
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_transport_error_failure() {
        let client = client(MockTransport::new(vec![Reply::Fail]));
        client.send_message("hi").await;
        let contents = assistant_contents(&client);
        assert_eq!(contents.len(), 2);
        assert!(contents[1].contains("connection refused"));
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_body_read_error_mid_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Ok(b"{\"content\":\"part\"}\n".to_vec())).unwrap();
        tx.send(Err(Error::Protocol("connection reset".into()))).unwrap();
        drop(tx);

        let client = client(MockTransport::new(vec![Reply::Live(rx)]));
        client.send_message("hi").await;
        let contents = assistant_contents(&client);
        assert_eq!(contents[0], "part");
        assert!(contents[1].ends_with("connection reset"));
        assert_idle(&client);
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let client = client(MockTransport::new(vec![]));
        client.store().add_user_message("hi");
        let before = client.store().snapshot();
        client.cancel_request();
        client.cancel_request();
        assert_eq!(client.store().snapshot(), before);
        assert!(!client.is_streaming());
    }

    #[tokio::test]
    async fn test_cancel_stops_turn_without_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(vec![Reply::Live(rx)]);
        let client = Arc::new(client(transport.clone()));

        let turn = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.send_message("hi").await }
        });
        transport.sent.notified().await;
        tx.send(Ok(b"{\"content\":\"par".to_vec())).unwrap();
        tx.send(Ok(b"tial\"}\n".to_vec())).unwrap();
        while assistant_contents(&client) != vec!["partial"] {
            tokio::task::yield_now().await;
        }
        assert!(client.is_streaming());
        assert!(client.store().snapshot().is_connected);

        client.cancel_request();
        assert_idle(&client);

        let _ = tx.send(Ok(b"{\"content\":\" more\"}\n".to_vec()));
        turn.await.unwrap();

        assert_eq!(assistant_contents(&client), vec!["partial"]);
        assert_idle(&client);
    }

    #[tokio::test]
    async fn test_new_turn_cancels_previous() {
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(vec![
            Reply::Live(first_rx),
            Reply::Chunks(vec![b"{\"content\":\"second reply\"}\n".to_vec()]),
        ]);
        let client = Arc::new(client(transport.clone()));

        let first = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.send_message("first").await }
        });
        transport.sent.notified().await;
        first_tx
            .send(Ok(b"{\"content\":\"first reply\"}\n".to_vec()))
            .unwrap();
        while assistant_contents(&client) != vec!["first reply"] {
            tokio::task::yield_now().await;
        }

        client.send_message("second").await;
        let _ = first_tx.send(Ok(b"{\"content\":\" late\"}\n".to_vec()));
        let _ = first_tx.send(Ok(b"{\"error\":\"late failure\"}\n".to_vec()));
        first.await.unwrap();

        let state = client.store().snapshot();
        let contents: Vec<_> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["first", "first reply", "second", "second reply"]
        );
        assert_idle(&client);

        let requests = transport.requests.lock();
        let history: Vec<_> = requests[1].history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(history, vec!["first", "first reply", "second"]);
    }

    #[tokio::test]
    async fn test_clear_conversation_resets_store() {
        let client = client(MockTransport::lines(&[r#"{"content":"x"}"#]));
        client.send_message("hi").await;
        client.clear_conversation();
        let state = client.store().snapshot();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, crate::store::GREETING);
    }
}
