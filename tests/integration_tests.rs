//! Integration tests for the parley library.
//!
//! Sessions run against an in-memory backend and a scripted socket server.  The live test at
//! the end needs a running backend named by `PARLEY_HOST`.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::channel::mpsc::UnboundedSender;
    use tokio::sync::mpsc;

    use parley::{
        Backend, ChatIdentity, ChatPage, ChatRecord, ChatSummary, ClientLogger, ConnectionScope,
        ConnectionState, Connector, Error, IdentityMode, LocalFile, Message, MessageKind,
        PaginationCursor, ProtocolEvent, Result, SendFrame, SessionConfig, SessionController,
        SessionUpdate, UserMessage, WireChannel,
    };

    #[derive(Default)]
    struct ServerState {
        scopes: Vec<ConnectionScope>,
        sent: Vec<SendFrame>,
        inbound: Option<UnboundedSender<String>>,
    }

    // Accepts every connection, records what the client writes and replays pushed events.
    #[derive(Clone, Default)]
    struct FakeServer {
        state: Arc<Mutex<ServerState>>,
    }

    impl FakeServer {
        fn push(&self, event: ProtocolEvent) {
            let state = self.state.lock().unwrap();
            let inbound = state.inbound.as_ref().expect("no open socket");
            inbound
                .unbounded_send(serde_json::to_string(&event).unwrap())
                .unwrap();
        }

        fn drop_socket(&self) {
            self.state.lock().unwrap().inbound.take();
        }

        fn sent(&self) -> Vec<SendFrame> {
            self.state.lock().unwrap().sent.clone()
        }

        fn scopes(&self) -> Vec<ConnectionScope> {
            self.state.lock().unwrap().scopes.clone()
        }

        async fn wait_until(&self, check: impl Fn(&ServerState) -> bool) {
            for _ in 0..1000 {
                if check(&self.state.lock().unwrap()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!("server never reached the expected state");
        }
    }

    #[async_trait]
    impl Connector for FakeServer {
        async fn connect(&self, scope: &ConnectionScope) -> Result<WireChannel> {
            let (outbound, mut written) = mpsc::unbounded_channel::<String>();
            let (inbound, received) = futures::channel::mpsc::unbounded::<String>();
            {
                let mut state = self.state.lock().unwrap();
                state.scopes.push(scope.clone());
                state.inbound = Some(inbound);
            }
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                while let Some(frame) = written.recv().await {
                    let frame: SendFrame = serde_json::from_str(&frame).unwrap();
                    state.lock().unwrap().sent.push(frame);
                }
            });
            Ok(WireChannel {
                outbound,
                inbound: received.map(Ok).boxed(),
            })
        }
    }

    #[derive(Default)]
    struct MemoryBackend {
        records: Vec<ChatRecord>,
    }

    #[async_trait]
    impl Backend for MemoryBackend {
        async fn chat_history(&self, identity: &ChatIdentity) -> Result<ChatRecord> {
            self.records
                .iter()
                .find(|r| r.identity() == *identity)
                .cloned()
                .ok_or_else(|| Error::not_found("Chat not found", None, None))
        }

        async fn list_chats(&self, _: usize, _: Option<&PaginationCursor>) -> Result<ChatPage> {
            Ok(ChatPage::new(
                self.records.iter().cloned().map(ChatSummary::from).collect(),
                None,
            ))
        }

        async fn search_chats(&self, _: &str) -> Result<Vec<ChatSummary>> {
            Ok(Vec::new())
        }

        async fn delete_chat(&self, _: &ChatIdentity) -> Result<()> {
            Ok(())
        }

        async fn upload_media(&self, files: &[LocalFile]) -> Result<Vec<String>> {
            Ok(files.iter().map(|f| format!("media/{}", f.file_name())).collect())
        }

        async fn generate_image(&self, _: &ChatIdentity, _: &UserMessage) -> Result<Message> {
            Err(Error::service_unavailable("no image model", None))
        }
    }

    fn stored_chat() -> ChatRecord {
        ChatRecord {
            chat_id: "stored".to_string(),
            timestamp: 1_700_000_000.5,
            user_email: None,
            messages: vec![
                Message::user("what is a monad?", None, MessageKind::Text),
                Message::assistant("a monoid in the category of endofunctors", None),
            ],
        }
    }

    async fn start(
        backend: MemoryBackend,
        config: SessionConfig,
    ) -> (SessionController, FakeServer) {
        let server = FakeServer::default();
        let session =
            SessionController::new(Arc::new(backend), Arc::new(server.clone()), config).unwrap();
        wait_connected(&session).await;
        (session, server)
    }

    async fn wait_connected(session: &SessionController) {
        session
            .watch_connection()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }

    async fn updates_until_finished(session: &mut SessionController) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = session.next_update().await {
            let done = matches!(update, SessionUpdate::Finished | SessionUpdate::Failed);
            updates.push(update);
            if done {
                break;
            }
        }
        updates
    }

    #[tokio::test]
    async fn server_assigned_identity_is_used_by_the_next_send() {
        let (mut session, server) = start(
            MemoryBackend::default(),
            SessionConfig::new().with_identity_mode(IdentityMode::ServerAssigned),
        )
        .await;

        session.send("hello", MessageKind::Text).await.unwrap();
        server.wait_until(|s| s.sent.len() == 1).await;
        assert_eq!(server.sent()[0].identity(), None);
        assert!(session.is_processing());

        let assigned = ChatIdentity::new("chat-1", 1_700_000_001.25);
        server.push(ProtocolEvent::chat_created(&assigned));
        server.push(ProtocolEvent::token("Hi"));
        server.push(ProtocolEvent::token(" there"));
        server.push(ProtocolEvent::stream_finished());

        let updates = updates_until_finished(&mut session).await;
        assert_eq!(
            updates,
            vec![
                SessionUpdate::Bound(assigned.clone()),
                SessionUpdate::Token("Hi".to_string()),
                SessionUpdate::Token(" there".to_string()),
                SessionUpdate::Finished,
            ]
        );
        assert_eq!(session.identity(), Some(&assigned));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, "Hi there");
        assert!(!session.messages()[1].is_placeholder);

        session.send("again", MessageKind::Text).await.unwrap();
        server.wait_until(|s| s.sent.len() == 2).await;
        assert_eq!(server.sent()[1].identity(), Some(assigned));
    }

    #[tokio::test]
    async fn client_minted_identity_travels_with_first_send() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        assert!(session.identity().is_none());

        session.send("hello", MessageKind::Text).await.unwrap();
        server.wait_until(|s| s.sent.len() == 1).await;
        let minted = session.identity().cloned().unwrap();
        assert_eq!(server.sent()[0].identity(), Some(minted));
        assert_eq!(server.sent()[0].user_message.content, "hello");
    }

    #[tokio::test]
    async fn send_while_uploading_changes_nothing() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        let batch = session
            .uploads_mut()
            .stage(vec![LocalFile::new("/tmp/cat.png", b"png".to_vec())]);
        assert!(batch.is_some());

        let err = session.send("look", MessageKind::Text).await.unwrap_err();
        assert!(err.is_uploads_pending());
        assert!(session.messages().is_empty());
        assert!(session.identity().is_none());
        assert_eq!(session.uploads().pending().len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.sent().is_empty());
    }

    #[tokio::test]
    async fn send_during_a_reply_is_rejected() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        session.send("first", MessageKind::Text).await.unwrap();
        let err = session.send("second", MessageKind::Text).await.unwrap_err();
        assert!(err.is_turn_in_progress());
        assert_eq!(session.messages().len(), 2);
        server.wait_until(|s| s.sent.len() == 1).await;
    }

    #[tokio::test]
    async fn attachments_are_handed_over_once() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        let attached = session
            .attach(vec![
                LocalFile::new("/tmp/a.png", b"a".to_vec()),
                LocalFile::new("/tmp/b.png", b"b".to_vec()),
            ])
            .await
            .unwrap();
        assert_eq!(attached, 2);

        session.send("two pictures", MessageKind::Text).await.unwrap();
        server.push(ProtocolEvent::stream_finished());
        updates_until_finished(&mut session).await;
        session.send("no pictures", MessageKind::Text).await.unwrap();

        server.wait_until(|s| s.sent.len() == 2).await;
        let sent = server.sent();
        assert_eq!(
            sent[0].user_message.media_s3_keys,
            Some(vec!["media/a.png".to_string(), "media/b.png".to_string()])
        );
        assert_eq!(sent[1].user_message.media_s3_keys, None);
        assert!(session.uploads().pending().is_empty());
    }

    #[tokio::test]
    async fn failed_history_load_falls_back_to_a_draft() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        let missing = ChatIdentity::new("missing", 3.0);

        let err = session.select_chat(missing).await.unwrap_err();
        assert!(err.is_history_load());
        assert!(session.identity().is_none());
        assert!(session.messages().is_empty());

        server.wait_until(|s| s.scopes.len() == 2).await;
        assert_eq!(
            server.scopes(),
            vec![ConnectionScope::Draft, ConnectionScope::Draft]
        );
        wait_connected(&session).await;
    }

    #[tokio::test]
    async fn switching_chats_loads_history_and_drops_stale_frames() {
        let backend = MemoryBackend {
            records: vec![stored_chat()],
        };
        let (mut session, server) = start(backend, SessionConfig::new()).await;

        session.send("draft question", MessageKind::Text).await.unwrap();
        server.push(ProtocolEvent::token("stale"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = stored_chat().identity();
        session.select_chat(stored.clone()).await.unwrap();
        assert_eq!(session.identity(), Some(&stored));
        assert_eq!(session.messages(), stored_chat().messages.as_slice());
        assert!(!session.is_processing());

        server.wait_until(|s| s.scopes.len() == 2).await;
        assert_eq!(server.scopes()[1], ConnectionScope::Chat(stored));
        wait_connected(&session).await;

        server.push(ProtocolEvent::token(" indeed"));
        assert_eq!(
            session.next_update().await,
            Some(SessionUpdate::Token(" indeed".to_string()))
        );
    }

    #[tokio::test]
    async fn new_chat_returns_to_a_draft() {
        let backend = MemoryBackend {
            records: vec![stored_chat()],
        };
        let (mut session, server) = start(backend, SessionConfig::new()).await;
        session.select_chat(stored_chat().identity()).await.unwrap();

        session.start_new_chat().unwrap();
        assert!(session.identity().is_none());
        assert!(session.messages().is_empty());

        server.wait_until(|s| s.scopes.len() == 3).await;
        assert_eq!(server.scopes()[2], ConnectionScope::Draft);
    }

    #[tokio::test]
    async fn error_frame_ends_the_turn() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        session.send("hello", MessageKind::Text).await.unwrap();
        server.push(ProtocolEvent::token("par"));
        server.push(ProtocolEvent::error(Some("model overloaded".to_string())));

        let updates = updates_until_finished(&mut session).await;
        assert_eq!(updates.last(), Some(&SessionUpdate::Failed));
        assert!(!session.is_processing());
        assert_eq!(session.messages()[1].content, parley::STREAM_ERROR_FALLBACK);
    }

    #[derive(Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<String>>,
    }

    impl ClientLogger for RecordingLogger {
        fn log_send(&self, frame: &SendFrame) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("send {}", frame.user_message.content));
        }

        fn log_event(&self, identity: Option<&ChatIdentity>, event: &ProtocolEvent) {
            let bound = identity.map(|i| i.chat_id.clone()).unwrap_or_default();
            self.lines
                .lock()
                .unwrap()
                .push(format!("recv {} {bound}", event.kind()));
        }

        fn log_history(&self, record: &ChatRecord) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("history {}", record.chat_id));
        }
    }

    #[tokio::test]
    async fn logger_sees_all_traffic() {
        let backend = MemoryBackend {
            records: vec![stored_chat()],
        };
        let (session, server) = start(
            backend,
            SessionConfig::new().with_identity_mode(IdentityMode::ServerAssigned),
        )
        .await;
        let logger = Arc::new(RecordingLogger::default());
        let mut session = session.with_logger(logger.clone());

        session.send("hi", MessageKind::Text).await.unwrap();
        server.push(ProtocolEvent::chat_created(&ChatIdentity::new("c", 1.0)));
        server.push(ProtocolEvent::stream_finished());
        updates_until_finished(&mut session).await;
        session.select_chat(stored_chat().identity()).await.unwrap();

        assert_eq!(
            *logger.lines.lock().unwrap(),
            vec![
                "send hi".to_string(),
                "recv chat_created ".to_string(),
                "recv stream_finished c".to_string(),
                "history stored".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_socket_reconnects_after_delay() {
        let (session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        let mut state = session.watch_connection();
        let dropped = tokio::time::Instant::now();

        server.drop_socket();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        assert!(dropped.elapsed() >= Duration::from_millis(3000));
        assert_eq!(
            server.scopes(),
            vec![ConnectionScope::Draft, ConnectionScope::Draft]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_socket_ends_the_open_turn() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        let mut state = session.watch_connection();

        session.send("hello", MessageKind::Text).await.unwrap();
        server.wait_until(|s| s.sent.len() == 1).await;
        server.drop_socket();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        session
            .send("after reconnect", MessageKind::Text)
            .await
            .unwrap();
        server.wait_until(|s| s.sent.len() == 2).await;
        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, parley::STREAM_ERROR_FALLBACK);
        assert!(!messages[1].is_placeholder);
        assert_eq!(messages[2].content, "after reconnect");
        assert!(session.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_socket_fails_a_partial_reply() {
        let (mut session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        session.send("hello", MessageKind::Text).await.unwrap();
        server.push(ProtocolEvent::token("par"));
        server.drop_socket();

        let updates = updates_until_finished(&mut session).await;
        assert_eq!(
            updates,
            vec![SessionUpdate::Token("par".to_string()), SessionUpdate::Failed]
        );
        assert!(!session.is_processing());
        assert_eq!(session.messages()[1].content, parley::STREAM_ERROR_FALLBACK);

        wait_connected(&session).await;
        session.send("again", MessageKind::Text).await.unwrap();
    }

    #[tokio::test]
    async fn closed_session_stays_closed() {
        let (session, server) = start(MemoryBackend::default(), SessionConfig::new()).await;
        session.close().unwrap();
        session
            .watch_connection()
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.scopes().len(), 1);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_live_login_and_list() {
        // This test requires PARLEY_HOST, PARLEY_USERNAME and PARLEY_PASSWORD to be set
        let (Ok(host), Ok(username), Ok(password)) = (
            std::env::var("PARLEY_HOST"),
            std::env::var("PARLEY_USERNAME"),
            std::env::var("PARLEY_PASSWORD"),
        ) else {
            eprintln!("Skipping test: PARLEY_HOST/PARLEY_USERNAME/PARLEY_PASSWORD not set");
            return;
        };

        let client = parley::ApiClient::new(&parley::ClientConfig::production(host))
            .expect("Failed to create client");
        client
            .login(&username, &password)
            .await
            .expect("Login should succeed");
        let page = client.list_chats(5, None).await;
        assert!(
            page.is_ok() || page.as_ref().is_err_and(|e| e.is_not_found()),
            "Listing chats should succeed"
        );
    }
}
