//! End-to-end session flow through the public API: a scripted live client
//! goes live once, delivers chat, and the recorder produces the session
//! artifacts before returning to monitoring and stopping.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use livecap::{
    ChatEvent, ClientError, ClientInit, Config, EventSink, LiveClient, LiveClientFactory,
    LiveEvent, RateLimiter, Recorder, RecorderHandle, RecorderState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Client that reports live exactly once, then stops the recorder.
struct OneSessionClient {
    live_served: Arc<Mutex<bool>>,
    handle: RecorderHandle,
}

#[async_trait]
impl LiveClient for OneSessionClient {
    async fn is_live(&self) -> Result<bool, ClientError> {
        let mut served = self.live_served.lock().unwrap();
        if *served {
            self.handle.request_stop();
            Ok(false)
        } else {
            *served = true;
            Ok(true)
        }
    }

    async fn room_info(&self) -> Result<serde_json::Value, ClientError> {
        Ok(serde_json::json!({}))
    }

    fn room_id(&self) -> Option<u64> {
        Some(4242)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<LiveEvent>, ClientError> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx.send(LiveEvent::Connected { room_id: Some(4242) }).await;
            let _ = tx
                .send(LiveEvent::Comment {
                    username: "alice".to_string(),
                    nickname: "alice".to_string(),
                    content: "hello stream".to_string(),
                })
                .await;
            let _ = tx
                .send(LiveEvent::Gift {
                    username: "bob".to_string(),
                    nickname: "bob".to_string(),
                    gift_name: "Rose".to_string(),
                    count: 2,
                    streak_final: true,
                })
                .await;
            let _ = tx.send(LiveEvent::LiveEnded).await;
            // Sender drops here, closing the feed and ending the session.
        });
        Ok(rx)
    }

    async fn close(&self) {}
}

struct OneSessionFactory {
    live_served: Arc<Mutex<bool>>,
    handle: Mutex<Option<RecorderHandle>>,
}

impl LiveClientFactory for OneSessionFactory {
    fn create(&self, _account_id: &str, _init: &ClientInit) -> Arc<dyn LiveClient> {
        Arc::new(OneSessionClient {
            live_served: Arc::clone(&self.live_served),
            handle: self.handle.lock().unwrap().clone().unwrap(),
        })
    }
}

/// Sink recording every status transition and chat message it sees.
#[derive(Default)]
struct RecordingSink {
    states: Mutex<Vec<RecorderState>>,
    messages: Mutex<Vec<ChatEvent>>,
}

impl EventSink for RecordingSink {
    fn on_status(&self, state: RecorderState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_chat_message(&self, event: &ChatEvent) {
        self.messages.lock().unwrap().push(event.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn chat_only_session_produces_chat_log_and_subtitles() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut config = Config::for_account("cool_streamer");
    config.chat_only = true;
    config.output_dir = dir.path().to_path_buf();

    let factory = Arc::new(OneSessionFactory {
        live_served: Arc::new(Mutex::new(false)),
        handle: Mutex::new(None),
    });
    let sink = Arc::new(RecordingSink::default());
    let mut recorder = Recorder::new(
        config,
        factory.clone(),
        sink.clone(),
        Arc::new(RateLimiter::default()),
    );
    *factory.handle.lock().unwrap() = Some(recorder.handle());

    recorder.run().await;
    assert_eq!(recorder.state(), RecorderState::Done);

    // Exactly one session directory was materialized.
    let sessions: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(sessions.len(), 1);
    let session_dir = &sessions[0];
    assert!(
        session_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("cool_streamer_")
    );

    // Chat log holds one line per recorded event.
    let chat_log = std::fs::read_to_string(session_dir.join("chat_log.jsonl")).unwrap();
    let events: Vec<ChatEvent> = chat_log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].username, "alice");
    assert_eq!(events[1].content, "sent Rose x2");

    // Chat-only sessions still emit the subtitle track.
    let subtitles = std::fs::read_to_string(session_dir.join("overlay.ass")).unwrap();
    assert!(subtitles.contains("[Script Info]"));
    assert!(subtitles.contains("@alice"));
    assert!(subtitles.contains(",GiftBox,"));

    // No video was recorded, so no raw or final video files exist.
    assert!(!session_dir.join("raw_video.flv").exists());
    assert!(!session_dir.join("final_output.mp4").exists());

    // Status transitions covered the full lifecycle, and chat callbacks fired.
    let states = sink.states.lock().unwrap();
    assert!(states.contains(&RecorderState::Recording));
    assert_eq!(states.last(), Some(&RecorderState::Done));
    assert_eq!(sink.messages.lock().unwrap().len(), 2);
}
