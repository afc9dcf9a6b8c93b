//! Runtime tests against a scripted driver and an in-process API.
//!
//! The driver plays the server's side of the socket: it answers the
//! handshake, acknowledges sends and echoes nothing else. Time is a
//! [`MockEnv`] that moves forward by one poll interval per loop turn.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use quadchat_app::{ChatApi, Command, Driver, Input, ProgressSink, Runtime, RuntimeConfig};
use quadchat_client::{ChatFailure, Client, DownloadTarget, LocalFile, Notice};
use quadchat_core::{Environment, SessionContext, env::test_utils::MockEnv};
use quadchat_proto::{
    Attachment, AttachmentKind, AuthToken, CHAT_NAMESPACE, EnginePacket, Identity, Message,
    MessageStatus, OpenHandshake, PacketKind, Room, SendAck, ServerPush, SocketPacket,
};
use serde_json::json;
use url::Url;

const ROOM: &str = "room-1";

fn session() -> SessionContext {
    SessionContext::new(
        Identity::new("me", "Me", AuthToken::new("tok-me")),
        Url::parse("https://portal.example.edu").unwrap(),
    )
}

fn open_packet() -> String {
    EnginePacket::Open(OpenHandshake {
        sid: "eio-1".into(),
        upgrades: vec![],
        ping_interval: 25_000,
        ping_timeout: 20_000,
        max_payload: 1_000_000,
    })
    .encode()
    .unwrap()
}

fn connect_reply() -> String {
    EnginePacket::Message(SocketPacket {
        kind: PacketKind::Connect,
        namespace: CHAT_NAMESPACE.into(),
        ack_id: None,
        data: Some(json!({ "sid": "sock-1" })),
    })
    .encode()
    .unwrap()
}

fn room_upsert() -> String {
    let members = ["me".to_string(), "bo".to_string()];
    let room = Room::new(ROOM, true, "Study group", members);
    EnginePacket::Message(ServerPush::RoomUpsert(room).into_packet(CHAT_NAMESPACE).unwrap())
        .encode()
        .unwrap()
}

/// One step of the user's script.
#[derive(Debug, Clone)]
enum Scripted {
    Command(Command),
    /// Hold further commands until the client reports it is online.
    WaitOnline,
}

/// Everything the driver saw, shared with the test after the runtime
/// returns.
#[derive(Debug, Default)]
struct Log {
    opens: usize,
    closes: Vec<String>,
    events: Vec<String>,
    notices: Vec<Notice>,
    errors: Vec<String>,
    saved: Vec<(DownloadTarget, Bytes)>,
    final_messages: Vec<Message>,
    stopped: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct DriverError(String);

struct ScriptedDriver {
    script: VecDeque<Scripted>,
    inbound: VecDeque<String>,
    online: bool,
    failing_opens: usize,
    next_message: u32,
    log: Arc<Mutex<Log>>,
}

impl ScriptedDriver {
    fn new(script: impl IntoIterator<Item = Scripted>) -> (Self, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let driver = Self {
            script: script.into_iter().collect(),
            inbound: VecDeque::new(),
            online: false,
            failing_opens: 0,
            next_message: 0,
            log: Arc::clone(&log),
        };
        (driver, log)
    }

    fn failing_opens(mut self, count: usize) -> Self {
        self.failing_opens = count;
        self
    }

    /// Play the server's part for one client frame.
    fn answer(&mut self, frame: &str) {
        let Ok(EnginePacket::Message(packet)) = EnginePacket::decode(frame) else {
            return;
        };
        if packet.kind == PacketKind::Connect {
            self.inbound.push_back(connect_reply());
            self.inbound.push_back(room_upsert());
            return;
        }
        let Some((name, args)) = packet.as_event() else {
            return;
        };
        self.log.lock().unwrap().events.push(name.to_string());

        if name == "send-message"
            && let Some(ack_id) = packet.ack_id
        {
            let body = &args[0];
            self.next_message += 1;
            let mut stored = Message::new(
                format!("srv-{}", self.next_message),
                body["chatId"].as_str().unwrap(),
                "me",
                body["content"].as_str().unwrap(),
            );
            stored.attachments = serde_json::from_value(body["attachments"].clone()).unwrap();
            stored.client_temp_id = body["clientTempId"].as_str().map(str::to_string);
            let reply = SendAck::Ok(stored).into_args().unwrap();
            let ack = SocketPacket::ack(CHAT_NAMESPACE, ack_id, reply);
            self.inbound.push_back(EnginePacket::Message(ack).encode().unwrap());
        }
    }
}

impl Driver for ScriptedDriver {
    type Error = DriverError;

    async fn next_input(&mut self) -> Result<Option<Input>, DriverError> {
        loop {
            if let Some(frame) = self.inbound.pop_front() {
                return Ok(Some(Input::Frame(frame)));
            }
            match self.script.front() {
                None => return Ok(None),
                Some(Scripted::WaitOnline) if !self.online => {
                    // Let timers run until the client reconnects.
                    std::future::pending::<()>().await;
                },
                Some(Scripted::WaitOnline) => {
                    self.script.pop_front();
                },
                Some(Scripted::Command(_)) => {
                    if let Some(Scripted::Command(command)) = self.script.pop_front() {
                        return Ok(Some(Input::Command(command)));
                    }
                },
            }
        }
    }

    async fn open(&mut self, _url: &Url) -> Result<(), DriverError> {
        self.log.lock().unwrap().opens += 1;
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(DriverError("connection refused".into()));
        }
        self.inbound.push_back(open_packet());
        Ok(())
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), DriverError> {
        self.answer(&frame);
        Ok(())
    }

    fn close(&mut self, reason: &str) {
        self.inbound.clear();
        self.log.lock().unwrap().closes.push(reason.to_string());
    }

    fn present<E: Environment>(
        &mut self,
        client: &Client<E>,
        notice: &Notice,
    ) -> Result<(), DriverError> {
        if let Notice::ConnectionChanged { connected } = notice {
            self.online = *connected;
        }
        let mut log = self.log.lock().unwrap();
        log.notices.push(notice.clone());
        if let Some(timeline) = client.timeline(ROOM) {
            log.final_messages = timeline.messages().to_vec();
        }
        Ok(())
    }

    fn report_error(&mut self, message: &str) -> Result<(), DriverError> {
        self.log.lock().unwrap().errors.push(message.to_string());
        Ok(())
    }

    fn save_file(&mut self, target: &DownloadTarget, data: Bytes) -> Result<(), DriverError> {
        self.log.lock().unwrap().saved.push((target.clone(), data));
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stopped = true;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ApiError(String);

/// Answers every call in-process. Uploads report half and then all bytes.
#[derive(Debug, Clone, Default)]
struct FakeApi {
    fail_uploads: bool,
}

impl ChatApi for FakeApi {
    type Error = ApiError;

    async fn load_history(
        &self,
        _session: &SessionContext,
        _room_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        Ok(Vec::new())
    }

    async fn upload(
        &self,
        _session: &SessionContext,
        files: Vec<LocalFile>,
        progress: ProgressSink,
    ) -> Result<Vec<Attachment>, ApiError> {
        let total: u64 = files.iter().map(LocalFile::len).sum();
        progress.report(total / 2, total);
        if self.fail_uploads {
            return Err(ApiError("413 payload too large".into()));
        }
        progress.report(total, total);
        Ok(files
            .into_iter()
            .map(|file| Attachment {
                url: format!("/uploads/{}", file.filename),
                kind: AttachmentKind::from_filename(&file.filename),
                size_bytes: file.len(),
                filename: file.filename,
                upload_progress: 0,
            })
            .collect())
    }

    async fn set_favorite(
        &self,
        _session: &SessionContext,
        _message_id: &str,
        _favorite: bool,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn download(&self, _session: &SessionContext, url: &str) -> Result<Bytes, ApiError> {
        Ok(Bytes::from(format!("contents of {url}")))
    }
}

fn command(command: Command) -> Scripted {
    Scripted::Command(command)
}

fn focus() -> Scripted {
    command(Command::Focus { room_id: ROOM.into() })
}

fn send_pdf() -> Scripted {
    let file = LocalFile::new("notes.pdf", None, Bytes::from(vec![1u8; 200]));
    command(Command::Send { content: "see notes".into(), files: vec![file], reply_to: None })
}

fn progress(log: &Log) -> Vec<u8> {
    log.notices
        .iter()
        .filter_map(|n| match n {
            Notice::UploadProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

async fn run(driver: ScriptedDriver, api: FakeApi) -> MockEnv {
    let env = MockEnv::new();
    let runtime = Runtime::new(driver, api, env.clone(), RuntimeConfig::default());
    runtime.run(session()).await.unwrap();
    env
}

#[tokio::test]
async fn send_with_attachment_round_trip() {
    let (driver, log) = ScriptedDriver::new([
        focus(),
        send_pdf(),
        command(Command::Download { message_id: "srv-1".into(), index: 0 }),
    ]);
    run(driver, FakeApi::default()).await;

    let log = log.lock().unwrap();
    assert_eq!(log.opens, 1);
    let joined = log.events.iter().position(|e| e == "join-chat").unwrap();
    let sent = log.events.iter().position(|e| e == "send-message").unwrap();
    assert!(joined < sent);

    assert_eq!(progress(&log), [0, 50, 99, 100]);

    let [message] = log.final_messages.as_slice() else {
        panic!("expected one message, got {:?}", log.final_messages);
    };
    assert_eq!(message.id, "srv-1");
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.attachments[0].url, "/uploads/notes.pdf");

    let [(target, data)] = log.saved.as_slice() else {
        panic!("expected one saved file");
    };
    assert_eq!(target.filename, "notes.pdf");
    assert_eq!(target.content_type, "application/pdf");
    assert_eq!(data.as_ref(), b"contents of /uploads/notes.pdf");

    assert!(log.errors.is_empty(), "{:?}", log.errors);
    assert!(log.stopped);
}

#[tokio::test]
async fn failed_upload_is_reported_and_sends_nothing() {
    let (driver, log) = ScriptedDriver::new([focus(), send_pdf()]);
    run(driver, FakeApi { fail_uploads: true }).await;

    let log = log.lock().unwrap();
    assert!(!log.events.contains(&"send-message".to_string()));
    assert!(log.final_messages.is_empty());
    assert!(
        log.notices
            .iter()
            .any(|n| matches!(n, Notice::Failure(ChatFailure::UploadFailed { .. })))
    );
    assert!(!progress(&log).contains(&100));
}

#[tokio::test]
async fn refused_opens_back_off_then_connect() {
    let (driver, log) = ScriptedDriver::new([Scripted::WaitOnline, focus()]);
    let env = run(driver.failing_opens(2), FakeApi::default()).await;

    let log = log.lock().unwrap();
    assert_eq!(log.opens, 3);
    assert!(log.events.contains(&"join-chat".to_string()));
    // Two backoff delays passed before the third attempt.
    assert!(env.now() >= Duration::from_millis(1_000));
}

#[tokio::test]
async fn bad_download_index_is_reported() {
    let (driver, log) = ScriptedDriver::new([
        focus(),
        command(Command::Download { message_id: "nope".into(), index: 3 }),
    ]);
    run(driver, FakeApi::default()).await;

    let log = log.lock().unwrap();
    assert_eq!(log.errors.len(), 1);
    assert!(log.errors[0].contains("nope"));
    assert!(log.saved.is_empty());
}

#[tokio::test]
async fn quitting_signs_out_and_stops() {
    let (driver, log) =
        ScriptedDriver::new([focus(), command(Command::Quit), command(Command::Reload {
            room_id: ROOM.into(),
        })]);
    run(driver, FakeApi::default()).await;

    let log = log.lock().unwrap();
    assert!(log.stopped);
    assert!(!log.closes.is_empty(), "sign-out closes the socket");
    assert!(log.notices.contains(&Notice::ConnectionChanged { connected: false }));
    assert_eq!(log.notices.last(), Some(&Notice::RoomsChanged));
}
