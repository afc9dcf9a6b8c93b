//! End-to-end session scenarios in a deterministic world.
//!
//! Every test runs clients against the in-memory server with the standard
//! invariants checked after each event, and controls exactly when frames
//! and HTTP responses move.

use std::time::Duration;

use bytes::Bytes;
use quadchat_client::{ChatFailure, ClientEvent, LocalFile, Notice};
use quadchat_harness::{InvariantRegistry, TestCluster};
use quadchat_proto::{ClientEmit, Message, MessageStatus, Room};

const R1: &str = "r1";
const R2: &str = "r2";

/// Ada and Bo share `r1` and `r2`. Client 0 is Ada, client 1 is Bo.
fn campus() -> TestCluster {
    let mut cluster = TestCluster::new(11).with_invariants(InvariantRegistry::standard());
    cluster.add_client("ada", "Ada");
    cluster.add_client("bo", "Bo");
    let members = || ["ada".to_string(), "bo".to_string()];
    cluster.server_mut().create_room(Room::new(R1, true, "Algorithms", members()));
    cluster.server_mut().create_room(Room::new(R2, true, "Lab partners", members()));
    cluster
}

fn focus(cluster: &mut TestCluster, index: usize, room: &str) {
    cluster.handle(index, ClientEvent::Focus { room_id: room.into() }).unwrap();
    cluster.pump().unwrap();
}

fn send(cluster: &mut TestCluster, index: usize, text: &str) {
    let event = ClientEvent::Send { content: text.into(), files: vec![], reply_to: None };
    cluster.handle(index, event).unwrap();
}

fn messages(cluster: &TestCluster, index: usize, room: &str) -> Vec<Message> {
    cluster
        .client(index)
        .client()
        .timeline(room)
        .map(|t| t.messages().to_vec())
        .unwrap_or_default()
}

fn failures(cluster: &TestCluster, index: usize) -> Vec<ChatFailure> {
    cluster
        .client(index)
        .notices()
        .iter()
        .filter_map(|n| match n {
            Notice::Failure(f) => Some(f.clone()),
            _ => None,
        })
        .collect()
}

/// Advance in one-second steps, delivering traffic after each.
fn run_for(cluster: &mut TestCluster, seconds: u64) {
    for _ in 0..seconds {
        cluster.advance(Duration::from_secs(1)).unwrap();
        cluster.pump().unwrap();
    }
}

#[test]
fn offline_send_shows_pending_then_fails_on_deadline() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    focus(&mut cluster, 0, R1);

    cluster.partition(0).unwrap();
    cluster.pump().unwrap();
    send(&mut cluster, 0, "hi");

    let shown = messages(&cluster, 0, R1);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].status, MessageStatus::Pending);
    assert!(shown[0].has_temp_id());

    run_for(&mut cluster, 14);
    assert_eq!(messages(&cluster, 0, R1)[0].status, MessageStatus::Pending);

    run_for(&mut cluster, 2);
    let shown = messages(&cluster, 0, R1);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].status, MessageStatus::Failed);
    assert_eq!(shown[0].content, "hi");
    assert!(failures(&cluster, 0).iter().any(|f| matches!(
        f,
        ChatFailure::SendFailed { reason, .. } if reason == "timed out"
    )));

    // Coming back online never retries on its own.
    cluster.heal(0).unwrap();
    run_for(&mut cluster, 40);
    assert!(cluster.client(0).client().is_connected());
    assert_eq!(messages(&cluster, 0, R1)[0].status, MessageStatus::Failed);
    assert!(cluster.server().messages(R1).is_empty());
}

#[test]
fn echo_before_ack_leaves_one_sent_message() {
    let mut cluster = TestCluster::new(5).with_invariants(InvariantRegistry::standard());
    let tab_a = cluster.add_client("ada", "Ada");
    let tab_b = cluster.add_client("ada", "Ada");
    let members = ["ada".to_string(), "bo".to_string()];
    cluster.server_mut().create_room(Room::new(R1, true, "Algorithms", members));
    cluster.sign_in(tab_a).unwrap();
    cluster.sign_in(tab_b).unwrap();
    focus(&mut cluster, tab_a, R1);
    focus(&mut cluster, tab_b, R1);

    cluster.server_mut().faults_mut().hold_acks = true;
    send(&mut cluster, tab_a, "hello");
    cluster.pump().unwrap();

    // Both tabs have the push; tab A's ack is still held.
    let in_b = messages(&cluster, tab_b, R1);
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].content, "hello");

    cluster.server_mut().release_acks();
    cluster.pump().unwrap();
    run_for(&mut cluster, 20);

    let in_a = messages(&cluster, tab_a, R1);
    assert_eq!(in_a.len(), 1);
    assert_eq!(in_a[0].content, "hello");
    assert_eq!(in_a[0].status, MessageStatus::Sent);
    assert_eq!(in_a[0].id, cluster.server().messages(R1)[0].id);
    assert!(failures(&cluster, tab_a).is_empty());
    assert_eq!(cluster.client(tab_a).client().pending_sends(), 0);
}

#[test]
fn attachments_upload_before_the_message_is_sent() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    focus(&mut cluster, 0, R1);

    let files = vec![
        LocalFile::new("notes.pdf", Some("application/pdf".into()), Bytes::from(vec![1; 3_000])),
        LocalFile::new("diagram.png", None, Bytes::from(vec![2; 1_000])),
    ];
    let seen_before = cluster.client(0).notices().len();
    cluster
        .handle(0, ClientEvent::Send { content: "see attached".into(), files, reply_to: None })
        .unwrap();

    // Nothing is on the timeline or the wire until the batch finishes.
    assert!(messages(&cluster, 0, R1).is_empty());
    assert!(cluster.server().messages(R1).is_empty());

    cluster.pump().unwrap();

    let progress = &cluster.client(0).progress()[&0];
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));

    let after = &cluster.client(0).notices()[seen_before..];
    let done = after
        .iter()
        .position(|n| *n == Notice::UploadProgress { batch_id: 0, percent: 100 })
        .unwrap();
    let first_timeline =
        after.iter().position(|n| matches!(n, Notice::TimelineChanged { .. })).unwrap();
    assert!(done < first_timeline);

    let stored = cluster.server().messages(R1);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].attachments.len(), 2);
    assert_eq!(stored[0].attachments[0].filename, "notes.pdf");

    let shown = messages(&cluster, 0, R1);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].status, MessageStatus::Sent);
}

#[test]
fn failed_upload_sends_nothing() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    focus(&mut cluster, 0, R1);
    cluster.server_mut().faults_mut().fail_uploads = Some("413 payload too large".into());

    let files = vec![LocalFile::new("huge.mp4", None, Bytes::from(vec![0; 4_096]))];
    cluster
        .handle(0, ClientEvent::Send { content: "lecture".into(), files, reply_to: None })
        .unwrap();
    cluster.pump().unwrap();

    assert!(messages(&cluster, 0, R1).is_empty());
    assert!(cluster.server().messages(R1).is_empty());
    let sends = cluster
        .server()
        .received()
        .iter()
        .filter(|(_, emit)| matches!(emit, ClientEmit::SendMessage(_)))
        .count();
    assert_eq!(sends, 0);
    assert_eq!(
        failures(&cluster, 0),
        [ChatFailure::UploadFailed { batch_id: 0, reason: "413 payload too large".into() }]
    );
}

#[test]
fn queued_send_flushes_on_reconnect() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    cluster.sign_in(1).unwrap();
    focus(&mut cluster, 0, R1);
    focus(&mut cluster, 1, R1);

    cluster.partition(0).unwrap();
    cluster.pump().unwrap();
    send(&mut cluster, 0, "written on the bus");
    cluster.heal(0).unwrap();
    run_for(&mut cluster, 2);

    assert!(cluster.client(0).client().is_connected());
    let mine = messages(&cluster, 0, R1);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, MessageStatus::Sent);

    let theirs = messages(&cluster, 1, R1);
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].id, mine[0].id);
    InvariantRegistry::quiescent().assert_all(&cluster.snapshot(), "after reconnect");
}

#[test]
fn reconnect_rejoins_rooms_and_refetches_focused_history() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    cluster.sign_in(1).unwrap();
    focus(&mut cluster, 0, R1);
    focus(&mut cluster, 1, R1);

    cluster.partition(0).unwrap();
    send(&mut cluster, 1, "you missed this");
    cluster.pump().unwrap();
    assert!(messages(&cluster, 0, R1).is_empty());

    cluster.heal(0).unwrap();
    run_for(&mut cluster, 2);

    let caught_up = messages(&cluster, 0, R1);
    assert_eq!(caught_up.len(), 1);
    assert_eq!(caught_up[0].content, "you missed this");

    // Rejoined, so live pushes flow again.
    send(&mut cluster, 1, "welcome back");
    cluster.pump().unwrap();
    assert_eq!(messages(&cluster, 0, R1).len(), 2);
}

#[test]
fn messages_posted_while_history_loads_are_kept() {
    let mut cluster = TestCluster::new(13)
        .with_invariants(InvariantRegistry::standard())
        .with_history_at_request();
    cluster.add_client("ada", "Ada");
    cluster.add_client("bo", "Bo");
    let members = ["ada".to_string(), "bo".to_string()];
    cluster.server_mut().create_room(Room::new(R1, true, "Algorithms", members));
    cluster.sign_in(0).unwrap();
    cluster.sign_in(1).unwrap();
    focus(&mut cluster, 1, R1);
    send(&mut cluster, 1, "before");
    cluster.pump().unwrap();

    // Ada joins and asks for history; the server reads the room right away
    // but the response is still on its way.
    cluster.handle(0, ClientEvent::Focus { room_id: R1.into() }).unwrap();
    send(&mut cluster, 1, "during");
    send(&mut cluster, 0, "mine, also during");
    cluster.pump().unwrap();

    // Ada's own message sits where she composed it, ahead of Bo's push.
    let contents: Vec<String> = messages(&cluster, 0, R1).into_iter().map(|m| m.content).collect();
    assert_eq!(contents, ["before", "mine, also during", "during"]);
    assert!(messages(&cluster, 0, R1).iter().all(|m| m.status == MessageStatus::Sent));
    InvariantRegistry::quiescent().assert_all(&cluster.snapshot(), "after history");

    // A fresh reload agrees with what was kept.
    cluster.handle(0, ClientEvent::Reload { room_id: R1.into() }).unwrap();
    cluster.pump().unwrap();
    assert_eq!(messages(&cluster, 0, R1).len(), 3);
}

#[test]
fn unfocused_joined_room_counts_unread() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    cluster.sign_in(1).unwrap();
    focus(&mut cluster, 0, R1);
    focus(&mut cluster, 1, R1);
    focus(&mut cluster, 1, R2);

    send(&mut cluster, 0, "one");
    send(&mut cluster, 0, "two");
    cluster.pump().unwrap();

    let bo = cluster.client(1).client();
    assert_eq!(bo.rooms().get(R1).unwrap().unread_count, 2);
    assert_eq!(messages(&cluster, 1, R1).len(), 2);

    focus(&mut cluster, 1, R1);
    assert_eq!(cluster.client(1).client().rooms().get(R1).unwrap().unread_count, 0);
}

#[test]
fn placeholder_direct_chat_is_superseded_by_server_room() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    cluster
        .handle(0, ClientEvent::StartDirectChat { peer_id: "bo".into(), peer_name: "Bo".into() })
        .unwrap();
    cluster.pump().unwrap();
    let placeholder = cluster.client(0).client().focused_room().cloned().unwrap();
    assert_eq!(placeholder, "dm-ada-bo");

    let members = ["bo".to_string(), "ada".to_string()];
    cluster.server_mut().create_room(Room::new("srv-dm-7", false, "Bo", members));
    cluster.pump().unwrap();

    let ada = cluster.client(0).client();
    assert_eq!(ada.focused_room().map(String::as_str), Some("srv-dm-7"));
    assert!(!ada.rooms().contains(&placeholder));
    assert!(ada.rooms().is_joined("srv-dm-7"));
    let conn = cluster.client(0).conn().unwrap();
    assert!(cluster.server().received().iter().any(|(c, emit)| {
        *c == conn && matches!(emit, ClientEmit::JoinChat { room_id } if room_id == "srv-dm-7")
    }));

    send(&mut cluster, 0, "hey");
    cluster.pump().unwrap();
    assert_eq!(messages(&cluster, 0, "srv-dm-7")[0].status, MessageStatus::Sent);
}

#[test]
fn typing_reaches_others_but_not_other_tabs() {
    let mut cluster = TestCluster::new(3).with_invariants(InvariantRegistry::standard());
    let tab_a = cluster.add_client("ada", "Ada");
    let tab_b = cluster.add_client("ada", "Ada");
    let bo = cluster.add_client("bo", "Bo");
    let members = ["ada".to_string(), "bo".to_string()];
    cluster.server_mut().create_room(Room::new(R1, true, "Algorithms", members));
    for index in [tab_a, tab_b, bo] {
        cluster.sign_in(index).unwrap();
        focus(&mut cluster, index, R1);
    }

    cluster.handle(tab_a, ClientEvent::Keystroke).unwrap();
    cluster.pump().unwrap();

    assert_eq!(cluster.client(bo).client().typing_summary(R1).names, ["Ada"]);
    assert!(cluster.client(tab_b).client().typing_summary(R1).is_empty());

    // Quiet interval passes: the stop reaches Bo.
    cluster.advance(Duration::from_millis(1_100)).unwrap();
    cluster.pump().unwrap();
    assert!(cluster.client(bo).client().typing_summary(R1).is_empty());
}

#[test]
fn presence_goes_offline_with_the_last_tab() {
    let mut cluster = TestCluster::new(9);
    let tab_a = cluster.add_client("ada", "Ada");
    let tab_b = cluster.add_client("ada", "Ada");
    let bo = cluster.add_client("bo", "Bo");
    cluster.sign_in(bo).unwrap();
    cluster.sign_in(tab_a).unwrap();
    cluster.sign_in(tab_b).unwrap();
    assert!(cluster.client(bo).client().presence().is_online("ada"));

    cluster.partition(tab_a).unwrap();
    cluster.pump().unwrap();
    assert!(cluster.client(bo).client().presence().is_online("ada"));

    cluster.partition(tab_b).unwrap();
    cluster.pump().unwrap();
    assert!(!cluster.client(bo).client().presence().is_online("ada"));
}

#[test]
fn favorite_failure_rolls_back() {
    let mut cluster = campus();
    cluster.sign_in(0).unwrap();
    cluster.sign_in(1).unwrap();
    focus(&mut cluster, 0, R1);
    focus(&mut cluster, 1, R1);
    send(&mut cluster, 1, "exam moved to friday");
    cluster.pump().unwrap();
    let id = messages(&cluster, 0, R1)[0].id.clone();

    cluster.server_mut().faults_mut().fail_favorites = true;
    cluster.handle(0, ClientEvent::ToggleFavorite { message_id: id.clone() }).unwrap();
    assert!(messages(&cluster, 0, R1)[0].favorited_by.contains("ada"));

    cluster.pump().unwrap();
    assert!(!messages(&cluster, 0, R1)[0].favorited_by.contains("ada"));
    assert!(matches!(
        failures(&cluster, 0).as_slice(),
        [ChatFailure::FavoriteFailed { message_id, .. }] if *message_id == id
    ));

    cluster.server_mut().faults_mut().fail_favorites = false;
    cluster.handle(0, ClientEvent::ToggleFavorite { message_id: id.clone() }).unwrap();
    cluster.pump().unwrap();
    assert!(messages(&cluster, 0, R1)[0].favorited_by.contains("ada"));
    assert!(cluster.server().messages(R1)[0].favorited_by.contains("ada"));
}

#[test]
fn history_failure_can_be_reloaded() {
    let mut cluster = campus();
    cluster.sign_in(1).unwrap();
    focus(&mut cluster, 1, R1);
    send(&mut cluster, 1, "first");
    cluster.pump().unwrap();

    cluster.sign_in(0).unwrap();
    cluster.server_mut().faults_mut().fail_history = true;
    focus(&mut cluster, 0, R1);
    assert!(messages(&cluster, 0, R1).is_empty());
    assert!(matches!(failures(&cluster, 0).as_slice(), [ChatFailure::LoadFailed { .. }]));

    cluster.server_mut().faults_mut().fail_history = false;
    cluster.handle(0, ClientEvent::Reload { room_id: R1.into() }).unwrap();
    cluster.pump().unwrap();
    assert_eq!(messages(&cluster, 0, R1).len(), 1);
}

#[test]
fn rejected_token_stops_reconnecting() {
    let mut cluster = campus();
    // Token rotated on the server after the client was configured.
    cluster.server_mut().add_user("ada", "Ada", "rotated");
    cluster.sign_in(0).unwrap();

    assert!(!cluster.client(0).client().is_connected());
    assert!(matches!(failures(&cluster, 0).as_slice(), [ChatFailure::AuthRejected { .. }]));

    run_for(&mut cluster, 60);
    assert_eq!(cluster.server().connection_count(), 0);
    assert_eq!(failures(&cluster, 0).len(), 1);
}
