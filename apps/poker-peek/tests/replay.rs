use std::path::Path;
use std::time::Duration;

use poker_peek::commands::{load_frames, read_records, replay, toggle};
use poker_peek::config::{AppConfig, Command, ToggleState, DEFAULT_REPLAY_URL};
use serde_json::json;
use vote_overlay::OverlayCommand;

fn config(dir: &Path, store_capacity: usize) -> AppConfig {
    AppConfig {
        log_filter: "info".into(),
        target_host: "action.parabol.co".into(),
        poll_interval: Duration::from_millis(2000),
        store_capacity,
        preferences_path: dir.join("prefs.json"),
        print_metrics: false,
        command: Command::Status,
    }
}

fn vote(scores: &[(&str, &str)]) -> String {
    let scores: Vec<_> = scores
        .iter()
        .map(|(user, label)| {
            json!({
                "id": format!("s1:{user}"),
                "userId": user,
                "label": label,
                "user": {"id": user, "preferredName": user, "picture": format!("https://cdn.example/{user}.png")}
            })
        })
        .collect();
    json!({
        "type": "next",
        "payload": {"data": {"voteForPokerStory": {
            "__typename": "VoteForPokerStorySuccess",
            "stage": {"id": "s1", "scores": scores}
        }}}
    })
    .to_string()
}

fn write_frames(dir: &Path, records: &[(&str, String)]) -> std::path::PathBuf {
    let path = dir.join("frames.jsonl");
    let body: Vec<String> = records
        .iter()
        .map(|(direction, payload)| json!({"direction": direction, "payload": payload}).to_string())
        .collect();
    std::fs::write(&path, body.join("\n")).expect("write frames");
    path
}

fn write_page(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("page.json");
    let page = json!({
        "url": "https://action.parabol.co/meet/m1/estimate/3",
        "root": {"tag": "body", "children": [
            {"tag": "nav", "attrs": {"class": "user-menu"}, "children": [
                {"tag": "img", "attrs": {"src": "https://cdn.example/U1.png"},
                 "rect": {"x": 900, "y": 10, "width": 24, "height": 24}}
            ]},
            {"tag": "section", "children": [
                {"tag": "h2", "text": "Story Points"},
                {"tag": "div", "children": [
                    {"tag": "img", "attrs": {"src": "https://cdn.example/U1.png"},
                     "rect": {"x": 0, "y": 100, "width": 40, "height": 40}},
                    {"tag": "img", "attrs": {"src": "https://cdn.example/U2.png"},
                     "rect": {"x": 50, "y": 100, "width": 40, "height": 40}}
                ]}
            ]}
        ]}
    });
    std::fs::write(&path, page.to_string()).expect("write page");
    path
}

#[test_timeout::tokio_timeout_test(30)]
async fn replay_badges_teammates_from_the_latest_vote() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames = write_frames(
        dir.path(),
        &[
            ("outgoing", r#"{"type":"connection_init"}"#.to_string()),
            ("incoming", vote(&[("U1", "5")])),
            ("incoming", "not json".to_string()),
            ("incoming", vote(&[("U1", "8"), ("U2", "3")])),
        ],
    );
    let page = write_page(dir.path());

    let commands = replay(&config(dir.path(), 1000), &frames, &page, DEFAULT_REPLAY_URL)
        .await
        .expect("replay");
    assert_eq!(commands[0], OverlayCommand::RemoveAllBadges);
    let badges: Vec<(String, String)> = commands
        .iter()
        .filter_map(|command| match command {
            OverlayCommand::AddBadge(badge) => {
                Some((badge.voter_user_id.clone(), badge.label.clone()))
            }
            OverlayCommand::RemoveAllBadges => None,
        })
        .collect();
    assert_eq!(badges, vec![("U2".to_string(), "3".to_string())]);
}

#[test_timeout::tokio_timeout_test(30)]
async fn exported_frames_keep_their_capture_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("export.jsonl");
    let newer = json!({
        "id": "5f0c0b8e-4a0e-4b8e-9a57-0d8f3c1b2a11",
        "timestamp": 200,
        "direction": "incoming",
        "payload": vote(&[("U2", "3")]),
        "sourceUrl": "wss://action.parabol.co/graphql?v=2"
    });
    let older = json!({
        "timestamp": 100,
        "direction": "incoming",
        "payload": vote(&[("U2", "8")])
    });
    std::fs::write(&path, format!("{newer}\n{older}")).expect("write");
    let page = write_page(dir.path());
    let cfg = config(dir.path(), 1000);

    let stored = load_frames(&cfg, &path, DEFAULT_REPLAY_URL)
        .await
        .expect("frames");
    let times: Vec<i64> = stored.iter().map(|frame| frame.timestamp()).collect();
    assert_eq!(times, [200, 100]);
    assert_eq!(stored[0].source_url(), "wss://action.parabol.co/graphql?v=2");
    assert_eq!(stored[1].source_url(), DEFAULT_REPLAY_URL);

    let commands = replay(&cfg, &path, &page, DEFAULT_REPLAY_URL)
        .await
        .expect("replay");
    let labels: Vec<&str> = commands
        .iter()
        .filter_map(|command| match command {
            OverlayCommand::AddBadge(badge) => Some(badge.label.as_str()),
            OverlayCommand::RemoveAllBadges => None,
        })
        .collect();
    assert_eq!(labels, ["3"]);
}

#[test_timeout::tokio_timeout_test(30)]
async fn replay_with_overlay_disabled_only_clears() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path(), 1000);
    assert!(!toggle(&cfg, ToggleState::Off).expect("toggle"));

    let frames = write_frames(dir.path(), &[("incoming", vote(&[("U2", "3")]))]);
    let page = write_page(dir.path());
    let commands = replay(&cfg, &frames, &page, DEFAULT_REPLAY_URL)
        .await
        .expect("replay");
    assert_eq!(commands, vec![OverlayCommand::RemoveAllBadges]);
}

#[test_timeout::tokio_timeout_test(30)]
async fn frames_keep_only_the_most_recent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records: Vec<(&str, String)> = (0..12).map(|idx| ("incoming", format!("frame-{idx}"))).collect();
    let frames = write_frames(dir.path(), &records);

    let stored = load_frames(&config(dir.path(), 10), &frames, DEFAULT_REPLAY_URL)
        .await
        .expect("frames");
    assert_eq!(stored.len(), 10);
    assert_eq!(stored[0].payload(), "frame-2");
    assert_eq!(stored[9].payload(), "frame-11");
    assert!(stored.iter().all(|frame| frame.source_url() == DEFAULT_REPLAY_URL));
}

#[test_timeout::tokio_timeout_test(30)]
async fn foreign_replay_urls_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames = write_frames(dir.path(), &[("incoming", "x".to_string())]);
    assert!(load_frames(&config(dir.path(), 10), &frames, "wss://example.com/socket")
        .await
        .is_err());
}

#[test]
fn exported_frames_are_valid_replay_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("export.jsonl");
    std::fs::write(
        &path,
        r#"{"id":"5f0c0b8e-4a0e-4b8e-9a57-0d8f3c1b2a11","timestamp":1,"direction":"outgoing","payload":"[Binary data]","sourceUrl":"wss://action.parabol.co/graphql"}

{"direction":"incoming","payload":"hello"}"#,
    )
    .expect("write");
    let records = read_records(&path).expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp, Some(1));
    assert_eq!(records[1].payload, "hello");
    assert_eq!(records[1].timestamp, None);

    std::fs::write(&path, "{\"direction\":\"sideways\",\"payload\":\"x\"}").expect("write");
    assert!(read_records(&path).is_err());
}
