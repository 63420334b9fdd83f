use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tempfile::NamedTempFile;

use visitor_watch::detect::{BoundingBox, Category, Classification, LabelMap, ScriptedBackend};
use visitor_watch::ingest::{open_source, FrameRate, FrameSource, SourceSpec};
use visitor_watch::notify::RecordingNotifier;
use visitor_watch::pipeline::{FeedingMonitor, IntruderMonitor, StatusMessage, StopReason};
use visitor_watch::policy::{AlertState, ClassificationPolicy, IntrusionPolicy, ManualClock};

fn stub(frames: u64, scene: &str) -> Box<dyn FrameSource + Send> {
    let spec = SourceSpec::parse(&format!("stub://it?frames={}&scene={}", frames, scene))
        .expect("stub spec");
    open_source(&spec, FrameRate::Unpaced).expect("open stub")
}

fn write_temp(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

#[test]
fn feeding_burst_sends_one_alert_at_its_first_frame() {
    let mut steps = vec![None; 10];
    for step in &mut steps[3..=5] {
        *step = Some(Classification {
            label_index: 0,
            confidence: 0.99,
        });
    }
    let labels = LabelMap::parse("0 feeding\n1 petting\n2 none");
    let policy = ClassificationPolicy::new(labels).with_cooldown(Duration::from_secs(5));
    let clock = ManualClock::new();
    let mut monitor = FeedingMonitor::new(
        stub(10, "pattern"),
        ScriptedBackend::classifier(steps),
        policy,
        RecordingNotifier::default(),
        clock.clone(),
    );

    let mut alert_frames = Vec::new();
    let mut flagged_frames = Vec::new();
    let summary = monitor
        .run(&AtomicBool::new(false), |report| {
            if report.decision.flagged == Some(Category::Feeding) {
                flagged_frames.push(report.frame.index);
            }
            if report.decision.notify.is_some() {
                alert_frames.push(report.frame.index);
                assert_eq!(
                    report.status,
                    vec![StatusMessage::Info("Alert sent successfully!".to_string())]
                );
            }
            clock.advance(Duration::from_secs(1));
        })
        .expect("run feeding monitor");

    assert_eq!(flagged_frames, vec![3, 4, 5]);
    assert_eq!(alert_frames, vec![3]);
    assert_eq!(monitor.notifier().sent, vec!["Visitor is Feeding!".to_string()]);
    assert_eq!(summary.frames, 10);
    assert_eq!(summary.notifications_sent, 1);
    assert_eq!(summary.stop_reason, StopReason::SourceExhausted);
    assert_eq!(
        monitor.policy().limiter().last_sent(),
        Some(Duration::from_secs(3))
    );
}

#[test]
fn feeding_monitor_reads_labels_and_script_from_disk() {
    let labels_file = write_temp("feeding\npetting\nnone\n", ".txt");
    let script_file = write_temp(
        r#"{"classifications": [
            {"label_index": 1, "confidence": 0.97},
            {"label_index": 2, "confidence": 0.99},
            {"label_index": 1, "confidence": 0.95},
            null
        ]}"#,
        ".json",
    );
    let labels = LabelMap::load(labels_file.path()).expect("load labels");
    let detector = ScriptedBackend::from_json_file(script_file.path()).expect("load script");
    let clock = ManualClock::new();
    let mut monitor = FeedingMonitor::new(
        stub(4, "light"),
        detector,
        ClassificationPolicy::new(labels),
        RecordingNotifier::default(),
        clock.clone(),
    );

    let mut flagged = Vec::new();
    monitor
        .run(&AtomicBool::new(false), |report| {
            flagged.push(report.decision.flagged.clone());
            clock.advance(Duration::from_secs(10));
        })
        .expect("run feeding monitor");

    // Idle is flagged but never alerts; 0.95 is not above the threshold.
    assert_eq!(
        flagged,
        vec![Some(Category::Petting), Some(Category::Idle), None, None]
    );
    assert_eq!(monitor.notifier().sent.len(), 1);
}

#[test]
fn intruder_indicator_and_inclusive_cooldown() {
    let person = BoundingBox::new(10.0, 10.0, 110.0, 210.0);
    let steps: Vec<Vec<BoundingBox>> = [0usize, 0, 2, 3, 0, 1]
        .iter()
        .map(|&count| vec![person; count])
        .collect();
    let clock = ManualClock::new();
    let mut monitor = IntruderMonitor::new(
        stub(6, "dark"),
        ScriptedBackend::detector(steps),
        IntrusionPolicy::new(30).expect("threshold"),
        RecordingNotifier::default(),
        clock.clone(),
    )
    .with_pacing(None);

    let mut states = Vec::new();
    let mut transitions = 0;
    let mut alert_times = Vec::new();
    monitor
        .run(&AtomicBool::new(false), |report| {
            states.push(report.alert_state);
            transitions += usize::from(report.alert_transition.is_some());
            if report.decision.notify.is_some() {
                alert_times.push(report.frame.index);
            }
            clock.advance(Duration::from_secs(5));
        })
        .expect("run intruder monitor");

    use AlertState::{Alert, NoAlert};
    assert_eq!(states, vec![NoAlert, NoAlert, Alert, Alert, NoAlert, Alert]);
    assert_eq!(transitions, 3);
    // Suspicious frames land exactly one cooldown apart or more.
    assert_eq!(alert_times, vec![2, 3, 5]);
    assert_eq!(
        monitor.notifier().sent,
        vec!["Intruder Alert!".to_string(); 3]
    );
}

#[test]
fn bright_regions_never_alert() {
    let person = BoundingBox::new(0.0, 0.0, 320.0, 240.0);
    let clock = ManualClock::new();
    let mut monitor = IntruderMonitor::new(
        stub(5, "light"),
        ScriptedBackend::detector(vec![vec![person]; 5]),
        IntrusionPolicy::new(30).expect("threshold"),
        RecordingNotifier::default(),
        clock.clone(),
    )
    .with_pacing(None)
    .with_frame_limit(Some(3));

    let summary = monitor
        .run(&AtomicBool::new(false), |report| {
            assert!(report.decision.suspicious.is_empty());
            clock.advance(Duration::from_secs(60));
        })
        .expect("run intruder monitor");

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.stop_reason, StopReason::FrameLimit);
    assert!(monitor.notifier().sent.is_empty());
}
