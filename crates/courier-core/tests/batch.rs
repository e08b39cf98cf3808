mod common;

use std::sync::Arc;

use common::{at, record, repeat, FakePlatform, RecordingNotifier};
use courier_core::batch::{BatchRunner, ReportStatus};
use courier_core::config::CourierConfig;
use courier_core::schedule::Decision;
use courier_redcap::Record;
use tempfile::TempDir;

const CONFIG: &str = r#"
[platform]
url = "https://redcap.example.org/api/"
control_project = "control"

[reports.Signoff]
projects = ["ccm"]
link_base = "https://redcap.example.org"

[[reports.Signoff.audiences]]
label = "Dr. One"
emails = ["one@example.org"]
field = "clinician___1"
"#;

fn definition(name: &str, frequency: &str) -> Record {
    record(
        name,
        &[
            ("main_complete", "2"),
            ("report_freq", frequency),
            ("report_emailto", "coord@example.org"),
        ],
    )
}

fn signing(id: &str, signed: bool) -> Record {
    let mut fields = vec![("ready_to_review", "Yes"), ("clinician___1", "Checked")];
    if signed {
        fields.push(("ready_for_coordinator", "Yes"));
    }
    record(id, &fields)
}

fn setup() -> (Arc<FakePlatform>, Arc<RecordingNotifier>, BatchRunner) {
    let platform = Arc::new(
        FakePlatform::default()
            .with_project(
                "control",
                vec![
                    definition("Signoff", "Daily"),
                    definition("Mystery", "Daily"),
                    definition("Progress", "Monthly"),
                    definition("Registry", "Daily"),
                    repeat(
                        "Progress",
                        "reports",
                        1,
                        &[
                            ("reports_complete", "2"),
                            ("reports_name", "March2026"),
                            ("reports_datetime", "2026-03-02 05:00:00"),
                        ],
                    ),
                ],
            )
            .with_project("ccm", vec![signing("1", false), signing("2", false)]),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let config = CourierConfig::from_toml_str(CONFIG).unwrap();
    let runner = BatchRunner::new(&config, platform.clone(), notifier.clone());
    (platform, notifier, runner)
}

fn status<'a>(summary: &'a courier_core::batch::BatchSummary, name: &str) -> &'a ReportStatus {
    &summary
        .outcomes
        .iter()
        .find(|outcome| outcome.name == name)
        .unwrap_or_else(|| panic!("no outcome for {name}"))
        .status
}

#[tokio::test]
async fn due_reports_run_and_are_recorded_once() {
    let (platform, notifier, runner) = setup();
    let now = at(2026, 3, 2, 6, 30);

    let summary = runner.update(&[], now).await.unwrap();

    assert_eq!(summary.outcomes.len(), 4);
    assert_eq!(
        status(&summary, "Signoff"),
        &ReportStatus::Recorded {
            period: "2026-03-02".to_string(),
            instance: 1
        }
    );
    assert_eq!(status(&summary, "Mystery"), &ReportStatus::UnknownReport);
    assert_eq!(
        status(&summary, "Progress"),
        &ReportStatus::Skipped(Decision::AlreadyReported {
            period: "March2026".to_string()
        })
    );
    assert!(matches!(status(&summary, "Registry"), ReportStatus::Failed(message) if message.contains("reports.Registry")));
    assert_eq!(summary.recorded(), 1);
    assert!(!summary.is_success());

    assert_eq!(platform.upload_count(), 1);
    assert_eq!(notifier.to("one@example.org").len(), 1);
    assert_eq!(notifier.to("coord@example.org").len(), 1);

    let again = runner.update(&["Signoff".to_string()], at(2026, 3, 2, 9, 0)).await.unwrap();
    assert_eq!(
        status(&again, "Signoff"),
        &ReportStatus::Skipped(Decision::AlreadyReported {
            period: "2026-03-02".to_string()
        })
    );
    assert_eq!(platform.upload_count(), 1);
}

#[tokio::test]
async fn next_run_diffs_against_the_recorded_file() {
    let (platform, notifier, runner) = setup();
    let names = vec!["Signoff".to_string()];

    runner.update(&names, at(2026, 3, 2, 6, 30)).await.unwrap();
    platform
        .projects
        .lock()
        .unwrap()
        .insert("ccm".to_string(), vec![signing("1", true), signing("2", false)]);
    let summary = runner.update(&names, at(2026, 3, 3, 6, 30)).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(
        status(&summary, "Signoff"),
        &ReportStatus::Recorded {
            period: "2026-03-03".to_string(),
            instance: 2
        }
    );
    let coordinator = notifier.to("coord@example.org");
    let latest = coordinator.last().unwrap();
    assert!(latest.html.contains(" 1 Recently Completed Items"));
    assert!(latest.html.contains("Dr. One: 1 Items Pending"));
}

#[tokio::test]
async fn nothing_runs_on_weekends_or_before_start() {
    let (platform, notifier, runner) = setup();
    let names = vec!["Signoff".to_string()];

    let saturday = runner.update(&names, at(2026, 3, 7, 10, 0)).await.unwrap();
    assert_eq!(status(&saturday, "Signoff"), &ReportStatus::Skipped(Decision::Weekend));

    let early = runner.update(&names, at(2026, 3, 2, 5, 0)).await.unwrap();
    assert_eq!(
        status(&early, "Signoff"),
        &ReportStatus::Skipped(Decision::TooEarly { hour: 5 })
    );
    assert!(notifier.emails().is_empty());
    assert_eq!(platform.upload_count(), 0);
}

#[tokio::test]
async fn forced_run_skips_schedule_and_ledger() {
    let (platform, notifier, runner) = setup();
    let outdir = TempDir::new().unwrap();

    let file = runner
        .run_report("Signoff", outdir.path(), at(2026, 3, 7, 3, 0))
        .await
        .unwrap();

    assert!(file.starts_with(outdir.path()));
    assert_eq!(platform.upload_count(), 0);
    // No definition recipients on a forced run, and no fallback configured.
    assert!(notifier.to("coord@example.org").is_empty());
    assert_eq!(notifier.to("one@example.org").len(), 1);

    assert!(runner
        .run_report("Mystery", outdir.path(), at(2026, 3, 7, 3, 0))
        .await
        .is_err());
}

#[tokio::test]
async fn forced_run_keeps_the_previous_file_out_of_outdir() {
    let (_platform, _notifier, runner) = setup();
    runner
        .update(&["Signoff".to_string()], at(2026, 3, 2, 6, 30))
        .await
        .unwrap();

    let outdir = TempDir::new().unwrap();
    let existing = outdir.path().join("signature_report_2026-03-02.csv");
    std::fs::write(&existing, "keep me").unwrap();

    let file = runner
        .run_report("Signoff", outdir.path(), at(2026, 3, 3, 7, 0))
        .await
        .unwrap();

    assert!(file.ends_with("signature_report_2026-03-03.csv"));
    assert_eq!(std::fs::read_to_string(&existing).unwrap(), "keep me");
    let mut names: Vec<String> = std::fs::read_dir(outdir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["signature_report_2026-03-02.csv", "signature_report_2026-03-03.csv"]
    );
}
