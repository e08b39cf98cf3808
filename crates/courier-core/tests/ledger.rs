mod common;

use std::sync::Arc;

use common::{at, record, repeat, FakePlatform};
use courier_core::ledger::{LedgerError, ReportLedger, LEDGER_DATETIME_FORMAT};
use courier_core::schedule::Frequency;
use tempfile::TempDir;

fn control() -> FakePlatform {
    FakePlatform::default().with_project(
        "control",
        vec![
            record(
                "signoff",
                &[
                    ("main_complete", "2"),
                    ("report_freq", "Daily"),
                    ("report_emailto", "a@example.org\n\n b@example.org \n"),
                ],
            ),
            record(
                "progress",
                &[("main_complete", "2"), ("report_freq", "Monthly")],
            ),
            record("registry", &[("main_complete", "0"), ("report_freq", "Daily")]),
            repeat(
                "signoff",
                "reports",
                2,
                &[
                    ("reports_complete", "2"),
                    ("reports_name", "2026-02-27"),
                    ("reports_datetime", "2026-02-27 06:00:01"),
                ],
            ),
            repeat(
                "signoff",
                "reports",
                1,
                &[
                    ("reports_complete", "2"),
                    ("reports_name", "2026-02-26"),
                    ("reports_datetime", "2026-02-26 06:00:01"),
                ],
            ),
            repeat(
                "signoff",
                "reports",
                3,
                &[("reports_complete", "0"), ("reports_name", "2026-02-28")],
            ),
        ],
    )
}

#[tokio::test]
async fn only_complete_definitions_are_active() -> Result<(), LedgerError> {
    let ledger = ReportLedger::new(Arc::new(control()), "control");

    let all = ledger.definitions(&[]).await?;
    let names: Vec<&str> = all.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["signoff", "progress"]);
    assert_eq!(all[0].frequency, Frequency::Daily);
    assert_eq!(all[0].recipients, vec!["a@example.org", "b@example.org"]);
    assert_eq!(all[1].frequency, Frequency::Monthly);
    assert!(all[1].recipients.is_empty());

    let only = ledger.definitions(&["progress".to_string()]).await?;
    assert_eq!(only.len(), 1);
    Ok(())
}

#[tokio::test]
async fn entries_are_complete_and_ordered_by_instance() -> Result<(), LedgerError> {
    let ledger = ReportLedger::new(Arc::new(control()), "control");

    let entries = ledger.entries("signoff").await?;
    let periods: Vec<&str> = entries.iter().map(|e| e.period.as_str()).collect();
    assert_eq!(periods, vec!["2026-02-26", "2026-02-27"]);
    assert!(ledger.entries("progress").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn recording_appends_an_entry_and_attaches_the_file() -> Result<(), LedgerError> {
    let platform = Arc::new(control());
    let ledger = ReportLedger::new(platform.clone(), "control");
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("signature_report_2026-03-02.csv");
    std::fs::write(&file, "record_id\n1\n").unwrap();

    let now = at(2026, 3, 2, 6, 0);
    let instance = ledger.record_report("signoff", "2026-03-02", now, &file).await?;
    assert_eq!(instance, 4);

    let entries = ledger.entries("signoff").await?;
    let last = entries.last().unwrap();
    assert_eq!(last.period, "2026-03-02");
    assert_eq!(last.datetime, now.format(LEDGER_DATETIME_FORMAT).to_string());
    assert_eq!(platform.upload_count(), 1);

    // The attached file is what the next run diffs against.
    let download_dir = TempDir::new().unwrap();
    let previous = ledger
        .download_previous(&entries, download_dir.path())
        .await?
        .expect("previous file");
    assert_eq!(std::fs::read_to_string(previous).unwrap(), "record_id\n1\n");
    Ok(())
}

#[tokio::test]
async fn missing_previous_file_is_a_platform_error() {
    let ledger = ReportLedger::new(Arc::new(control()), "control");
    let entries = ledger.entries("signoff").await.unwrap();
    let dir = TempDir::new().unwrap();

    let err = ledger
        .download_previous(&entries, dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Platform(_)));
    assert!(ledger.download_previous(&[], dir.path()).await.unwrap().is_none());
}

#[tokio::test]
async fn unacknowledged_import_is_not_located() {
    let platform = FakePlatform {
        silent_imports: true,
        ..FakePlatform::default()
    };
    let ledger = ReportLedger::new(Arc::new(platform), "control");
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("out.csv");
    std::fs::write(&file, "").unwrap();

    let err = ledger
        .record_report("signoff", "2026-03-02", at(2026, 3, 2, 6, 0), &file)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unacknowledged { .. }));
}

#[tokio::test]
async fn duplicate_datetimes_abandon_the_event() {
    let platform = control().with_project(
        "control",
        vec![repeat(
            "signoff",
            "reports",
            1,
            &[
                ("reports_complete", "2"),
                ("reports_name", "2026-03-02"),
                ("reports_datetime", "2026-03-02 06:00:00"),
            ],
        )],
    );
    let platform = Arc::new(platform);
    let ledger = ReportLedger::new(platform.clone(), "control");
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("out.csv");
    std::fs::write(&file, "").unwrap();

    let err = ledger
        .record_report("signoff", "2026-03-02", at(2026, 3, 2, 6, 0), &file)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Ambiguous { count: 2, .. }));
    assert_eq!(platform.upload_count(), 0);
}
