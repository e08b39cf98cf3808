use courier_core::frame::{frame_from_rows, record_keys};
use courier_core::partition::{partition, CompletionStrategy};
use courier_redcap::{KeySpec, RecordKey};
use polars::prelude::*;

fn table(rows: &[(&str, Option<&str>, Option<&str>)]) -> PolarsResult<DataFrame> {
    let cells: Vec<Vec<Option<String>>> = rows
        .iter()
        .map(|(id, ready, coordinator)| {
            vec![
                Some(id.to_string()),
                ready.map(str::to_string),
                coordinator.map(str::to_string),
            ]
        })
        .collect();
    frame_from_rows(&["record_id", "ready_to_review", "ready_for_coordinator"], &cells)
}

fn pending_expr() -> Expr {
    col("ready_to_review")
        .eq(lit("Yes"))
        .and(col("ready_for_coordinator").is_null())
}

fn ids(df: &DataFrame, key: KeySpec) -> PolarsResult<Vec<RecordKey>> {
    let mut keys = record_keys(df, key)?;
    keys.sort();
    Ok(keys)
}

#[test]
fn partition_covers_every_row_once() -> PolarsResult<()> {
    let df = table(&[
        ("1", Some("Yes"), None),
        ("2", Some("Yes"), Some("Yes")),
        ("3", None, None),
        ("4", Some("No"), None),
    ])?;

    let split = partition(&df, pending_expr())?;

    assert_eq!(split.pending.height(), 1);
    assert_eq!(split.rest.height(), 3);
    assert_eq!(split.pending.height() + split.rest.height(), df.height());
    let pending_ids: Vec<Option<&str>> = split.pending.column("record_id")?.str()?.into_iter().collect();
    assert_eq!(pending_ids, vec![Some("1")]);
    Ok(())
}

#[test]
fn missing_from_today_reports_rows_that_left_pending() -> PolarsResult<()> {
    let yesterday = table(&[
        ("1", Some("Yes"), None),
        ("2", Some("Yes"), None),
        ("3", Some("Yes"), None),
    ])?;
    let today = table(&[
        ("1", Some("Yes"), Some("Yes")),
        ("2", Some("Yes"), None),
        ("3", Some("Yes"), None),
    ])?;
    let pending_today = partition(&today, pending_expr())?.pending;

    let completed = CompletionStrategy::MissingFromToday
        .completions(&today, &pending_today, Some(&yesterday), KeySpec::Record)?
        .expect("previous snapshot present");

    assert_eq!(ids(&completed, KeySpec::Record)?, vec![RecordKey::record(1)]);
    Ok(())
}

#[test]
fn missing_from_today_matches_keys_across_spellings() -> PolarsResult<()> {
    let yesterday = table(&[("7.0", Some("Yes"), None), (" 8 ", Some("Yes"), None)])?;
    let today = table(&[("7", Some("Yes"), None)])?;
    let pending_today = partition(&today, pending_expr())?.pending;

    let completed = CompletionStrategy::MissingFromToday
        .completions(&today, &pending_today, Some(&yesterday), KeySpec::Record)?
        .expect("previous snapshot present");

    assert_eq!(ids(&completed, KeySpec::Record)?, vec![RecordKey::record(8)]);
    Ok(())
}

#[test]
fn completions_absent_without_previous_pending() -> PolarsResult<()> {
    let today = table(&[("1", Some("Yes"), None)])?;
    let pending_today = partition(&today, pending_expr())?.pending;
    let empty_yesterday = table(&[])?;

    let strategy = CompletionStrategy::MissingFromToday;
    assert!(strategy
        .completions(&today, &pending_today, None, KeySpec::Record)?
        .is_none());
    assert!(strategy
        .completions(&today, &pending_today, Some(&empty_yesterday), KeySpec::Record)?
        .is_none());
    Ok(())
}

#[test]
fn join_with_yesterday_pending_keeps_decisions_on_pending_requests() -> PolarsResult<()> {
    let columns = ["record_id", "redcap_repeat_instance", "approval"];
    let row = |id: &str, instance: &str, approval: Option<&str>| {
        vec![
            Some(id.to_string()),
            Some(instance.to_string()),
            approval.map(str::to_string),
        ]
    };
    let yesterday = frame_from_rows(
        &columns,
        &[row("1", "1", None), row("1", "2", None), row("2", "1", None)],
    )?;
    let today = frame_from_rows(
        &columns,
        &[
            row("1", "1", Some("Approved")),
            row("1", "2", None),
            row("2", "1", Some("Denied")),
            row("3", "1", Some("Approved")),
        ],
    )?;

    let strategy = CompletionStrategy::JoinWithYesterdayPending {
        decided: col("approval").is_not_null(),
    };
    let pending_today = partition(&today, col("approval").is_null())?.pending;
    let completed = strategy
        .completions(&today, &pending_today, Some(&yesterday), KeySpec::RecordInstance)?
        .expect("previous snapshot present");

    assert_eq!(
        ids(&completed, KeySpec::RecordInstance)?,
        vec![RecordKey::instance(1, 1), RecordKey::instance(2, 1)]
    );
    assert_eq!(strategy.name(), "join_with_yesterday_pending");
    Ok(())
}
