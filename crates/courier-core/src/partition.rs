use courier_redcap::KeySpec;
use polars::prelude::*;

use crate::frame::normalize_keys;

#[derive(Debug, Clone)]
pub struct Partition {
    pub pending: DataFrame,
    pub rest: DataFrame,
}

/// Splits `df` on `predicate`; rows where it evaluates to null land in `rest`.
pub fn partition(df: &DataFrame, predicate: Expr) -> PolarsResult<Partition> {
    let holds = predicate.fill_null(lit(false));
    let pending = df.clone().lazy().filter(holds.clone()).collect()?;
    let rest = df.clone().lazy().filter(holds.not()).collect()?;
    Ok(Partition { pending, rest })
}

/// How "recently completed" is derived from yesterday's pending rows.
#[derive(Debug, Clone)]
pub enum CompletionStrategy {
    /// Pending yesterday, no longer pending today.
    MissingFromToday,
    /// Decided today (per `decided`) and pending yesterday.
    JoinWithYesterdayPending { decided: Expr },
}

fn key_exprs(key: KeySpec) -> Vec<Expr> {
    key.columns().iter().map(|name| col(*name)).collect()
}

fn join_on_keys(
    left: &DataFrame,
    right: &DataFrame,
    key: KeySpec,
    join_type: JoinType,
) -> PolarsResult<DataFrame> {
    let left = normalize_keys(left, key)?;
    let right = normalize_keys(right, key)?.select(key.columns().iter().copied())?;
    left.lazy()
        .join(
            right.lazy(),
            key_exprs(key),
            key_exprs(key),
            JoinArgs::new(join_type),
        )
        .collect()
}

impl CompletionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CompletionStrategy::MissingFromToday => "missing_from_today",
            CompletionStrategy::JoinWithYesterdayPending { .. } => "join_with_yesterday_pending",
        }
    }

    /// `None` when there is no usable prior snapshot; completions are then
    /// absent rather than empty.
    pub fn completions(
        &self,
        today: &DataFrame,
        pending_today: &DataFrame,
        pending_yesterday: Option<&DataFrame>,
        key: KeySpec,
    ) -> PolarsResult<Option<DataFrame>> {
        let Some(yesterday) = pending_yesterday.filter(|df| df.height() > 0) else {
            return Ok(None);
        };

        let completed = match self {
            CompletionStrategy::MissingFromToday => {
                join_on_keys(yesterday, pending_today, key, JoinType::Anti)?
            }
            CompletionStrategy::JoinWithYesterdayPending { decided } => {
                let decided_today = today
                    .clone()
                    .lazy()
                    .filter(decided.clone().fill_null(lit(false)))
                    .collect()?;
                join_on_keys(&decided_today, yesterday, key, JoinType::Semi)?
            }
        };
        Ok(Some(completed))
    }
}
