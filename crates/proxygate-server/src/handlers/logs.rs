//! Request log browsing. Mounted behind the admin role gate.

use crate::error::ApiResult;
use crate::response::ApiResponse;
use crate::state::AppState;
use crate::store::{LogQuery, LogStats, Page, PageRequest, StoredRequestLog};
use axum::extract::{Query, State};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: i64 = 50;
const DEFAULT_STATS_DAYS: i64 = 7;

/// Filters for `GET /api/admin/logs`. Dates are whole UTC days, both inclusive.
#[derive(Debug, Default, Deserialize)]
pub struct ListLogsParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub user_id: Option<i64>,
    pub method: Option<String>,
    /// Substring of the target host.
    pub host: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

/// Window for `GET /api/admin/logs/stats`. Defaults to the last seven days.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn end_of(day: NaiveDate) -> DateTime<Utc> {
    start_of(day) + Duration::days(1)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ListLogsParams {
    fn into_query(self) -> LogQuery {
        LogQuery {
            user_id: self.user_id,
            method: non_blank(self.method).map(|m| m.to_ascii_uppercase()),
            host: non_blank(self.host),
            from: self.from_date.map(start_of),
            to: self.to_date.map(end_of),
            page: PageRequest::new(
                self.page.unwrap_or(1),
                self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            ),
        }
    }
}

impl StatsParams {
    fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = self.to_date.map(end_of).unwrap_or(now);
        let from = self
            .from_date
            .map(start_of)
            .unwrap_or(to - Duration::days(DEFAULT_STATS_DAYS));
        (from, to)
    }
}

/// `GET /api/admin/logs`
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<ListLogsParams>,
) -> ApiResult<ApiResponse<Page<StoredRequestLog>>> {
    let page = state.store.list_request_logs(&params.into_query()).await?;
    Ok(ApiResponse::success(page))
}

/// `GET /api/admin/logs/stats`
pub async fn log_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<ApiResponse<LogStats>> {
    let (from, to) = params.window(Utc::now());
    let stats = state.store.request_log_stats(from, to).await?;
    Ok(ApiResponse::success(stats))
}
