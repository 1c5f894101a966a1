//! Once-a-day sales summary.

use chrono::{DateTime, Local, TimeZone, Timelike};

use crate::error::{AppError, AppResult};
use crate::models::DailyReport;
use crate::modules::i18n;
use crate::modules::notifier::alert_admins;
use crate::panel::status::DAY_SECS;
use crate::utils::format::format_gb;
use crate::AppState;

const LAST_REPORT_KEY: &str = "last_report_day";

pub fn render_report(lang: &str, report: &DailyReport) -> String {
    let mut lines = vec![
        i18n::render(lang, "report_title", &[("day", report.day.clone())]),
        i18n::render(
            lang,
            "report_totals",
            &[
                ("sales", report.sales.to_string()),
                ("revenue", report.revenue.to_string()),
                ("volume", format_gb(report.volume_gb)),
                ("new_users", report.new_users.to_string()),
                ("extensions", report.extensions.to_string()),
            ],
        ),
    ];
    for (panel, sales) in &report.per_panel {
        lines.push(i18n::render(
            lang,
            "report_panel_line",
            &[
                ("panel", panel.clone()),
                ("sales", sales.sales.to_string()),
                ("revenue", sales.revenue.to_string()),
                ("volume", format_gb(sales.volume_gb)),
                ("extensions", sales.extensions.to_string()),
            ],
        ));
    }
    lines.join("\n")
}

/// Local day label plus its `[start, end)` epoch bounds
fn day_bounds<Tz: TimeZone>(now: &DateTime<Tz>) -> AppResult<(String, i64, i64)>
where
    Tz::Offset: std::fmt::Display,
{
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|t| now.timezone().from_local_datetime(&t).earliest())
        .ok_or_else(|| AppError::Unknown("local midnight does not exist".into()))?;
    let start = midnight.timestamp();
    Ok((now.format("%Y-%m-%d").to_string(), start, start + DAY_SECS))
}

/// Publish today's report once the configured hour has passed.
/// Returns whether a report went out on this tick.
pub async fn run_once(state: &AppState) -> AppResult<bool> {
    let now = Local::now();
    if now.hour() < state.config.scheduler.report_hour {
        return Ok(false);
    }

    let (day, start, end) = day_bounds(&now)?;
    if state.store.meta(LAST_REPORT_KEY)?.as_deref() == Some(day.as_str()) {
        return Ok(false);
    }

    let report = state.store.daily_report(&day, start, end)?;
    let text = render_report(&state.config.language, &report);

    let chat_id = state.config.telegram.report_chat_id;
    if chat_id != 0 {
        state.notifier.send(chat_id, &text).await?;
    } else if alert_admins(state.store.as_ref(), state.notifier.as_ref(), &text).await == 0 {
        return Err(AppError::Notify("daily report reached no admin".into()));
    }

    state.store.set_meta(LAST_REPORT_KEY, &day)?;
    tracing::info!(day = %day, sales = report.sales, revenue = report.revenue, "Daily report published");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PanelSales;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_day_bounds_follow_timezone() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap().with_timezone(&tz);
        let (day, start, end) = day_bounds(&now).unwrap();
        assert_eq!(day, "2024-05-02");
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 21, 0, 0).unwrap().timestamp());
        assert_eq!(end - start, DAY_SECS);
    }

    #[test]
    fn test_render_lists_each_panel() {
        let mut report = DailyReport {
            day: "2024-05-02".into(),
            sales: 3,
            revenue: 450,
            volume_gb: 70.0,
            new_users: 1,
            extensions: 1,
            ..Default::default()
        };
        report.per_panel.insert(
            "de-1".into(),
            PanelSales {
                sales: 2,
                revenue: 300,
                volume_gb: 50.0,
                extensions: 1,
            },
        );
        let text = render_report("en", &report);
        assert!(text.starts_with("📊 Daily report 2024-05-02"));
        assert!(text.contains("Volume: 70GB"));
        assert!(text.contains("• de-1: 2 sales, 300, 50GB, 1 ext."));
    }
}
