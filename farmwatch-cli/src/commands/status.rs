//! Human-readable rendering of the daemon status report.

use chrono::{DateTime, Utc};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use farmwatch_core::{NoticeLevel, SyncAttempt, WatchdogPhase};
use farmwatch_daemon::StatusReport;

use super::control::outcome_indicator;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "component")]
    component: &'static str,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "detail")]
    detail: String,
}

pub fn print_report(report: &StatusReport) {
    println!(
        "Farmwatch v{} | pid {} | up {}",
        env!("CARGO_PKG_VERSION"),
        report.pid,
        format_seconds(uptime_secs(report.started_at_unix)),
    );

    let separator = "■".repeat(60).bright_black().to_string();
    println!("{separator}");

    let sync = &report.sync;
    let watchdog = &report.watchdog;
    let rows = vec![
        StatusRow {
            component: "sync loop",
            state: on_off(sync.enabled && sync.loop_running),
            detail: format!("every {}s", sync.interval_secs),
        },
        StatusRow {
            component: "network",
            state: if sync.online { "online" } else { "offline" }.to_string(),
            detail: String::new(),
        },
        StatusRow {
            component: "last attempt",
            state: sync
                .last_attempt
                .as_ref()
                .map(|a| a.outcome.to_string())
                .unwrap_or_else(|| "never".to_string()),
            detail: sync
                .last_attempt
                .as_ref()
                .map(describe_attempt)
                .unwrap_or_default(),
        },
        StatusRow {
            component: "last success",
            state: sync
                .last_success_at
                .map(format_datetime_age)
                .unwrap_or_else(|| "never".to_string()),
            detail: sync
                .last_success_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
        },
        StatusRow {
            component: "detection service",
            state: if report.watchdog_enabled {
                watchdog.phase.to_string()
            } else {
                "unwatched".to_string()
            },
            detail: format!("retries {}/{}", watchdog.retry_count, watchdog.max_retries),
        },
        StatusRow {
            component: "monitor",
            state: on_off(watchdog.monitoring),
            detail: if watchdog.manual_only {
                "manual start required".to_string()
            } else if watchdog.start_in_flight {
                "start in flight".to_string()
            } else {
                String::new()
            },
        },
    ];

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    println!(
        "{} sync  {} service",
        report
            .sync
            .last_attempt
            .as_ref()
            .map(|a| outcome_indicator(outcome_kind(a)))
            .unwrap_or_else(|| "■".bright_black().bold().to_string()),
        phase_indicator(watchdog.phase),
    );

    if !report.notices.is_empty() {
        println!("{separator}");
        println!("{}", "RECENT NOTICES".bold());
        for notice in &report.notices {
            let label = match notice.level {
                NoticeLevel::Info => "info".normal(),
                NoticeLevel::Success => "ok".green(),
                NoticeLevel::Warning => "warn".yellow(),
                NoticeLevel::Error => "error".red().bold(),
            };
            println!("  [{label}] {}", notice.message);
        }
    }

    if watchdog.retry_count >= watchdog.max_retries
        && !watchdog.start_in_flight
        && watchdog.phase != WatchdogPhase::Running
    {
        println!("Run 'farmwatch restart' once the detection service host is reachable.");
    }
}

fn describe_attempt(attempt: &SyncAttempt) -> String {
    format!(
        "{} ago: {}",
        format_datetime_age(attempt.attempted_at),
        attempt.message
    )
}

fn outcome_kind(attempt: &SyncAttempt) -> &'static str {
    use farmwatch_core::SyncOutcome;
    match attempt.outcome {
        SyncOutcome::Success => "success",
        SyncOutcome::Ambiguous(_) => "ambiguous",
        SyncOutcome::Failed => "failed",
    }
}

fn phase_indicator(phase: WatchdogPhase) -> String {
    match phase {
        WatchdogPhase::Running => "■".green().bold().to_string(),
        WatchdogPhase::Starting => "■".yellow().bold().to_string(),
        WatchdogPhase::Stopped => "■".red().bold().to_string(),
        WatchdogPhase::Unknown => "■".bright_black().bold().to_string(),
    }
}

fn on_off(on: bool) -> String {
    if on { "running" } else { "stopped" }.to_string()
}

fn uptime_secs(started_at_unix: u64) -> u64 {
    (Utc::now().timestamp().max(0) as u64).saturating_sub(started_at_unix)
}

fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
