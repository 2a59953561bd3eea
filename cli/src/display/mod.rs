use colored::Colorize;
use serde::Serialize;
use watchdog_core::history::HistoryRecord;
use watchdog_core::notifier::format_timestamp;
use watchdog_core::queue::{DeadLetter, Job};
use watchdog_core::scheduler::{CronHealth, Evaluation, ScheduleDecision, ScheduledEvent};
use watchdog_core::types::Severity;
use watchdog_core::watchdog::{AdminNotice, EventOutcome, NoticeLevel, NotificationDecision};
use watchdog_core::{ProcessStats, ScanReport};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Low => severity.label().green(),
        Severity::Medium => severity.label().yellow(),
        Severity::High => severity.label().bright_red(),
        Severity::Severe => severity.label().red().bold(),
    }
}

pub fn print_report(report: &ScanReport) {
    println!("\n{}", "=".repeat(60));
    println!("{}", "WP Watchdog Scan Report".bold());
    println!("{}", "=".repeat(60));
    println!("Run at: {}", format_timestamp(report.run_at));
    println!("Duration: {}ms", report.elapsed);
    println!();

    let summary = &report.summary;
    println!("Summary:");
    println!("  Plugins scanned: {}", report.plugins_scanned);
    if report.plugins_ignored > 0 {
        println!("  Plugins ignored: {}", report.plugins_ignored);
    }
    println!("  Plugins at risk: {}", summary.plugins_at_risk);
    println!("  Updates available: {}", summary.updates_available);
    println!("  Vulnerabilities: {}", summary.vulnerabilities_found);
    for (severity, count) in [
        (Severity::Severe, summary.severe_vulnerabilities),
        (Severity::High, summary.high_vulnerabilities),
        (Severity::Medium, summary.medium_vulnerabilities),
        (Severity::Low, summary.low_vulnerabilities),
    ] {
        if count > 0 {
            println!("    {}: {}", severity_label(severity), count);
        }
    }
    println!();

    if !report.risks.is_empty() {
        println!("Risks:");
        for risk in &report.risks {
            let remote = risk.remote_version.as_deref().unwrap_or("unknown");
            println!(
                "  - {} ({}) {} -> {}",
                risk.plugin_name.bold(),
                risk.plugin_slug,
                risk.local_version,
                remote
            );
            for reason in &risk.reasons {
                println!("      {}", reason);
            }
            for vuln in &risk.details.vulnerabilities {
                let severity = vuln
                    .severity
                    .map(|s| severity_label(s).to_string())
                    .unwrap_or_else(|| "Unrated".to_string());
                println!("      [{}] {}", severity, vuln.title);
                if let Some(fixed) = &vuln.fixed_in {
                    println!("        Fixed in: {}", fixed);
                }
            }
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("{}", "Warnings:".yellow());
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
        println!();
    }

    if report.has_severe_vulnerabilities() {
        println!("{}", "Severe vulnerabilities found!".red().bold());
    } else if !report.has_risks() {
        println!("{}", "All plugins look fine.".green());
    }
    println!("Notified: {}", if report.notified { "yes" } else { "no" });
}

pub fn print_decision(decision: &NotificationDecision) {
    match decision {
        NotificationDecision::Sent(outcome) if outcome.queued > 0 => println!(
            "{} {} job(s) queued, {} of {} delivered.",
            "Sent:".green(),
            outcome.queued,
            outcome.stats.succeeded,
            outcome.stats.processed
        ),
        NotificationDecision::Sent(_) => println!("No notification channel is enabled."),
        NotificationDecision::Duplicate => println!("No new risks to notify."),
        NotificationDecision::NoRisks => println!("Nothing to notify."),
        NotificationDecision::Throttled { retry_in } => println!(
            "{} try again in {}s.",
            "Throttled:".yellow(),
            retry_in
        ),
    }
}

pub fn print_stats(stats: &ProcessStats) {
    println!(
        "Processed {} job(s), {} delivered.",
        stats.processed, stats.succeeded
    );
}

pub fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("Notification queue is empty.");
        return;
    }

    println!("Pending notifications:");
    for job in jobs {
        println!(
            "  - {} [{}] attempts: {}, next attempt: {}",
            job.description,
            job.channel,
            job.attempts,
            format_timestamp(job.next_attempt_at)
        );
        if let Some(error) = &job.last_error {
            println!("      last error: {}", error.red());
        }
    }
}

pub fn print_dead_letter(failed: &DeadLetter) {
    println!("{}", "Last failed notification:".red().bold());
    println!("  {} [{}]", failed.description, failed.channel);
    println!("  Failed at: {}", format_timestamp(failed.failed_at));
    println!("  Attempts: {}", failed.attempts);
    println!(
        "  Error: {}",
        failed.last_error.as_deref().unwrap_or("unknown error")
    );
}

pub fn print_history(records: &[HistoryRecord]) {
    if records.is_empty() {
        println!("No scan history yet.");
        return;
    }

    for record in records {
        println!(
            "{}  {}  {} risk(s)",
            record.run_at,
            format_timestamp(record.run_at),
            record.risks.len()
        );
    }
}

fn describe_decision(decision: &ScheduleDecision) -> String {
    match decision {
        ScheduleDecision::Cleared => "no automatic scans (manual frequency)".to_string(),
        ScheduleDecision::Scheduled { timestamp } => {
            format!("scheduled for {}", format_timestamp(*timestamp))
        }
        ScheduleDecision::Rescheduled { from, timestamp } => format!(
            "moved from {} to {}",
            format_timestamp(*from),
            format_timestamp(*timestamp)
        ),
        ScheduleDecision::Unchanged { timestamp } => {
            format!("next scan at {}", format_timestamp(*timestamp))
        }
        ScheduleDecision::CatchUp {
            overdue_since,
            triggered,
            catch_up_at,
        } => {
            let mut text = format!("overdue since {}", format_timestamp(*overdue_since));
            if *triggered {
                text.push_str(", cron triggered");
            }
            if let Some(at) = catch_up_at {
                text.push_str(&format!(", catch-up at {}", format_timestamp(*at)));
            }
            text
        }
    }
}

pub fn print_evaluation(evaluation: &Evaluation, events: &[ScheduledEvent]) {
    println!("Frequency: {}", evaluation.frequency.to_string().bold());
    if evaluation.testing_reverted {
        println!("{}", "Testing mode expired, reverted to daily scans.".yellow());
    }
    println!("Schedule: {}", describe_decision(&evaluation.decision));

    let health = match evaluation.status.health() {
        CronHealth::Healthy => "healthy".green(),
        CronHealth::Drifting { streak } => format!("drifting ({} overdue checks)", streak).yellow(),
        CronHealth::Disabled => "disabled".red(),
    };
    println!("Cron: {}", health);

    if !events.is_empty() {
        println!("Events:");
        for event in events {
            println!(
                "  - {} at {} ({})",
                event.hook,
                format_timestamp(event.timestamp),
                event.schedule.as_deref().unwrap_or("once")
            );
        }
    }
}

pub fn print_notices(notices: &[AdminNotice]) {
    for notice in notices {
        let level = match notice.level {
            NoticeLevel::Error => "error".red().bold(),
            NoticeLevel::Warning => "warning".yellow().bold(),
            NoticeLevel::Info => "info".blue(),
        };
        println!("{}: {}", level, notice.message);
    }
}

pub fn print_events(outcomes: &[EventOutcome]) {
    if outcomes.is_empty() {
        println!("No events due.");
        return;
    }

    for outcome in outcomes {
        match outcome {
            EventOutcome::Scan { report } => println!(
                "Scan: {} plugin(s) at risk{}",
                report.risks.len(),
                if report.notified { ", notification sent" } else { "" }
            ),
            EventOutcome::Queue { stats } => println!(
                "Queue: processed {}, delivered {}",
                stats.processed, stats.succeeded
            ),
            EventOutcome::Failed { hook, error } => {
                println!("{} {}: {}", "Failed".red(), hook, error)
            }
            EventOutcome::Ignored { hook } => println!("Ignored unknown hook {}", hook),
        }
    }
}
