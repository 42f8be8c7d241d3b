use std::time::Duration;

use colored::Colorize;

use super::print_json;
use crate::config::Settings;
use crate::port::PortManager;
use crate::process::{
    Caller, Enricher, KillReport, KillRequest, KillSignal, KillStatus, ProcessManager,
    TerminationController,
};
use crate::Result;

pub struct KillCommand;

impl KillCommand {
    pub async fn execute(
        settings: &Settings,
        port: u16,
        signal: KillSignal,
        timeout: Option<Duration>,
        force: bool,
        dry_run: bool,
        json: bool,
    ) -> Result<()> {
        let port_manager = PortManager::new(settings)?;
        let enricher = Enricher::new(settings);
        let process_manager = ProcessManager::new();
        let controller = TerminationController::new(
            &port_manager,
            &enricher,
            &process_manager,
            Caller::current(),
            settings.kill_poll_interval,
        );

        let request = KillRequest {
            port,
            signal,
            timeout: timeout.unwrap_or(settings.kill_timeout),
            force,
            dry_run,
        };
        let report = controller.run(&request).await?;

        if json {
            return print_json(&report);
        }
        Self::print_report(&report, &request);
        Ok(())
    }

    fn print_report(report: &KillReport, request: &KillRequest) {
        let port = report.port.to_string().yellow();
        match report.status {
            KillStatus::Idle => {
                println!("{} Port {} is not in use, nothing to kill", "○".blue(), port);
            }
            KillStatus::DryRun => {
                println!("{} Would send {} on port {}:", "?".cyan(), request.signal, port);
                for t in &report.targets {
                    println!(
                        "  PID {} {} {}",
                        t.pid.to_string().cyan(),
                        t.command.yellow(),
                        t.user.dimmed()
                    );
                }
            }
            KillStatus::Signaled => {
                for t in &report.targets {
                    if report.failed.contains(&t.pid) {
                        println!(
                            "{} Could not signal {} (PID: {})",
                            "×".red(),
                            t.command.yellow(),
                            t.pid.to_string().cyan()
                        );
                        continue;
                    }
                    println!(
                        "{} Sent {} to {} (PID: {})",
                        "✓".green(),
                        request.signal,
                        t.command.yellow(),
                        t.pid.to_string().cyan()
                    );
                }
                if report.escalated {
                    println!(
                        "{} Port {} still in use after {}ms, sent {}",
                        "!".red(),
                        port,
                        request.timeout.as_millis(),
                        KillSignal::Kill
                    );
                }
            }
        }
    }
}
