use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::time::{sleep, Instant};

use super::print_json;
use crate::config::Settings;
use crate::port::{ListenerScan, PortManager};
use crate::utils::validate_port;
use crate::Result;

pub struct CheckCommand;

#[derive(Debug, Serialize)]
struct CheckOutput {
    port: u16,
    status: &'static str,
    in_use: bool,
}

impl CheckCommand {
    /// Returns whether the port is still in use; the caller maps that to the
    /// exit status.
    pub async fn execute(
        settings: &Settings,
        port: u16,
        wait: Option<Duration>,
        json: bool,
    ) -> Result<bool> {
        validate_port(port)?;
        let port_manager = PortManager::new(settings)?;
        let wait = wait.unwrap_or(Duration::ZERO);

        let spinner = (!json && !wait.is_zero()).then(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
                pb.set_style(style);
            }
            pb.set_message(format!("waiting for port {port} to be released"));
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        let result = wait_for_port_free(
            &port_manager,
            port,
            wait,
            settings.check_poll_interval,
        )
        .await;
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        let in_use = result?;

        if json {
            print_json(&CheckOutput {
                port,
                status: if in_use { "in-use" } else { "free" },
                in_use,
            })?;
        } else if in_use {
            println!("{} Port {} is in use", "●".red(), port.to_string().yellow());
        } else {
            println!("{} Port {} is free", "○".green(), port.to_string().yellow());
        }
        Ok(in_use)
    }
}

/// Check `port` until it is free or `wait` has elapsed. Returns `true` if it
/// is still in use at the end. A zero `wait` checks exactly once.
pub async fn wait_for_port_free<S: ListenerScan>(
    scanner: &S,
    port: u16,
    wait: Duration,
    poll_interval: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + wait;
    loop {
        if !scanner.has_listener(port).await? {
            return Ok(false);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(true);
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}
