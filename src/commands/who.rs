use colored::Colorize;

use super::print_json;
use crate::config::Settings;
use crate::port::{Directory, Listener, PortManager};
use crate::process::Enricher;
use crate::Result;

pub struct WhoCommand;

impl WhoCommand {
    pub async fn execute(settings: &Settings, port: u16, json: bool) -> Result<()> {
        let port_manager = PortManager::new(settings)?;
        let enricher = Enricher::new(settings);
        let listeners = Directory::new(&port_manager, &enricher).who(port).await?;

        if json {
            return print_json(&listeners);
        }
        if listeners.is_empty() {
            println!("{} Port {} is free", "○".blue(), port.to_string().yellow());
            return Ok(());
        }
        let noun = if listeners.len() == 1 {
            "listener"
        } else {
            "listeners"
        };
        println!(
            "{} {} ({} {})",
            "port".cyan().bold(),
            port.to_string().yellow(),
            listeners.len(),
            noun
        );
        for (i, listener) in listeners.iter().enumerate() {
            if i > 0 {
                println!();
            }
            for (label, value) in detail_lines(listener) {
                println!("  {:<5} {}", format!("{label}:").dimmed(), value);
            }
        }
        Ok(())
    }
}

/// Labelled fields of one listener, leaving out whatever is unknown.
pub(crate) fn detail_lines(l: &Listener) -> Vec<(&'static str, String)> {
    let mut lines = Vec::new();
    if l.pid > 0 {
        lines.push(("pid", l.pid.to_string()));
    }
    if let Some(ppid) = l.ppid {
        lines.push(("ppid", ppid.to_string()));
    }
    if !l.user.is_empty() {
        lines.push(("user", l.user.clone()));
    }
    if !l.command.is_empty() {
        lines.push(("cmd", l.command.clone()));
    }
    let optional = [
        ("args", &l.command_line),
        ("exe", &l.executable),
        ("cwd", &l.cwd),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            lines.push((label, value.clone()));
        }
    }
    if !l.address.is_empty() {
        lines.push(("addr", l.address.clone()));
    }
    lines
}
