use colored::Colorize;

use super::{display_program, print_json, StrExt};
use crate::config::Settings;
use crate::port::{Directory, Listener, ListenerQuery, PortManager};
use crate::process::Enricher;
use crate::Result;

pub struct ListCommand;

impl ListCommand {
    pub async fn execute(
        settings: &Settings,
        filter: Option<String>,
        port: Option<u16>,
        unique: bool,
        verbose: bool,
        json: bool,
    ) -> Result<()> {
        let port_manager = PortManager::new(settings)?;
        let enricher = Enricher::new(settings);
        let directory = Directory::new(&port_manager, &enricher);

        let query = ListenerQuery {
            port,
            filter,
            unique,
            enrich: verbose || json,
        };
        let listeners = directory.query(&query).await?;

        if json {
            return print_json(&listeners);
        }
        if listeners.is_empty() {
            println!("{} No listening TCP ports found", "○".blue());
            return Ok(());
        }
        Self::print_table(&listeners, verbose);
        Ok(())
    }

    pub(crate) fn print_table(listeners: &[Listener], verbose: bool) {
        if verbose {
            println!(
                "{} {} {} {}",
                format!("{:<7}", "PORT").cyan().bold(),
                format!("{:<8}", "PID").cyan().bold(),
                format!("{:<12}", "USER").cyan().bold(),
                "EXE".cyan().bold()
            );
        } else {
            println!(
                "{} {} {} {} {}",
                format!("{:<7}", "PORT").cyan().bold(),
                format!("{:<8}", "PID").cyan().bold(),
                format!("{:<12}", "USER").cyan().bold(),
                format!("{:<18}", "COMMAND").cyan().bold(),
                "ADDR".cyan().bold()
            );
        }

        for l in listeners {
            let port = format!("{:<7}", l.port).white();
            let pid = format!("{:<8}", pid_label(l.pid)).blue();
            let user = format!("{:<12}", l.user.truncate_with_ellipsis(12)).green();

            if verbose {
                println!("{port} {pid} {user} {}", exe_label(l).yellow());
            } else {
                let command = format!("{:<18}", l.command.truncate_with_ellipsis(18)).yellow();
                println!("{port} {pid} {user} {command} {}", l.address.dimmed());
            }
        }
    }
}

/// Program path from the command line, or the short command name.
pub(crate) fn exe_label(l: &Listener) -> String {
    l.command_line
        .as_deref()
        .map(|c| display_program(c, 60))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| l.command.clone())
}

fn pid_label(pid: u32) -> String {
    if pid == 0 {
        "-".to_string()
    } else {
        pid.to_string()
    }
}
