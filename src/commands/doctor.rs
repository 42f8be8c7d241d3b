use std::time::Instant;

use colored::Colorize;
use serde::Serialize;

use super::print_json;
use crate::config::Settings;
use crate::port::{ListenerScan, PortManager};
use crate::Result;

const LISTING_TOOLS: &[&str] = &["lsof", "ss"];
const PROCESS_TOOLS: &[&str] = &["ps", "kill"];

#[derive(Debug, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub os: &'static str,
    pub arch: &'static str,
    pub listing_tools: Vec<ToolStatus>,
    pub process_tools: Vec<ToolStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listeners: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
    pub lock_dir: String,
    pub ready: bool,
}

pub struct DoctorCommand;

impl DoctorCommand {
    /// Always succeeds; problems are reported, not returned.
    pub async fn execute(settings: &Settings, json: bool) -> Result<()> {
        let report = Self::diagnose(settings).await;
        if json {
            return print_json(&report);
        }
        Self::print_report(&report);
        Ok(())
    }

    pub async fn diagnose(settings: &Settings) -> DoctorReport {
        let listing_tools = check_tools(LISTING_TOOLS);
        let process_tools = check_tools(PROCESS_TOOLS);

        let mut backend = None;
        let mut listeners = None;
        let mut scan_ms = None;
        let mut scan_error = None;
        match PortManager::new(settings) {
            Ok(manager) => {
                backend = Some(manager.source_name());
                let started = Instant::now();
                match manager.scan().await {
                    Ok(found) => {
                        listeners = Some(found.len());
                        scan_ms = Some(started.elapsed().as_millis() as u64);
                    }
                    Err(e) => scan_error = Some(e.to_string()),
                }
            }
            Err(e) => scan_error = Some(e.to_string()),
        }

        let ready = scan_error.is_none();
        DoctorReport {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            listing_tools,
            process_tools,
            backend,
            listeners,
            scan_ms,
            scan_error,
            lock_dir: settings.lock_dir.display().to_string(),
            ready,
        }
    }

    fn print_report(report: &DoctorReport) {
        let ok = "✓".green();
        let warn = "!".yellow();

        println!("{}", "portctl doctor".bold());
        println!();
        println!("{}", "System".cyan().bold());
        println!("  OS:       {}/{}", report.os, report.arch);
        println!("  Locks:    {}", report.lock_dir);
        println!();

        println!("{}", "Port listing tools".cyan().bold());
        print_tools(&report.listing_tools);
        if report.listing_tools.iter().all(|t| t.path.is_none()) {
            println!("  {} No port listing tool found. Install lsof or ss.", "×".red());
        }
        println!();

        println!("{}", "Process tools".cyan().bold());
        print_tools(&report.process_tools);
        println!();

        println!("{}", "Port scanning".cyan().bold());
        match (&report.scan_error, report.listeners) {
            (Some(e), _) => println!("  {} {}", "×".red(), e),
            (None, Some(n)) => println!(
                "  {} Found {} listeners in {}ms via {}",
                ok,
                n,
                report.scan_ms.unwrap_or_default(),
                report.backend.unwrap_or("?")
            ),
            (None, None) => {}
        }
        println!();

        println!("{}", "Status".cyan().bold());
        if report.ready {
            println!("  {ok} portctl is ready to use");
        } else {
            println!("  {warn} Some issues detected (see above)");
        }
    }
}

fn check_tools(names: &[&'static str]) -> Vec<ToolStatus> {
    names
        .iter()
        .map(|&name| ToolStatus {
            name,
            path: which::which(name).ok().map(|p| p.display().to_string()),
        })
        .collect()
}

fn print_tools(tools: &[ToolStatus]) {
    for tool in tools {
        match &tool.path {
            Some(path) => println!("  {} {} ({})", "✓".green(), tool.name, path),
            None => println!("  {} {} not found", "!".yellow(), tool.name),
        }
    }
}
