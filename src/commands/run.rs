use std::process::{ExitStatus, Stdio};

use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::alloc::Allocator;
use crate::config::Settings;
use crate::port::PortRange;
use crate::utils::validate_env_name;
use crate::{Error, Result};

pub struct RunCommand;

impl RunCommand {
    /// Allocate a port, export it to the child as `env_name`, run the child
    /// to completion and return its exit code. The port lock is held until
    /// the child exits.
    pub async fn execute(
        settings: &Settings,
        prefer: Vec<u16>,
        range: Option<PortRange>,
        env_name: &str,
        command: &[String],
    ) -> Result<i32> {
        validate_env_name(env_name)?;
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::InvalidInput("missing command after --".to_string()))?;

        let prefer = if prefer.is_empty() {
            settings.default_prefer.clone()
        } else {
            prefer
        };
        let range = range.unwrap_or(settings.default_range);

        let lock = Allocator::new(settings).pick_and_lock(&prefer, range)?;
        let port = lock.port();
        eprintln!("portctl: using port {port}");
        info!(port, program = %program, env = env_name, "starting child");

        let mut child = TokioCommand::new(program)
            .args(args)
            .env(env_name, port.to_string())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::CommandFailed(format!("failed to start {program}: {e}")))?;

        // The terminal delivers Ctrl-C to the child as well; keep waiting so
        // its exit status is reported and the lock outlives it.
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = tokio::signal::ctrl_c() => debug!("interrupt received, waiting for child"),
            }
        };

        if let Err(e) = lock.release() {
            warn!(port, error = %e, "failed to release port lock");
        }
        let code = exit_code(status);
        debug!(port, code, "child exited");
        Ok(code)
    }
}

/// Child exit code, or 128 plus the signal number when it was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
