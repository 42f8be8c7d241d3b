pub mod check;
pub mod doctor;
pub mod kill;
pub mod list;
pub mod pick;
pub mod run;
pub mod who;

pub use check::CheckCommand;
pub use doctor::DoctorCommand;
pub use kill::KillCommand;
pub use list::ListCommand;
pub use pick::PickCommand;
pub use run::RunCommand;
pub use who::WhoCommand;

use serde::Serialize;

use crate::Result;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) trait StrExt {
    /// Cut to at most `max_len` characters, ending in `...` when shortened.
    fn truncate_with_ellipsis(&self, max_len: usize) -> String;

    /// Keep the last `max_len` characters, starting with `...` when shortened.
    fn truncate_left(&self, max_len: usize) -> String;
}

impl StrExt for str {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String {
        if self.chars().count() <= max_len {
            return self.to_string();
        }
        let kept: String = self.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }

    fn truncate_left(&self, max_len: usize) -> String {
        let len = self.chars().count();
        if len <= max_len {
            return self.to_string();
        }
        let kept: String = self.chars().skip(len - max_len.saturating_sub(3)).collect();
        format!("...{kept}")
    }
}

/// Program part of a command line: everything before the first ` -` flag,
/// shortened from the left so the file name stays visible.
pub(crate) fn display_program(command_line: &str, max_len: usize) -> String {
    let program = command_line
        .find(" -")
        .map_or(command_line, |idx| &command_line[..idx]);
    program.trim().truncate_left(max_len)
}
