use serde_json::json;

use super::print_json;
use crate::alloc::Allocator;
use crate::config::Settings;
use crate::port::PortRange;
use crate::Result;

pub struct PickCommand;

impl PickCommand {
    /// Print one free port. `prefer` and `range` fall back to the configured
    /// defaults when empty/absent.
    pub fn execute(
        settings: &Settings,
        prefer: Vec<u16>,
        range: Option<PortRange>,
        json: bool,
    ) -> Result<u16> {
        let prefer = if prefer.is_empty() {
            settings.default_prefer.clone()
        } else {
            prefer
        };
        let range = range.unwrap_or(settings.default_range);

        let port = Allocator::new(settings).pick(&prefer, range)?;
        if json {
            print_json(&json!({ "port": port }))?;
        } else {
            println!("{port}");
        }
        Ok(port)
    }
}
