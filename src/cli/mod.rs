pub mod commands;
pub mod ui;
pub mod util;

pub use ui::Output;
pub use util::{CommandContext, read_records, write_json};
