pub(crate) mod update;

pub use update::{Outcome, handle_update};
