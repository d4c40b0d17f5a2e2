pub(crate) mod context;
pub(crate) mod queue;

pub use context::BotContext;
