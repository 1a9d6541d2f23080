pub(crate) mod context;
pub(crate) mod live;
pub(crate) mod queue;

pub(crate) use context::BotContext;
pub(crate) use live::tick_live_sessions;
pub(crate) use queue::{dispatch_update, new_queues};
