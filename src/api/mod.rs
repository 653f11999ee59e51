pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod items;
pub(crate) mod jobs;
pub(crate) mod router;
pub(crate) mod submissions;
pub(crate) mod ws;
