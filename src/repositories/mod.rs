pub(crate) mod gradings;
pub(crate) mod items;
pub(crate) mod jobs;
