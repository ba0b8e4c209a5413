mod identity;

pub use identity::{derive_channel_id, derive_id};
