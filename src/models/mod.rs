mod episode;
mod link;
mod subscription;
mod user;

pub use episode::{CatalogEpisode, EpisodeDetail, FeedChannel, FeedItem};
pub use link::{KeywordLink, NewKeywordLink};
pub use subscription::{
    Fingerprint, NewSubscription, Source, SubscribeOutcome, Subscription, SubscriptionStatus,
};
pub use user::User;
