use uuid::Uuid;

/// Stable id for an episode: UUID v5 (DNS namespace) over `feed_link + title`.
///
/// The same episode fetched again, from any process, maps to the same id, which
/// is what makes feed item writes idempotent.
pub fn derive_id(feed_link: &str, title: &str) -> String {
    let mut name = String::with_capacity(feed_link.len() + title.len());
    name.push_str(feed_link);
    name.push_str(title);
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()).to_string()
}

/// Channel ids use the same derivation over the channel title.
pub fn derive_channel_id(feed_link: &str, channel_title: &str) -> String {
    derive_id(feed_link, channel_title)
}
