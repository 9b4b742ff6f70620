pub mod sessions;
pub mod short_links;
pub mod users;
