pub mod concierge;
pub mod config;
pub mod editing;
pub mod gateway;
pub mod live;
pub mod media;
pub mod store;
pub mod voice;
