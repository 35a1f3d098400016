pub mod cache;
pub mod metadata;
pub mod models;
pub mod products;
pub mod resolver;
