pub mod config;
pub mod error;
pub mod metadata;
pub mod models;
pub mod options;
pub mod pricing;
pub mod providers;

pub use error::ImggenError;
