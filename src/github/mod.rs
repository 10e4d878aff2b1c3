pub mod client;
pub mod errors;
pub mod issues;
pub mod pagination;
pub mod pulls;

pub use client::GitHubClient;
pub use errors::GitHubError;
