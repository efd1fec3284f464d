pub mod integration;
pub mod label;
pub mod metadata;
pub mod post;
