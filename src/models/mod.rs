//! Data models for mixi entities

mod person;

pub use person::*;
