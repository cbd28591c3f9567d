//! Types shared between the Parley store and its HTTP surface.

pub mod api;
pub mod models;
