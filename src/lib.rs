pub mod common;
pub mod configs;
pub mod gateway;
pub mod voice;
