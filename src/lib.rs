pub mod cache;
pub mod captioner;
pub mod error;
pub mod gateway;
pub mod imaging;
pub mod model;
pub mod settings;
pub mod tone;
