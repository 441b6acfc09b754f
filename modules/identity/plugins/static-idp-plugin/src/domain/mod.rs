pub mod service;

pub use service::{Credentials, Service};
