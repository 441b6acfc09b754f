pub mod acl;
pub mod authorizer;
pub mod completer;
pub mod discharger;
pub mod error;
pub mod meeting;
pub mod minter;
pub mod providers;
pub mod pubkey;
pub mod request;
pub mod resolver;
pub mod service;
