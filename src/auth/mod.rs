pub mod authenticator;
pub mod extractors;
pub mod gateway;
pub mod jwt;
pub mod password;
