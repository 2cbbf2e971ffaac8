pub mod avatar;
pub mod profile;
pub mod provisioning;
pub mod username;
pub mod validation;
