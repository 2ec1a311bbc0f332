pub mod billing;
pub mod client_profile;
pub mod companion_profile;
pub mod compliance;
pub mod conversation;
pub mod patch;
pub mod user;
pub mod verification;
