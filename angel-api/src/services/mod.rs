pub mod auth_service;
pub mod payment_gateway;
pub mod profile_service;
pub mod search_query;
pub mod token_service;
