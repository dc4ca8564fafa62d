pub mod documents;
pub mod ratings;
pub mod requests;
