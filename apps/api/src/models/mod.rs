pub mod history;
pub mod profile;
