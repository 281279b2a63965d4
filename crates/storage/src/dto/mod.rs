pub mod alert;
pub mod badge;
pub mod challenge;
pub mod common;
pub mod ranking;
pub mod xp;
