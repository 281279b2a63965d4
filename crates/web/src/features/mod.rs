pub mod admin;
pub mod badges;
pub mod challenges;
pub mod rankings;
pub mod xp;
