pub mod check;
pub mod classify;
pub mod identity;
pub mod scope;
pub mod sign;
pub mod state;
pub mod verify;
