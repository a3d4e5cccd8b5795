pub mod activity;
pub mod bounty;
pub mod list;
pub mod push;
pub mod rebuild;
pub mod relay_info;
pub mod show;
pub mod sync;
