//! Module kinds shipped with the bot

pub mod hello;
pub mod member_info;
pub mod module_list;
pub mod settings;
pub mod time_info;
