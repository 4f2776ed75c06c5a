pub mod delivery_log;
pub mod health;
pub mod notification;
pub mod response;
pub mod retry;
pub mod status;
pub mod summary;
pub mod task;
pub mod template;
pub mod validation;
