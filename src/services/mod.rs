pub mod access_guard;
pub mod callback_gateway;
pub mod events;
pub mod grading_service;
pub mod host_lms;
pub mod lifecycle_service;
pub mod notification_service;
pub mod remote_gateway;
pub mod results_poller;
