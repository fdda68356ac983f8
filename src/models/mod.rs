pub mod exam_attempt;
pub mod exam_settings;
pub mod poll_job;
pub mod remote;
