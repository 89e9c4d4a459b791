pub mod job;
pub mod requests;
pub mod work_request;
