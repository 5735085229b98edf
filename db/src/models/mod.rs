pub mod attendance_record;
pub mod attendance_session;
pub mod course;
pub mod course_role;
pub mod override_audit_entry;
pub mod user;
pub mod verification_request;
