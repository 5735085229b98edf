pub mod m202601050001_create_users;
pub mod m202601050002_create_courses;
pub mod m202601050003_create_course_roles;
pub mod m202601120001_create_attendance_sessions;
pub mod m202601120002_create_attendance_records;
pub mod m202601190001_create_verification_requests;
pub mod m202601190002_create_override_audit_entries;
