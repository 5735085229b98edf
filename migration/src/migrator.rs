use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202601050001_create_users::Migration),
            Box::new(migrations::m202601050002_create_courses::Migration),
            Box::new(migrations::m202601050003_create_course_roles::Migration),
            Box::new(migrations::m202601120001_create_attendance_sessions::Migration),
            Box::new(migrations::m202601120002_create_attendance_records::Migration),
            Box::new(migrations::m202601190001_create_verification_requests::Migration),
            Box::new(migrations::m202601190002_create_override_audit_entries::Migration),
        ]
    }
}
