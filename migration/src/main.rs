use migration::Migrator;
use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    let path = util::config::database_path();
    let url = if path.starts_with("sqlite:") {
        path
    } else {
        format!("sqlite://{path}?mode=rwc")
    };
    // SAFETY: set before any other thread reads the environment.
    unsafe {
        std::env::set_var("DATABASE_URL", &url);
    }
    cli::run_cli(Migrator).await;
}
