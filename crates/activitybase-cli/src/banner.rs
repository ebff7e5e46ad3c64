use std::path::Path;

use activitybase_config::AppConfig;
use activitybase_db::MigrationStatus;

/// Print the startup banner with a config summary.
pub fn print_banner(config: &AppConfig, admin_dir: &Path, status: &[MigrationStatus]) {
    let version = env!("CARGO_PKG_VERSION");
    let url = format!("http://{}:{}", config.gateway.host, config.gateway.port);

    let applied = status.iter().filter(|s| s.is_applied()).count();
    let migrations = format!("{applied}/{} applied", status.len());
    let automigrate = if config.migrations.automigrate {
        "on"
    } else {
        "off"
    };

    let width = 64;
    let label_w = 14;
    let value_w = width - label_w - 4;

    let title = format!("activitybase v{version}");
    let top = format!("╭─── {title} {}╮", "─".repeat(width - 7 - title.len()));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));
    let row = |l: &str, r: &str| format!("│ {:<label_w$}{:<value_w$} │", l, truncate(r, value_w));

    println!("{top}");
    println!("{}", row("Server", &url));
    println!("{}", row("Admin UI", &format!("{url}/admin")));
    println!("{}", row("Admin dir", &admin_dir.display().to_string()));
    println!("{}", row("Database", &config.db_path().display().to_string()));
    println!("{}", row("Migrations", &migrations));
    println!("{}", row("Automigrate", automigrate));
    println!("{}", row("", "Press Ctrl+C to stop"));
    println!("{bottom}");
}

/// Keep the rightmost characters of long values such as paths.
fn truncate(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - max + 1).collect();
    format!("…{tail}")
}
